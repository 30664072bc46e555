//! Tile addressing types: coordinates, schemes, bounding boxes, coverages,
//! formats and the metadata record.

mod coverage;
mod geo_bbox;
mod metadata;
mod tile_bbox;
mod tile_coord;
mod tile_format;
mod tile_scheme;

pub use coverage::*;
pub use geo_bbox::*;
pub use metadata::*;
pub use tile_bbox::*;
pub use tile_coord::*;
pub use tile_format::*;
pub use tile_scheme::*;
