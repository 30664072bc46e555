//! Image capabilities used by the cache engine: decoding and encoding tile
//! rasters, the 2×2 overview compositor and the transparency probe.
//!
//! Everything here works on byte buffers plus a [`TileFormat`], so the
//! storage back-ends stay free of image-library specifics.

mod codec;
mod compose;
mod transparency;

pub use codec::*;
pub use compose::*;
pub use transparency::*;
