//! Tile coordinates and the lon/lat ↔ tile-index math.
//!
//! Coordinates are held in a declared [`TileScheme`]; all arithmetic is done
//! in XYZ orientation (y growing southwards) and converted on the boundary.
//!
//! # Examples
//!
//! ```
//! use tilegate_core::{TileCoord, TileScheme};
//!
//! let coord = TileCoord::from_lon_lat(13.4, 52.5, 10, TileScheme::Xyz).unwrap();
//! assert_eq!((coord.z, coord.x, coord.y), (10, 550, 335));
//! ```

use crate::{GeoBBox, MAX_MERCATOR_LAT, MAX_MERCATOR_LNG, TileScheme};
use anyhow::{Result, ensure};
use std::{
	f64::consts::PI,
	fmt::{self, Debug},
};

/// Highest zoom level the addressing supports.
pub const MAX_ZOOM: u8 = 25;

/// A tile index `(z, x, y)`. The y orientation is whatever scheme the value
/// was built with; see [`TileCoord::flipped_y`] to convert.
#[derive(Eq, PartialEq, Clone, Hash, Copy)]
pub struct TileCoord {
	pub z: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	pub fn new(z: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(z <= MAX_ZOOM, "zoom level ({z}) must be <= {MAX_ZOOM}");
		let max = 1u32 << z;
		ensure!(x < max, "x ({x}) must be < {max} at zoom {z}");
		ensure!(y < max, "y ({y}) must be < {max} at zoom {z}");
		Ok(TileCoord { z, x, y })
	}

	/// Converts geographic coordinates to the containing tile index.
	///
	/// Longitude and latitude are clamped to the Mercator domain before
	/// projection, so out-of-range inputs still give in-range indices.
	pub fn from_lon_lat(lon: f64, lat: f64, z: u8, scheme: TileScheme) -> Result<TileCoord> {
		ensure!(z <= MAX_ZOOM, "zoom level ({z}) must be <= {MAX_ZOOM}");

		let lon = lon.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
		let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);

		let n = f64::from(1u32 << z);
		let max = (1u32 << z) - 1;

		let x = ((lon + 180.0) / 360.0 * n).floor() as i64;
		let lat_rad = lat.to_radians();
		let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor() as i64;

		let x = x.clamp(0, i64::from(max)) as u32;
		let mut y = y.clamp(0, i64::from(max)) as u32;
		if scheme == TileScheme::Tms {
			y = TileScheme::flip_y(z, y);
		}

		Ok(TileCoord { z, x, y })
	}

	/// The same tile with its y index flipped to the other scheme.
	pub fn flipped_y(&self) -> TileCoord {
		TileCoord {
			z: self.z,
			x: self.x,
			y: TileScheme::flip_y(self.z, self.y),
		}
	}

	/// Geographic extent of this tile. `scheme` declares the orientation of
	/// `self.y`.
	pub fn as_geo_bbox(&self, scheme: TileScheme) -> GeoBBox {
		let y = match scheme {
			TileScheme::Xyz => self.y,
			TileScheme::Tms => TileScheme::flip_y(self.z, self.y),
		};
		let n = f64::from(1u32 << self.z);

		let lon = |x: f64| x / n * 360.0 - 180.0;
		let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();

		// the checked constructor cannot fail for in-range tile indices
		GeoBBox::new(
			lon(f64::from(self.x)),
			lat(f64::from(y + 1)),
			lon(f64::from(self.x + 1)),
			lat(f64::from(y)),
		)
		.unwrap()
	}

	/// The four children of this tile at zoom `z + 1`, in
	/// `(x, y), (x+1, y), (x, y+1), (x+1, y+1)` order of the declared scheme.
	pub fn children(&self) -> Result<[TileCoord; 4]> {
		ensure!(self.z < MAX_ZOOM, "zoom level ({}) has no children", self.z);
		let z = self.z + 1;
		let (x, y) = (self.x * 2, self.y * 2);
		Ok([
			TileCoord { z, x, y },
			TileCoord { z, x: x + 1, y },
			TileCoord { z, x, y: y + 1 },
			TileCoord { z, x: x + 1, y: y + 1 },
		])
	}

	/// The parent tile at zoom `z - 1`, or `None` at zoom 0.
	pub fn parent(&self) -> Option<TileCoord> {
		(self.z > 0).then(|| TileCoord {
			z: self.z - 1,
			x: self.x / 2,
			y: self.y / 2,
		})
	}

	pub fn is_valid(&self) -> bool {
		self.z <= MAX_ZOOM && {
			let max = 1u32 << self.z;
			self.x < max && self.y < max
		}
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileCoord({}, [{}, {}])", &self.z, &self.x, &self.y))
	}
}

impl fmt::Display for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.z, self.x, self.y)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn new_validates() {
		assert!(TileCoord::new(26, 0, 0).is_err());
		assert!(TileCoord::new(2, 4, 0).is_err());
		assert!(TileCoord::new(2, 0, 4).is_err());
		let coord = TileCoord::new(2, 1, 2).unwrap();
		assert!(coord.is_valid());
		assert_eq!(format!("{coord:?}"), "TileCoord(2, [1, 2])");
		assert_eq!(coord.to_string(), "2/1/2");
	}

	#[rstest]
	#[case((0.0, 0.0, 0), (0, 0))]
	#[case((0.0, 0.0, 1), (1, 1))]
	#[case((-180.0, 85.051129, 3), (0, 0))]
	#[case((179.999, -85.051129, 3), (7, 7))]
	#[case((13.4, 52.5, 10), (550, 335))]
	fn from_lon_lat_xyz(#[case] input: (f64, f64, u8), #[case] expected: (u32, u32)) {
		let coord = TileCoord::from_lon_lat(input.0, input.1, input.2, TileScheme::Xyz).unwrap();
		assert_eq!((coord.x, coord.y), expected);
	}

	#[test]
	fn from_lon_lat_clamps() {
		// out-of-range inputs never give out-of-range indices
		let coord = TileCoord::from_lon_lat(400.0, 99.0, 4, TileScheme::Xyz).unwrap();
		assert_eq!((coord.x, coord.y), (15, 0));
		let coord = TileCoord::from_lon_lat(-400.0, -99.0, 4, TileScheme::Xyz).unwrap();
		assert_eq!((coord.x, coord.y), (0, 15));
	}

	#[test]
	fn tms_flips_y() {
		let xyz = TileCoord::from_lon_lat(13.4, 52.5, 10, TileScheme::Xyz).unwrap();
		let tms = TileCoord::from_lon_lat(13.4, 52.5, 10, TileScheme::Tms).unwrap();
		assert_eq!(tms.y, TileScheme::flip_y(10, xyz.y));
		assert_eq!(xyz.flipped_y(), tms);
		assert_eq!(xyz.flipped_y().flipped_y(), xyz);
	}

	#[test]
	fn world_tile_bbox() {
		let bbox = TileCoord::new(0, 0, 0).unwrap().as_geo_bbox(TileScheme::Xyz);
		assert!((bbox.x_min + 180.0).abs() < 1e-9);
		assert!((bbox.x_max - 180.0).abs() < 1e-9);
		assert!((bbox.y_min + 85.0511).abs() < 1e-3);
		assert!((bbox.y_max - 85.0511).abs() < 1e-3);

		// both schemes agree at (0, 0, 0)
		let tms = TileCoord::new(0, 0, 0).unwrap().as_geo_bbox(TileScheme::Tms);
		assert_eq!(bbox.as_array(), tms.as_array());
	}

	#[test]
	fn bbox_roundtrip() {
		let coord = TileCoord::new(10, 550, 335).unwrap();
		let bbox = coord.as_geo_bbox(TileScheme::Xyz);
		let center = TileCoord::from_lon_lat(
			(bbox.x_min + bbox.x_max) / 2.0,
			(bbox.y_min + bbox.y_max) / 2.0,
			10,
			TileScheme::Xyz,
		)
		.unwrap();
		assert_eq!(center, coord);
	}

	#[test]
	fn children_and_parent() {
		let coord = TileCoord::new(2, 1, 2).unwrap();
		let children = coord.children().unwrap();
		assert_eq!(children[0], TileCoord::new(3, 2, 4).unwrap());
		assert_eq!(children[3], TileCoord::new(3, 3, 5).unwrap());
		for child in children {
			assert_eq!(child.parent(), Some(coord));
		}
		assert_eq!(TileCoord::new(0, 0, 0).unwrap().parent(), None);
		assert!(TileCoord::new(MAX_ZOOM, 0, 0).unwrap().children().is_err());
	}
}
