//! Tile-aligned bounding boxes for a single zoom level.
//!
//! A `TileBBox` is a rectangular region of tiles at one zoom level,
//! inclusive on both corners. Internally it stores `(x_min, y_min, width,
//! height)`; an empty box has `width == 0` or `height == 0`. The y
//! orientation is whichever scheme the box was built with — every operation
//! here (scaling, intersection, iteration) is orientation-agnostic because
//! the XYZ↔TMS flip reverses but never splits ranges.

use crate::{GeoBBox, MAX_ZOOM, TileCoord, TileScheme};
use anyhow::{Result, ensure};
use itertools::Itertools;
use std::fmt::Debug;

/// A rectangular region of tiles at a specific zoom level, inclusive on the
/// maximum side.
#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct TileBBox {
	pub z: u8,
	x_min: u32,
	y_min: u32,
	width: u32,
	height: u32,
}

impl TileBBox {
	/// Creates a bbox from inclusive corner coordinates.
	///
	/// # Errors
	/// Returns an error if the corners are inverted or out of range for `z`.
	pub fn new(z: u8, x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Result<TileBBox> {
		ensure!(z <= MAX_ZOOM, "zoom level ({z}) must be <= {MAX_ZOOM}");
		let size = 1u32 << z;
		ensure!(x_max < size, "x_max ({x_max}) must be < {size} at zoom {z}");
		ensure!(y_max < size, "y_max ({y_max}) must be < {size} at zoom {z}");
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		Ok(TileBBox {
			z,
			x_min,
			y_min,
			width: x_max - x_min + 1,
			height: y_max - y_min + 1,
		})
	}

	pub fn new_empty(z: u8) -> Result<TileBBox> {
		ensure!(z <= MAX_ZOOM, "zoom level ({z}) must be <= {MAX_ZOOM}");
		Ok(TileBBox {
			z,
			x_min: 0,
			y_min: 0,
			width: 0,
			height: 0,
		})
	}

	pub fn new_full(z: u8) -> Result<TileBBox> {
		ensure!(z <= MAX_ZOOM, "zoom level ({z}) must be <= {MAX_ZOOM}");
		let size = 1u32 << z;
		Ok(TileBBox {
			z,
			x_min: 0,
			y_min: 0,
			width: size,
			height: size,
		})
	}

	/// Converts a geographic bbox into the tile rectangle that covers it.
	///
	/// Both corners are resolved by flooring into the tile they fall into; a
	/// single-point bbox therefore yields a 1×1 range at every zoom. The y
	/// order is normalised after the scheme conversion.
	pub fn from_geo(z: u8, bbox: &GeoBBox, scheme: TileScheme) -> Result<TileBBox> {
		if bbox.is_empty() {
			return TileBBox::new_empty(z);
		}
		let low = TileCoord::from_lon_lat(bbox.x_min, bbox.y_min, z, scheme)?;
		let high = TileCoord::from_lon_lat(bbox.x_max, bbox.y_max, z, scheme)?;

		TileBBox::new(
			z,
			low.x.min(high.x),
			low.y.min(high.y),
			low.x.max(high.x),
			high.y.max(low.y),
		)
	}

	pub fn x_min(&self) -> u32 {
		self.x_min
	}

	pub fn y_min(&self) -> u32 {
		self.y_min
	}

	/// Inclusive maximum x; meaningless when the box is empty.
	pub fn x_max(&self) -> u32 {
		self.x_min + self.width.max(1) - 1
	}

	/// Inclusive maximum y; meaningless when the box is empty.
	pub fn y_max(&self) -> u32 {
		self.y_min + self.height.max(1) - 1
	}

	pub fn width(&self) -> u32 {
		self.width
	}

	pub fn height(&self) -> u32 {
		self.height
	}

	pub fn is_empty(&self) -> bool {
		self.width == 0 || self.height == 0
	}

	/// Number of tiles in the box.
	pub fn count_tiles(&self) -> u64 {
		u64::from(self.width) * u64::from(self.height)
	}

	pub fn contains(&self, coord: &TileCoord) -> bool {
		coord.z == self.z
			&& !self.is_empty()
			&& coord.x >= self.x_min
			&& coord.x <= self.x_max()
			&& coord.y >= self.y_min
			&& coord.y <= self.y_max()
	}

	/// Shrinks the box in place to the overlap with `other` (same zoom).
	pub fn intersect_with(&mut self, other: &TileBBox) -> Result<()> {
		ensure!(
			self.z == other.z,
			"cannot intersect bboxes of different zoom levels ({} vs {})",
			self.z,
			other.z
		);
		if self.is_empty() || other.is_empty() {
			self.width = 0;
			self.height = 0;
			return Ok(());
		}
		let x_min = self.x_min.max(other.x_min);
		let y_min = self.y_min.max(other.y_min);
		let x_max = self.x_max().min(other.x_max());
		let y_max = self.y_max().min(other.y_max());
		if x_min > x_max || y_min > y_max {
			self.width = 0;
			self.height = 0;
		} else {
			self.x_min = x_min;
			self.y_min = y_min;
			self.width = x_max - x_min + 1;
			self.height = y_max - y_min + 1;
		}
		Ok(())
	}

	/// The geographic extent realised by the outer tiles of the box.
	pub fn as_geo_bbox(&self, scheme: TileScheme) -> Result<GeoBBox> {
		ensure!(!self.is_empty(), "an empty tile bbox has no geographic extent");
		let mut bbox = TileCoord::new(self.z, self.x_min, self.y_min)?.as_geo_bbox(scheme);
		bbox.extend(&TileCoord::new(self.z, self.x_max(), self.y_max())?.as_geo_bbox(scheme));
		Ok(bbox)
	}

	/// The box at zoom `z - 1` covering the same tiles (each index halved).
	///
	/// Floor division keeps this correct in both schemes.
	pub fn shrunk(&self) -> Result<TileBBox> {
		ensure!(self.z > 0, "zoom level 0 cannot be shrunk");
		if self.is_empty() {
			return TileBBox::new_empty(self.z - 1);
		}
		TileBBox::new(
			self.z - 1,
			self.x_min / 2,
			self.y_min / 2,
			self.x_max() / 2,
			self.y_max() / 2,
		)
	}

	/// The `2^dz × 2^dz` block of descendants of `coord` at `coord.z + dz`.
	///
	/// Works in either scheme: the XYZ↔TMS flip maps aligned blocks onto
	/// aligned blocks.
	pub fn pyramid_of(coord: &TileCoord, dz: u8) -> Result<TileBBox> {
		ensure!(
			coord.z + dz <= MAX_ZOOM,
			"zoom level ({} + {dz}) must be <= {MAX_ZOOM}",
			coord.z
		);
		let scale = 1u32 << dz;
		TileBBox::new(
			coord.z + dz,
			coord.x * scale,
			coord.y * scale,
			(coord.x + 1) * scale - 1,
			(coord.y + 1) * scale - 1,
		)
	}

	/// Iterates over all tiles, x-major: for each x column, every y.
	///
	/// This is the deterministic dispatch order of the coverage operator.
	pub fn iter_coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
		let x_range = self.x_min..self.x_min + self.width;
		let y_range = self.y_min..self.y_min + self.height;
		x_range
			.cartesian_product(y_range)
			.map(|(x, y)| TileCoord { z: self.z, x, y })
	}
}

impl Debug for TileBBox {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}: [{},{},{},{}] ({})",
			self.z,
			self.x_min,
			self.y_min,
			self.x_max(),
			self.y_max(),
			self.count_tiles()
		)
	}
}
