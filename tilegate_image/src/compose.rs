//! The 2×2 overview compositor.
//!
//! A parent tile is built from its four children: each child is copied onto
//! a `2w × 2h` transparent canvas at its quadrant offset, the canvas is
//! downsampled to `w × h`, and the result is re-encoded to the source
//! format. Missing or unreadable children leave their quadrant transparent.

use crate::{decode_raster, encode_raster};
use anyhow::{Result, ensure};
use image::{DynamicImage, GenericImage, imageops::FilterType};
use log::warn;
use tilegate_core::TileFormat;

/// Quadrant order of the `children` array: `(dx, dy)` with y growing
/// downwards, i.e. `[top-left, top-right, bottom-left, bottom-right]` in
/// XYZ orientation. Index = `dy * 2 + dx`.
pub const QUADRANTS: [(u32, u32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Composites four child tiles into one parent tile of `tile_width ×
/// tile_height` pixels, encoded as `format`.
///
/// Children that are `None` or fail to decode contribute a transparent
/// quadrant. Decoded children must match the parent's pixel dimensions.
pub fn compose_quad(
	children: &[Option<Vec<u8>>; 4],
	tile_width: u32,
	tile_height: u32,
	format: TileFormat,
) -> Result<Vec<u8>> {
	ensure!(tile_width > 0 && tile_height > 0, "tile dimensions must be positive");

	let mut canvas = DynamicImage::new_rgba8(tile_width * 2, tile_height * 2);

	for (index, (dx, dy)) in QUADRANTS.iter().enumerate() {
		let Some(data) = &children[index] else {
			continue;
		};
		let child = match decode_raster(data) {
			Ok(raster) => raster,
			Err(error) => {
				warn!("skipping unreadable child tile in quadrant {index}: {error}");
				continue;
			}
		};
		ensure!(
			child.width() == tile_width && child.height() == tile_height,
			"child tile is {}x{}, expected {tile_width}x{tile_height}",
			child.width(),
			child.height()
		);
		canvas.copy_from(
			&DynamicImage::ImageRgba8(child.to_rgba8()),
			dx * tile_width,
			dy * tile_height,
		)?;
	}

	let parent = canvas.resize_exact(tile_width, tile_height, FilterType::Triangle);
	encode_raster(&parent, format)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::solid_png;
	use image::GenericImageView;

	fn quadrant_pixel(data: &[u8], x: u32, y: u32) -> [u8; 4] {
		decode_raster(data).unwrap().get_pixel(x, y).0
	}

	#[test]
	fn four_solid_children() -> Result<()> {
		let children = [
			Some(solid_png(4, 4, [255, 0, 0, 255])),
			Some(solid_png(4, 4, [0, 255, 0, 255])),
			Some(solid_png(4, 4, [0, 0, 255, 255])),
			Some(solid_png(4, 4, [255, 255, 0, 255])),
		];
		let parent = compose_quad(&children, 4, 4, TileFormat::PNG)?;

		// each quadrant keeps its child's solid color after downsampling
		assert_eq!(quadrant_pixel(&parent, 0, 0), [255, 0, 0, 255]);
		assert_eq!(quadrant_pixel(&parent, 3, 0), [0, 255, 0, 255]);
		assert_eq!(quadrant_pixel(&parent, 0, 3), [0, 0, 255, 255]);
		assert_eq!(quadrant_pixel(&parent, 3, 3), [255, 255, 0, 255]);
		Ok(())
	}

	#[test]
	fn missing_child_is_transparent() -> Result<()> {
		let children = [Some(solid_png(4, 4, [255, 0, 0, 255])), None, None, None];
		let parent = compose_quad(&children, 4, 4, TileFormat::PNG)?;

		assert_eq!(quadrant_pixel(&parent, 0, 0), [255, 0, 0, 255]);
		assert_eq!(quadrant_pixel(&parent, 3, 3)[3], 0);
		Ok(())
	}

	#[test]
	fn unreadable_child_is_transparent() -> Result<()> {
		let children = [Some(b"not an image".to_vec()), None, None, None];
		let parent = compose_quad(&children, 4, 4, TileFormat::PNG)?;
		assert_eq!(quadrant_pixel(&parent, 0, 0)[3], 0);
		Ok(())
	}

	#[test]
	fn size_mismatch_is_an_error() {
		let children = [Some(solid_png(8, 8, [255, 0, 0, 255])), None, None, None];
		assert!(compose_quad(&children, 4, 4, TileFormat::PNG).is_err());
		assert!(compose_quad(&[None, None, None, None], 0, 4, TileFormat::PNG).is_err());
	}

	#[test]
	fn reencodes_to_requested_format() -> Result<()> {
		let children = [Some(solid_png(4, 4, [10, 20, 30, 255])), None, None, None];
		let parent = compose_quad(&children, 4, 4, TileFormat::WEBP)?;
		assert_eq!(TileFormat::from_bytes(&parent), TileFormat::WEBP);
		Ok(())
	}
}
