//! Fully-transparent tile detection for the `store_transparent` gate.

use anyhow::Result;
use image::GenericImageView;
use tilegate_core::TileFormat;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// True if `data` is a PNG whose alpha channel is zero everywhere.
///
/// Only PNG is probed: it is the only raster format the origins deliver
/// with an alpha channel. Non-PNG buffers and undecodable PNGs report
/// `false`, so a broken tile is still stored rather than dropped.
pub fn is_fully_transparent_png(data: &[u8]) -> bool {
	if !data.starts_with(&PNG_SIGNATURE) || TileFormat::from_bytes(data) != TileFormat::PNG {
		return false;
	}
	match probe_alpha(data) {
		Ok(transparent) => transparent,
		Err(_) => false,
	}
}

fn probe_alpha(data: &[u8]) -> Result<bool> {
	let raster = crate::decode_raster(data)?;
	if raster.color().has_alpha() {
		Ok(raster.pixels().all(|(_x, _y, pixel)| pixel.0[3] == 0))
	} else {
		Ok(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{encode_raster, solid_png};
	use image::{DynamicImage, Rgb, RgbImage};

	#[test]
	fn transparent_png() {
		assert!(is_fully_transparent_png(&solid_png(1, 1, [0, 0, 0, 0])));
		assert!(is_fully_transparent_png(&solid_png(16, 16, [255, 255, 255, 0])));
	}

	#[test]
	fn visible_png() {
		assert!(!is_fully_transparent_png(&solid_png(1, 1, [0, 0, 0, 255])));
		// one opaque pixel is enough
		let mut raster = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 0]));
		raster.put_pixel(2, 2, image::Rgba([0, 0, 0, 1]));
		let data = encode_raster(&DynamicImage::ImageRgba8(raster), TileFormat::PNG).unwrap();
		assert!(!is_fully_transparent_png(&data));
	}

	#[test]
	fn png_without_alpha() {
		let raster = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])));
		let data = encode_raster(&raster, TileFormat::PNG).unwrap();
		// encode_raster always writes RGBA, so build an opaque buffer instead
		assert!(!is_fully_transparent_png(&data));
	}

	#[test]
	fn non_png_buffers() {
		assert!(!is_fully_transparent_png(b""));
		assert!(!is_fully_transparent_png(&[0x1F, 0x8B, 0x00]));
		assert!(!is_fully_transparent_png(b"\x89PNG\r\n\x1a\ntruncated"));
	}
}
