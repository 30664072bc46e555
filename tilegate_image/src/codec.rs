//! Byte-buffer ↔ raster conversions.

use anyhow::{Context, Result, bail};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tilegate_core::TileFormat;

fn image_format(format: TileFormat) -> Result<ImageFormat> {
	Ok(match format {
		TileFormat::GIF => ImageFormat::Gif,
		TileFormat::JPG => ImageFormat::Jpeg,
		TileFormat::PNG => ImageFormat::Png,
		TileFormat::WEBP => ImageFormat::WebP,
		TileFormat::PBF => bail!("vector tiles cannot be decoded as rasters"),
	})
}

/// Decodes a tile buffer into a raster, sniffing the format from the bytes.
pub fn decode_raster(data: &[u8]) -> Result<DynamicImage> {
	let format = image_format(TileFormat::from_bytes(data))?;
	image::load_from_memory_with_format(data, format).context("decoding tile raster")
}

/// Pixel dimensions of a raster tile buffer.
pub fn raster_size(data: &[u8]) -> Result<(u32, u32)> {
	let raster = decode_raster(data)?;
	Ok((raster.width(), raster.height()))
}

/// Encodes a raster to the requested tile format.
///
/// JPEG has no alpha channel, so the raster is flattened to RGB first;
/// everything else keeps RGBA.
pub fn encode_raster(raster: &DynamicImage, format: TileFormat) -> Result<Vec<u8>> {
	let format = image_format(format)?;
	let mut buffer = Cursor::new(Vec::new());
	match format {
		ImageFormat::Jpeg => DynamicImage::ImageRgb8(raster.to_rgb8()).write_to(&mut buffer, format)?,
		_ => DynamicImage::ImageRgba8(raster.to_rgba8()).write_to(&mut buffer, format)?,
	}
	Ok(buffer.into_inner())
}

/// A `width × height` tile filled with one RGBA color, encoded as PNG.
///
/// Shared test fixture for the storage and cache crates.
pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
	let raster = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(rgba)));
	encode_raster(&raster, TileFormat::PNG).unwrap()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(TileFormat::PNG)]
	#[case(TileFormat::JPG)]
	#[case(TileFormat::WEBP)]
	fn encode_decode(#[case] format: TileFormat) {
		let raster = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 255])));
		let data = encode_raster(&raster, format).unwrap();

		// the encoded buffer sniffs back to its format
		assert_eq!(TileFormat::from_bytes(&data), format);

		let decoded = decode_raster(&data).unwrap();
		assert_eq!((decoded.width(), decoded.height()), (8, 8));
	}

	#[test]
	fn pbf_is_not_a_raster() {
		assert!(encode_raster(&DynamicImage::new_rgba8(1, 1), TileFormat::PBF).is_err());
		assert!(decode_raster(&[0x1F, 0x8B, 0x00]).is_err());
	}

	#[test]
	fn solid_tile_size() {
		let data = solid_png(256, 128, [0, 0, 0, 255]);
		assert_eq!(raster_size(&data).unwrap(), (256, 128));
	}
}
