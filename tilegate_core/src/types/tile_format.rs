//! Tile formats and magic-number sniffing.
//!
//! Stored tiles are opaque byte buffers; the format is never persisted as a
//! column but derived from the first few bytes whenever headers are needed.
//! Sniffing is a pure function of the buffer prefix so it can live beside
//! the back-end contract without pulling image libraries into it.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Magic-number table for the formats crossing the HTTP boundary.
///
/// PBF carries no signature of its own; it is the fallback, with the zlib
/// (`78 9C`) and gzip (`1F 8B`) prefixes mapped to a `content-encoding`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
	GIF,
	#[serde(alias = "jpeg")]
	JPG,
	#[default]
	PBF,
	PNG,
	WEBP,
}

impl TileFormat {
	/// Derives the format from the leading bytes of a tile buffer.
	///
	/// Unknown or empty buffers fall back to `PBF`; the cache treats bytes
	/// as opaque and never rejects them.
	pub fn from_bytes(data: &[u8]) -> TileFormat {
		if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
			TileFormat::PNG
		} else if data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9]) {
			TileFormat::JPG
		} else if (data.starts_with(b"GIF87a")) || (data.starts_with(b"GIF89a")) {
			TileFormat::GIF
		} else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
			TileFormat::WEBP
		} else {
			TileFormat::PBF
		}
	}

	/// The `content-encoding` implied by the buffer prefix, for PBF bodies.
	pub fn content_encoding(data: &[u8]) -> Option<&'static str> {
		if TileFormat::from_bytes(data) != TileFormat::PBF {
			return None;
		}
		if data.starts_with(&[0x1F, 0x8B]) {
			Some("gzip")
		} else if data.starts_with(&[0x78, 0x9C]) {
			Some("deflate")
		} else {
			None
		}
	}

	pub fn content_type(&self) -> &'static str {
		match self {
			TileFormat::GIF => "image/gif",
			TileFormat::JPG => "image/jpeg",
			TileFormat::PBF => "application/x-protobuf",
			TileFormat::PNG => "image/png",
			TileFormat::WEBP => "image/webp",
		}
	}

	/// File extension without the leading dot, as used by the XYZ layout.
	pub fn extension(&self) -> &'static str {
		match self {
			TileFormat::GIF => "gif",
			TileFormat::JPG => "jpg",
			TileFormat::PBF => "pbf",
			TileFormat::PNG => "png",
			TileFormat::WEBP => "webp",
		}
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim_matches([' ', '.']) {
			"gif" => TileFormat::GIF,
			"jpeg" | "jpg" => TileFormat::JPG,
			"pbf" | "mvt" => TileFormat::PBF,
			"png" => TileFormat::PNG,
			"webp" => TileFormat::WEBP,
			_ => bail!("unknown tile format '{value}'"),
		})
	}

	pub fn from_extension(extension: &str) -> Option<TileFormat> {
		TileFormat::parse_str(extension).ok()
	}
}

impl Display for TileFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.extension())
	}
}

/// Sniffed HTTP headers for a tile body: content type plus an optional
/// content encoding for compressed PBF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileHeaders {
	pub content_type: &'static str,
	pub content_encoding: Option<&'static str>,
}

impl TileHeaders {
	pub fn from_bytes(data: &[u8]) -> TileHeaders {
		TileHeaders {
			content_type: TileFormat::from_bytes(data).content_type(),
			content_encoding: TileFormat::content_encoding(data),
		}
	}
}

/// Content types of the non-tile assets crossing the same boundary
/// (glyph and sprite payloads); kept with the tile table so the whole
/// magic-number contract lives in one place.
pub fn sniff_asset_content_type(data: &[u8]) -> &'static str {
	if data.starts_with(b"wOFF") {
		"font/woff"
	} else if data.starts_with(b"wOF2") {
		"font/woff2"
	} else if data.starts_with(b"OTTO") {
		"font/otf"
	} else if data.starts_with(&[0x00, 0x01, 0x00, 0x00]) {
		"font/ttf"
	} else {
		TileFormat::from_bytes(data).content_type()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
	const JPG: &[u8] = &[0xFF, 0xD8, 0x00, 0x11, 0xFF, 0xD9];
	const WEBP: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8 ";

	#[test]
	fn sniffing() {
		assert_eq!(TileFormat::from_bytes(PNG), TileFormat::PNG);
		assert_eq!(TileFormat::from_bytes(JPG), TileFormat::JPG);
		assert_eq!(TileFormat::from_bytes(b"GIF89a..."), TileFormat::GIF);
		assert_eq!(TileFormat::from_bytes(b"GIF87a..."), TileFormat::GIF);
		assert_eq!(TileFormat::from_bytes(WEBP), TileFormat::WEBP);
		assert_eq!(TileFormat::from_bytes(&[0x1F, 0x8B, 0x08]), TileFormat::PBF);
		assert_eq!(TileFormat::from_bytes(&[]), TileFormat::PBF);
	}

	#[test]
	fn encodings() {
		assert_eq!(TileFormat::content_encoding(&[0x1F, 0x8B, 0x08]), Some("gzip"));
		assert_eq!(TileFormat::content_encoding(&[0x78, 0x9C, 0x01]), Some("deflate"));
		assert_eq!(TileFormat::content_encoding(&[0x0A, 0x21]), None);
		// an image prefix never reports an encoding
		assert_eq!(TileFormat::content_encoding(PNG), None);
	}

	#[test]
	fn headers() {
		let headers = TileHeaders::from_bytes(PNG);
		assert_eq!(headers.content_type, "image/png");
		assert_eq!(headers.content_encoding, None);

		let headers = TileHeaders::from_bytes(&[0x1F, 0x8B, 0x08]);
		assert_eq!(headers.content_type, "application/x-protobuf");
		assert_eq!(headers.content_encoding, Some("gzip"));
	}

	#[test]
	fn extensions_roundtrip() {
		for format in [
			TileFormat::GIF,
			TileFormat::JPG,
			TileFormat::PBF,
			TileFormat::PNG,
			TileFormat::WEBP,
		] {
			assert_eq!(TileFormat::from_extension(format.extension()), Some(format));
		}
		assert_eq!(TileFormat::parse_str("jpeg").unwrap(), TileFormat::JPG);
		assert!(TileFormat::parse_str("tiff").is_err());
	}

	#[test]
	fn asset_content_types() {
		assert_eq!(sniff_asset_content_type(b"wOFFxxxx"), "font/woff");
		assert_eq!(sniff_asset_content_type(b"wOF2xxxx"), "font/woff2");
		assert_eq!(sniff_asset_content_type(b"OTTOxxxx"), "font/otf");
		assert_eq!(sniff_asset_content_type(&[0x00, 0x01, 0x00, 0x00, 0x00]), "font/ttf");
		assert_eq!(sniff_asset_content_type(PNG), "image/png");
	}
}
