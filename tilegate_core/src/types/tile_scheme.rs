use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Tile naming scheme. `Xyz` has its origin at the top-left, `Tms` at the
/// bottom-left: `y_tms = 2^z - 1 - y_xyz`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileScheme {
	#[default]
	Xyz,
	Tms,
}

impl TileScheme {
	/// Flips a y index between the two schemes at zoom `z`.
	///
	/// The flip is its own inverse, so this converts in either direction.
	pub fn flip_y(z: u8, y: u32) -> u32 {
		(1u32 << z) - 1 - y
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"xyz" => TileScheme::Xyz,
			"tms" => TileScheme::Tms,
			_ => bail!("unknown tile scheme '{value}', expected 'xyz' or 'tms'"),
		})
	}
}

impl Display for TileScheme {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TileScheme::Xyz => "xyz",
			TileScheme::Tms => "tms",
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flip_is_involution() {
		for z in 0..8u8 {
			let max = (1u32 << z) - 1;
			for y in [0, max / 2, max] {
				assert_eq!(TileScheme::flip_y(z, TileScheme::flip_y(z, y)), y);
			}
		}
	}

	#[test]
	fn flip_examples() {
		assert_eq!(TileScheme::flip_y(0, 0), 0);
		assert_eq!(TileScheme::flip_y(2, 2), 1);
		assert_eq!(TileScheme::flip_y(3, 0), 7);
	}

	#[test]
	fn parse() {
		assert_eq!(TileScheme::parse_str("xyz").unwrap(), TileScheme::Xyz);
		assert_eq!(TileScheme::parse_str("TMS").unwrap(), TileScheme::Tms);
		assert!(TileScheme::parse_str("wmts").is_err());
	}
}
