use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Tag selecting the storage back-end of a source. Persisted in the seed
/// and cleanup documents as `storeType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
	Mbtiles,
	Xyz,
	Pg,
}

impl StoreType {
	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"mbtiles" => StoreType::Mbtiles,
			"xyz" => StoreType::Xyz,
			"pg" | "postgres" | "postgresql" => StoreType::Pg,
			_ => bail!("unknown store type '{value}', expected 'mbtiles', 'xyz' or 'pg'"),
		})
	}

	/// Directory class under `$DATA_DIR/caches/` holding this back-end.
	pub fn cache_dir_name(&self) -> &'static str {
		match self {
			StoreType::Mbtiles => "mbtiles",
			StoreType::Xyz => "xyzs",
			StoreType::Pg => "pgs",
		}
	}
}

impl Display for StoreType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			StoreType::Mbtiles => "mbtiles",
			StoreType::Xyz => "xyz",
			StoreType::Pg => "pg",
		})
	}
}
