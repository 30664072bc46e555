//! The persisted seed and cleanup documents.
//!
//! `seed.json` and `cleanup.json` live under the data root and are loaded
//! at startup. Parsing and validation failures are fatal for the document
//! and surface as [`GatewayError::SchemaInvalid`]: a malformed source must
//! not silently seed or clean the wrong tiles. Anti-meridian-crossing
//! bounding boxes are rejected here, at load time.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, time::Duration};
use tilegate_core::{Coverage, TileMetadata, TileScheme, error::GatewayError, utils::parse_time_threshold};
use tilegate_store::{StoreType, validate_source_id};

use crate::operator::MAX_CONCURRENCY;

pub const SEED_FILE_NAME: &str = "seed.json";
pub const CLEANUP_FILE_NAME: &str = "cleanup.json";

fn default_max_try() -> u32 {
	5
}

fn default_timeout_ms() -> u64 {
	60_000
}

fn default_concurrency() -> usize {
	256
}

/// One tile source in `seed.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedSource {
	pub store_type: StoreType,
	#[serde(default)]
	pub scheme: TileScheme,
	pub coverages: Vec<Coverage>,
	#[serde(default)]
	pub metadata: TileMetadata,
	/// Origin URL template with `{z}`, `{x}`, `{y}` placeholders.
	pub url: String,
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	/// Tiles newer than this threshold are not re-fetched.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_before: Option<String>,
	#[serde(default = "default_max_try")]
	pub max_try: u32,
	/// Per-attempt origin timeout and store write timeout, in milliseconds.
	#[serde(default = "default_timeout_ms")]
	pub timeout: u64,
	#[serde(default = "default_concurrency")]
	pub concurrency: usize,
	#[serde(default)]
	pub store_transparent: bool,
}

impl SeedSource {
	pub fn timeout_duration(&self) -> Duration {
		Duration::from_millis(self.timeout)
	}

	fn validate(&self, id: &str) -> Result<()> {
		validate_source_id(id)?;
		ensure!(!self.coverages.is_empty(), "source '{id}' has no coverages");
		for coverage in &self.coverages {
			coverage.validate()?;
		}
		ensure!(
			(1..=MAX_CONCURRENCY).contains(&self.concurrency),
			"source '{id}': concurrency ({}) must be within 1..={MAX_CONCURRENCY}",
			self.concurrency
		);
		ensure!(self.max_try >= 1, "source '{id}': maxTry must be >= 1");
		ensure!(self.timeout > 0, "source '{id}': timeout must be > 0");
		ensure!(
			self.url.contains("{z}") && self.url.contains("{x}") && self.url.contains("{y}"),
			"source '{id}': url must contain {{z}}, {{x}} and {{y}}"
		);
		if let Some(refresh_before) = &self.refresh_before {
			parse_time_threshold(refresh_before)
				.with_context(|| format!("source '{id}': invalid refreshBefore"))?;
		}
		self.metadata.validate()?;
		Ok(())
	}
}

/// One tile source in `cleanup.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CleanupSource {
	pub store_type: StoreType,
	#[serde(default)]
	pub scheme: TileScheme,
	pub coverages: Vec<Coverage>,
	/// Tiles strictly older than this are removed; tiles without a
	/// timestamp count as old. Absent means "everything".
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub clean_up_before: Option<String>,
	#[serde(default = "default_concurrency")]
	pub concurrency: usize,
}

impl CleanupSource {
	fn validate(&self, id: &str) -> Result<()> {
		validate_source_id(id)?;
		for coverage in &self.coverages {
			coverage.validate()?;
		}
		ensure!(
			(1..=MAX_CONCURRENCY).contains(&self.concurrency),
			"source '{id}': concurrency ({}) must be within 1..={MAX_CONCURRENCY}",
			self.concurrency
		);
		if let Some(clean_up_before) = &self.clean_up_before {
			parse_time_threshold(clean_up_before)
				.with_context(|| format!("source '{id}': invalid cleanUpBefore"))?;
		}
		Ok(())
	}
}

/// One companion asset entry in `cleanup.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssetCleanup {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub clean_up_before: Option<String>,
}

/// The `seed.json` document. The companion asset sections are carried
/// opaquely; their seeding is outside the cache engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDocument {
	#[serde(default)]
	pub styles: BTreeMap<String, serde_json::Value>,
	#[serde(default)]
	pub geojsons: BTreeMap<String, serde_json::Value>,
	#[serde(default)]
	pub sprites: BTreeMap<String, serde_json::Value>,
	#[serde(default)]
	pub fonts: BTreeMap<String, serde_json::Value>,
	#[serde(default)]
	pub datas: BTreeMap<String, SeedSource>,
}

impl SeedDocument {
	pub fn validate(&self) -> Result<()> {
		for (id, source) in &self.datas {
			source.validate(id)?;
		}
		Ok(())
	}
}

/// The `cleanup.json` document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupDocument {
	#[serde(default)]
	pub styles: BTreeMap<String, AssetCleanup>,
	#[serde(default)]
	pub geojsons: BTreeMap<String, AssetCleanup>,
	#[serde(default)]
	pub sprites: BTreeMap<String, AssetCleanup>,
	#[serde(default)]
	pub fonts: BTreeMap<String, AssetCleanup>,
	#[serde(default)]
	pub datas: BTreeMap<String, CleanupSource>,
}

impl CleanupDocument {
	pub fn validate(&self) -> Result<()> {
		for (id, source) in &self.datas {
			source.validate(id)?;
		}
		for section in [&self.styles, &self.geojsons, &self.sprites, &self.fonts] {
			for (id, asset) in section {
				validate_source_id(id)?;
				if let Some(clean_up_before) = &asset.clean_up_before {
					parse_time_threshold(clean_up_before)
						.with_context(|| format!("asset '{id}': invalid cleanUpBefore"))?;
				}
			}
		}
		Ok(())
	}
}

fn schema_invalid(error: anyhow::Error) -> anyhow::Error {
	GatewayError::SchemaInvalid(format!("{error:#}")).into()
}

fn load_document<T>(path: &Path) -> Result<T>
where
	T: serde::de::DeserializeOwned,
{
	let text = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
	serde_json::from_str(&text)
		.with_context(|| format!("parsing {path:?}"))
		.map_err(schema_invalid)
}

/// Loads and validates `seed.json` from the data root.
pub fn load_seed_document(data_dir: &Path) -> Result<SeedDocument> {
	let document: SeedDocument = load_document(&data_dir.join(SEED_FILE_NAME))?;
	document.validate().map_err(schema_invalid)?;
	Ok(document)
}

/// Loads and validates `cleanup.json` from the data root.
pub fn load_cleanup_document(data_dir: &Path) -> Result<CleanupDocument> {
	let document: CleanupDocument = load_document(&data_dir.join(CLEANUP_FILE_NAME))?;
	document.validate().map_err(schema_invalid)?;
	Ok(document)
}
