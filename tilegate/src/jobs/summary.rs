//! Inventory reports: per-class service totals and per-source seed
//! expectations.

use crate::config::SeedDocument;
use anyhow::Result;
use log::warn;
use tilegate_core::TileBounds;
use tilegate_store::{
	ClassSummary, StoreOptions, StoreType, asset_class_summaries, open_store, tile_class_summaries,
};

/// `actual` vs `expect` of one seeded source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedExpectation {
	pub id: String,
	/// Tiles currently in the store.
	pub actual: u64,
	/// Sum of the coverage cardinalities.
	pub expect: u64,
}

/// Service mode: counts and byte sizes per back-end class and per asset
/// class, over the catalog of configured sources.
pub async fn service_summary(
	document: &SeedDocument,
	options: &StoreOptions,
) -> Result<(Vec<ClassSummary>, Vec<ClassSummary>)> {
	let sources: Vec<(String, StoreType)> = document
		.datas
		.iter()
		.map(|(id, source)| (id.clone(), source.store_type))
		.collect();

	let tiles = tile_class_summaries(&sources, options).await?;
	let assets = asset_class_summaries(options)?;
	Ok((tiles, assets))
}

/// Seed mode: per source, how many tiles exist versus how many the
/// configured coverages span.
pub async fn seed_summary(document: &SeedDocument, options: &StoreOptions) -> Result<Vec<SeedExpectation>> {
	let mut expectations = Vec::new();
	let mut options = options.clone();
	options.create_if_missing = false;

	for (id, source) in &document.datas {
		let expect = TileBounds::from_coverages(&source.coverages, source.scheme, None)?.total();
		let actual = match open_store(id, source.store_type, &options).await {
			Ok(store) => {
				let count = store.count_tiles().await?;
				store.close().await?;
				count
			}
			Err(error) => {
				warn!("source '{id}' is not readable, reporting 0 tiles: {error}");
				0
			}
		};
		expectations.push(SeedExpectation {
			id: id.clone(),
			actual,
			expect,
		});
	}
	Ok(expectations)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tilegate_core::TileCoord;

	fn document_with(id: &str, url: &str) -> SeedDocument {
		serde_json::from_value(serde_json::json!({
			"datas": {
				id: {
					"storeType": "mbtiles",
					"coverages": [{"zoom": 1, "bbox": [-180.0, -85.0, 180.0, 85.0]}],
					"url": url,
				}
			}
		}))
		.unwrap()
	}

	#[tokio::test]
	async fn seed_summary_reports_actual_vs_expect() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let options = StoreOptions::new(temp_dir.path());
		let document = document_with("base", "https://example.com/{z}/{x}/{y}.png");

		// half-seeded: 2 of the 4 world tiles at z=1
		let store = open_store("base", StoreType::Mbtiles, &options).await?;
		store
			.create_tile(&TileCoord::new(1, 0, 0)?, b"ab", Duration::from_secs(5))
			.await?;
		store
			.create_tile(&TileCoord::new(1, 1, 0)?, b"cd", Duration::from_secs(5))
			.await?;
		store.close().await?;

		let expectations = seed_summary(&document, &options).await?;
		assert_eq!(
			expectations,
			vec![SeedExpectation {
				id: "base".to_string(),
				actual: 2,
				expect: 4
			}]
		);

		let (tiles, assets) = service_summary(&document, &options).await?;
		let mbtiles = tiles.iter().find(|summary| summary.class == "mbtiles").unwrap();
		assert_eq!(mbtiles.sources, 1);
		assert_eq!(mbtiles.tiles, 2);
		assert_eq!(assets.len(), 4);
		Ok(())
	}

	#[tokio::test]
	async fn unseeded_source_reports_zero() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let options = StoreOptions::new(temp_dir.path());
		let document = document_with("ghost", "https://example.com/{z}/{x}/{y}.png");

		let expectations = seed_summary(&document, &options).await?;
		assert_eq!(expectations[0].actual, 0);
		assert_eq!(expectations[0].expect, 4);
		Ok(())
	}
}
