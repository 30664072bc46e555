//! Inventory: counts and byte sizes per back-end class and per companion
//! asset class.

use crate::{StoreOptions, StoreType, open_store};
use anyhow::Result;
use log::warn;
use std::{fs, path::Path};

/// Totals of one class of the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassSummary {
	pub class: String,
	pub sources: u64,
	pub tiles: u64,
	pub bytes: u64,
}

/// Companion asset classes stored beside the tile caches.
pub const ASSET_CLASSES: [&str; 4] = ["styles", "geojsons", "sprites", "fonts"];

fn walk_files(dir: &Path, files: &mut u64, bytes: &mut u64) -> Result<()> {
	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_dir() {
			walk_files(&path, files, bytes)?;
		} else {
			*files += 1;
			*bytes += fs::metadata(&path)?.len();
		}
	}
	Ok(())
}

/// Per-back-end totals over the configured tile sources.
///
/// Sources that fail to open are logged and skipped, so one broken source
/// does not hide the rest of the inventory.
pub async fn tile_class_summaries(
	sources: &[(String, StoreType)],
	options: &StoreOptions,
) -> Result<Vec<ClassSummary>> {
	let mut summaries: Vec<ClassSummary> = [StoreType::Mbtiles, StoreType::Xyz, StoreType::Pg]
		.iter()
		.map(|store_type| ClassSummary {
			class: store_type.to_string(),
			..ClassSummary::default()
		})
		.collect();

	let mut options = options.clone();
	options.create_if_missing = false;

	for (id, store_type) in sources {
		let store = match open_store(id, *store_type, &options).await {
			Ok(store) => store,
			Err(error) => {
				warn!("skipping source '{id}' in summary: {error}");
				continue;
			}
		};
		let summary = summaries
			.iter_mut()
			.find(|summary| summary.class == store_type.to_string())
			.unwrap();
		summary.sources += 1;
		summary.tiles += store.count_tiles().await?;
		summary.bytes += store.size_bytes().await?;
		store.close().await?;
	}

	Ok(summaries)
}

/// File counts and sizes of the companion asset classes
/// (`styles`, `geojsons`, `sprites`, `fonts`).
pub fn asset_class_summaries(options: &StoreOptions) -> Result<Vec<ClassSummary>> {
	let caches = options.caches_dir();
	let mut summaries = Vec::new();

	for class in ASSET_CLASSES {
		let mut summary = ClassSummary {
			class: class.to_string(),
			..ClassSummary::default()
		};
		let dir = caches.join(class);
		if dir.is_dir() {
			for entry in fs::read_dir(&dir)? {
				let path = entry?.path();
				if path.is_dir() {
					summary.sources += 1;
					walk_files(&path, &mut summary.tiles, &mut summary.bytes)?;
				}
			}
		}
		summaries.push(summary);
	}

	Ok(summaries)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tilegate_core::TileCoord;

	#[tokio::test]
	async fn counts_tiles_and_assets() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let options = StoreOptions::new(temp_dir.path());

		// one mbtiles source with two tiles
		let store = open_store("base", StoreType::Mbtiles, &options).await?;
		store
			.create_tile(&TileCoord::new(0, 0, 0)?, b"abcd", Duration::from_secs(5))
			.await?;
		store
			.create_tile(&TileCoord::new(1, 1, 1)?, b"efgh", Duration::from_secs(5))
			.await?;
		store.close().await?;

		// one style document
		let style_dir = options.caches_dir().join("styles").join("bright");
		fs::create_dir_all(&style_dir)?;
		fs::write(style_dir.join("style.json"), b"{}")?;

		let sources = vec![
			("base".to_string(), StoreType::Mbtiles),
			("ghost".to_string(), StoreType::Xyz), // never created; skipped
		];
		let summaries = tile_class_summaries(&sources, &options).await?;
		let mbtiles = summaries.iter().find(|summary| summary.class == "mbtiles").unwrap();
		assert_eq!(mbtiles.sources, 1);
		assert_eq!(mbtiles.tiles, 2);
		assert_eq!(mbtiles.bytes, 8);
		let xyz = summaries.iter().find(|summary| summary.class == "xyz").unwrap();
		assert_eq!(xyz.sources, 0);

		let assets = asset_class_summaries(&options)?;
		let styles = assets.iter().find(|summary| summary.class == "styles").unwrap();
		assert_eq!(styles.sources, 1);
		assert_eq!(styles.tiles, 1);
		assert_eq!(styles.bytes, 2);
		Ok(())
	}
}
