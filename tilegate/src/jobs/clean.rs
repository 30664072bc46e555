//! Cleanup: remove tiles older than a threshold over a coverage list, and
//! expired companion assets.
//!
//! A tile is removed when its `created` is strictly older than the
//! threshold; a tile without a timestamp counts as old. Removal of a
//! missing tile is a no-op, so the operator can simply attempt every tile
//! of the coverage that is not provably fresh.

use crate::{
	config::{AssetCleanup, CleanupDocument, CleanupSource},
	operator::{OperatorReport, run_coverage_operator},
};
use anyhow::{Context, Result};
use log::info;
use std::{
	collections::BTreeMap,
	fs,
	path::Path,
	sync::{Arc, atomic::AtomicBool},
	time::{Duration, UNIX_EPOCH},
};
use tilegate_core::{
	TileBounds, TileScheme,
	utils::{now_millis, parse_time_threshold, remove_file_with_lock},
};
use tilegate_store::{ExtraInfo, StoreOptions, TileStore, open_store};

const ASSET_REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of cleaning one tile source.
#[derive(Clone, Debug)]
pub struct CleanOutcome {
	pub id: String,
	pub report: OperatorReport,
	/// Tiles present before minus after the run.
	pub removed: u64,
}

pub async fn clean_source(
	id: &str,
	source: &CleanupSource,
	options: &StoreOptions,
	cancel: Option<Arc<AtomicBool>>,
) -> Result<CleanOutcome> {
	let store: Arc<dyn TileStore> = Arc::from(open_store(id, source.store_type, options).await?);

	let threshold = match &source.clean_up_before {
		Some(clean_up_before) => parse_time_threshold(clean_up_before)?,
		// no threshold: everything inside the coverages goes
		None => now_millis() + 1,
	};

	let bounds = TileBounds::from_coverages(&source.coverages, source.scheme, None)?;
	let created: Arc<tilegate_store::ExtraInfoMap> =
		Arc::new(store.extra_info(&source.coverages, true).await?);
	let before = store.count_tiles().await?;

	let scheme = source.scheme;
	let timeout = options.timeout;
	let report = run_coverage_operator(id, &bounds, source.concurrency, cancel, |coord| {
		let store = Arc::clone(&store);
		let created = Arc::clone(&created);
		async move {
			let store_coord = match scheme {
				TileScheme::Xyz => coord,
				TileScheme::Tms => coord.flipped_y(),
			};
			let key = store_coord.to_string();
			// tiles at or past the threshold survive; everything else —
			// old, timestamp-less or unknown to the index — is attempted
			let fresh = created
				.get(&key)
				.and_then(ExtraInfo::as_created)
				.is_some_and(|created| created >= threshold);
			if fresh {
				return Ok(());
			}
			store.remove_tile(&store_coord, timeout).await
		}
	})
	.await?;

	store.finish_clean().await?;
	let after = store.count_tiles().await?;
	store.close().await?;

	let removed = before.saturating_sub(after);
	info!("cleaned '{id}': removed {removed} tiles, {} failures", report.failed);

	Ok(CleanOutcome {
		id: id.to_string(),
		report,
		removed,
	})
}

/// Removes companion asset files (styles, geojsons, sprites, fonts) older
/// than their configured threshold, pruning emptied directories.
pub async fn clean_assets(document: &CleanupDocument, options: &StoreOptions) -> Result<u64> {
	let caches = options.caches_dir();
	let mut removed = 0u64;

	let sections: [(&str, &BTreeMap<String, AssetCleanup>); 4] = [
		("styles", &document.styles),
		("geojsons", &document.geojsons),
		("sprites", &document.sprites),
		("fonts", &document.fonts),
	];
	for (class, section) in sections {
		for (id, asset) in section {
			let threshold = match &asset.clean_up_before {
				Some(clean_up_before) => parse_time_threshold(clean_up_before)?,
				None => now_millis() + 1,
			};
			let dir = caches.join(class).join(id);
			if dir.is_dir() {
				removed += clean_asset_dir(&dir, threshold).await?;
				let _ = fs::remove_dir(&dir);
			}
		}
	}
	Ok(removed)
}

async fn clean_asset_dir(dir: &Path, threshold: u64) -> Result<u64> {
	let mut removed = 0u64;
	for entry in fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))? {
		let path = entry?.path();
		if path.is_dir() {
			continue;
		}
		let modified = fs::metadata(&path)?
			.modified()
			.ok()
			.and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
			.map_or(0, |duration| duration.as_millis() as u64);
		if modified < threshold && remove_file_with_lock(&path, ASSET_REMOVE_TIMEOUT).await? {
			removed += 1;
		}
	}
	Ok(removed)
}

/// Cleans every configured source, or only `ids` when non-empty, then the
/// companion assets.
pub async fn run_cleanup(
	document: &CleanupDocument,
	ids: &[String],
	options: &StoreOptions,
	cancel: Option<Arc<AtomicBool>>,
) -> Result<Vec<CleanOutcome>> {
	let mut outcomes = Vec::new();
	for (id, source) in &document.datas {
		if !ids.is_empty() && !ids.contains(id) {
			continue;
		}
		if cancel
			.as_ref()
			.is_some_and(|cancel| cancel.load(std::sync::atomic::Ordering::Acquire))
		{
			break;
		}
		outcomes.push(clean_source(id, source, options, cancel.clone()).await?);
	}
	if ids.is_empty() {
		clean_assets(document, options).await?;
	}
	Ok(outcomes)
}
