//! Seeding: batch-populate a cache from its origin over a coverage list.
//!
//! Before dispatch the seeder loads the per-tile bookkeeping for the
//! coverages: with `refreshBefore` set, tiles already fresher than the
//! threshold are skipped without a fetch; after a fetch, a tile whose MD5
//! matches the stored hash is not rewritten.

use crate::{
	config::{SeedDocument, SeedSource},
	operator::{OperatorReport, run_coverage_operator},
	origin::OriginClient,
};
use anyhow::{Context, Result};
use log::info;
use std::sync::{Arc, atomic::AtomicBool};
use tilegate_core::{TileBounds, TileScheme, utils::parse_time_threshold};
use tilegate_image::is_fully_transparent_png;
use tilegate_store::{ExtraInfo, ExtraInfoMap, StoreOptions, TileStore, open_store, tile_hash};

/// Result of seeding one source.
#[derive(Clone, Debug)]
pub struct SeedOutcome {
	pub id: String,
	pub report: OperatorReport,
	/// Tiles present in the store after the run.
	pub actual: u64,
	/// Coverage cardinality: what a complete pyramid slice would hold.
	pub expect: u64,
}

pub async fn seed_source(
	id: &str,
	source: &SeedSource,
	options: &StoreOptions,
	cancel: Option<Arc<AtomicBool>>,
) -> Result<SeedOutcome> {
	let store: Arc<dyn TileStore> = Arc::from(open_store(id, source.store_type, options).await?);
	let timeout = source.timeout_duration();

	store
		.update_metadata(&source.metadata, timeout)
		.await
		.context("writing source metadata")?;

	let bounds = TileBounds::from_coverages(&source.coverages, source.scheme, None)?;
	let headers: Vec<(String, String)> = source
		.headers
		.iter()
		.map(|(name, value)| (name.clone(), value.clone()))
		.collect();
	let origin = Arc::new(OriginClient::new(&source.url, &headers, source.max_try, timeout)?);

	let refresh_before = source
		.refresh_before
		.as_deref()
		.map(parse_time_threshold)
		.transpose()?;
	let fresh: Arc<ExtraInfoMap> = Arc::new(if refresh_before.is_some() {
		store.extra_info(&source.coverages, true).await?
	} else {
		ExtraInfoMap::new()
	});
	let hashes: Arc<ExtraInfoMap> = Arc::new(store.extra_info(&source.coverages, false).await?);

	let scheme = source.scheme;
	let store_transparent = source.store_transparent;
	let report = run_coverage_operator(id, &bounds, source.concurrency, cancel, |coord| {
		let store = Arc::clone(&store);
		let origin = Arc::clone(&origin);
		let fresh = Arc::clone(&fresh);
		let hashes = Arc::clone(&hashes);
		async move {
			// the operator iterates in the source scheme; storage keys are XYZ
			let store_coord = match scheme {
				TileScheme::Xyz => coord,
				TileScheme::Tms => coord.flipped_y(),
			};
			let key = store_coord.to_string();

			if let Some(threshold) = refresh_before {
				let created = fresh.get(&key).and_then(ExtraInfo::as_created);
				if created.is_some_and(|created| created >= threshold) {
					return Ok(());
				}
			}

			let Some(data) = origin.fetch_tile(&coord).await? else {
				return Ok(());
			};
			if hashes.get(&key).and_then(ExtraInfo::as_hash) == Some(tile_hash(&data).as_str()) {
				return Ok(());
			}
			if !store_transparent && is_fully_transparent_png(&data) {
				return Ok(());
			}
			store.create_tile(&store_coord, &data, timeout).await
		}
	})
	.await?;

	let actual = store.count_tiles().await?;
	let expect = bounds.total();
	store.close().await?;
	info!("seeded '{id}': {actual}/{expect} tiles present, {} failures", report.failed);

	Ok(SeedOutcome {
		id: id.to_string(),
		report,
		actual,
		expect,
	})
}

/// Seeds every configured source, or only `ids` when non-empty.
pub async fn run_seed(
	document: &SeedDocument,
	ids: &[String],
	options: &StoreOptions,
	cancel: Option<Arc<AtomicBool>>,
) -> Result<Vec<SeedOutcome>> {
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
		outcomes.push(seed_source(id, source, options, cancel.clone()).await?);
	}
	Ok(outcomes)
}
