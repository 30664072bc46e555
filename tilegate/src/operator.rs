//! The coverage operator: drives a per-tile task over a tile-bounds list
//! at bounded concurrency.
//!
//! Dispatch order is deterministic — ranges in list order, then y inside x
//! inside each range — while completion order is arbitrary. Admission is a
//! polling gate on an active-task counter; per-tile failures are logged and
//! never abort the run. An optional cancellation flag stops dispatch at the
//! next admission point and lets outstanding tasks finish.

use anyhow::{Result, ensure};
use log::{debug, warn};
use std::sync::{
	Arc,
	atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
use std::time::Duration;
use tilegate_core::{TileBounds, TileCoord, progress::Progress};
use tokio::task::JoinSet;

/// Admission gate poll interval.
pub const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Concurrency bounds of one operator run.
pub const MAX_CONCURRENCY: usize = 1024;

/// Counters of one finished operator run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatorReport {
	/// Tile count of the bounds list.
	pub total: u64,
	/// Tasks actually issued (equals `total` unless cancelled).
	pub dispatched: u64,
	/// Tasks that terminated with an error.
	pub failed: u64,
}

/// Runs `task` for every tile of `bounds` with at most `concurrency`
/// tasks in flight.
pub async fn run_coverage_operator<F, Fut>(
	id: &str,
	bounds: &TileBounds,
	concurrency: usize,
	cancel: Option<Arc<AtomicBool>>,
	task: F,
) -> Result<OperatorReport>
where
	F: Fn(TileCoord) -> Fut,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	ensure!(
		(1..=MAX_CONCURRENCY).contains(&concurrency),
		"concurrency ({concurrency}) must be within 1..={MAX_CONCURRENCY}"
	);

	let total = bounds.total();
	debug!("operator '{id}': {total} tiles over {} ranges", bounds.ranges.len());
	if total == 0 {
		return Ok(OperatorReport::default());
	}

	let progress = Arc::new(Progress::new(&format!("operator '{id}'"), total));
	let active = Arc::new(AtomicUsize::new(0));
	let completed = Arc::new(AtomicU64::new(0));
	let failed = Arc::new(AtomicU64::new(0));
	let mut dispatched = 0u64;
	let mut join_set: JoinSet<()> = JoinSet::new();

	'dispatch: for range in &bounds.ranges {
		for coord in range.iter_coords() {
			// admission gate: wait for a free slot
			while active.load(Ordering::Acquire) >= concurrency {
				while join_set.try_join_next().is_some() {}
				tokio::time::sleep(ADMISSION_POLL_INTERVAL).await;
			}
			if cancel.as_ref().is_some_and(|cancel| cancel.load(Ordering::Acquire)) {
				debug!("operator '{id}': cancelled after {dispatched}/{total} tiles");
				break 'dispatch;
			}

			active.fetch_add(1, Ordering::AcqRel);
			dispatched += 1;

			let future = task(coord);
			let id = id.to_string();
			let active = Arc::clone(&active);
			let completed = Arc::clone(&completed);
			let failed = Arc::clone(&failed);
			let progress = Arc::clone(&progress);
			join_set.spawn(async move {
				let result = future.await;
				let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
				progress.inc(1);
				if let Err(error) = result {
					failed.fetch_add(1, Ordering::AcqRel);
					warn!("operator '{id}': tile {coord} failed ({done}/{total}): {error:#}");
				}
				active.fetch_sub(1, Ordering::AcqRel);
			});
		}
	}

	// outstanding tasks are always allowed to finish
	while join_set.join_next().await.is_some() {}
	progress.finish();

	Ok(OperatorReport {
		total,
		dispatched,
		failed: failed.load(Ordering::Acquire),
	})
}
