//! The read-through cache protocol.
//!
//! A read is served from the local back-end when possible. A stale hit
//! (older than `refresh_before`) additionally schedules a non-blocking,
//! single-flight refresh. A miss falls through to the origin when
//! forwarding is enabled; fetched bytes are stored unless they are a fully
//! transparent PNG and `store_transparent` is off, and are served either
//! way. Concurrent misses may fetch twice; the back-end upsert keeps the
//! outcome consistent (last write wins).

use crate::origin::OriginClient;
use anyhow::Result;
use dashmap::DashMap;
use log::{debug, trace, warn};
use std::{sync::Arc, time::Duration};
use tilegate_core::{TileCoord, error::GatewayError};
use tilegate_image::is_fully_transparent_png;
use tilegate_store::{TileReply, TileStore};

/// Per-source behavior of the read-through path.
#[derive(Clone, Debug)]
pub struct CachePolicy {
	/// Fall through to the origin on a miss.
	pub forward: bool,
	/// Write fetched tiles back to the local store.
	pub store: bool,
	/// Store fully transparent PNG tiles instead of dropping them.
	pub store_transparent: bool,
	/// Hits older than this (epoch ms) trigger a background refresh.
	pub refresh_before: Option<u64>,
	pub write_timeout: Duration,
}

impl Default for CachePolicy {
	fn default() -> CachePolicy {
		CachePolicy {
			forward: true,
			store: true,
			store_transparent: false,
			refresh_before: None,
			write_timeout: Duration::from_secs(30),
		}
	}
}

pub struct TileCache {
	store: Arc<dyn TileStore>,
	origin: Option<Arc<OriginClient>>,
	policy: CachePolicy,
	inflight_refreshes: Arc<DashMap<String, ()>>,
}

impl TileCache {
	pub fn new(store: Arc<dyn TileStore>, origin: Option<Arc<OriginClient>>, policy: CachePolicy) -> TileCache {
		TileCache {
			store,
			origin,
			policy,
			inflight_refreshes: Arc::new(DashMap::new()),
		}
	}

	pub fn store(&self) -> &Arc<dyn TileStore> {
		&self.store
	}

	/// Serves one tile. `Ok(None)` means "no tile": a local miss without
	/// forwarding, or an origin that answered 204/404.
	pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<TileReply>> {
		match self.store.get_tile(coord).await {
			Ok(reply) => {
				if self.is_stale(&reply) {
					self.schedule_refresh(coord);
				}
				Ok(Some(reply))
			}
			Err(error) if GatewayError::is_not_found(&error) => {
				let Some(origin) = &self.origin else {
					return Ok(None);
				};
				if !self.policy.forward {
					return Ok(None);
				}
				fetch_and_store(&self.store, origin, &self.policy, coord).await
			}
			Err(error) => Err(error),
		}
	}

	fn is_stale(&self, reply: &TileReply) -> bool {
		match self.policy.refresh_before {
			Some(refresh_before) => reply.created.is_none_or(|created| created < refresh_before),
			None => false,
		}
	}

	/// Fire-and-forget refresh of a stale hit, de-duplicated per key.
	fn schedule_refresh(&self, coord: &TileCoord) {
		if !self.policy.forward {
			return;
		}
		let Some(origin) = &self.origin else {
			return;
		};

		let key = coord.to_string();
		match self.inflight_refreshes.entry(key.clone()) {
			dashmap::mapref::entry::Entry::Occupied(_) => return,
			dashmap::mapref::entry::Entry::Vacant(entry) => {
				entry.insert(());
			}
		}

		debug!("refreshing stale tile {coord} for '{}'", self.store.id());
		let store = Arc::clone(&self.store);
		let origin = Arc::clone(origin);
		let policy = self.policy.clone();
		let inflight = Arc::clone(&self.inflight_refreshes);
		let coord = *coord;
		tokio::spawn(async move {
			if let Err(error) = fetch_and_store(&store, &origin, &policy, &coord).await {
				warn!("background refresh of {coord} failed: {error:#}");
			}
			inflight.remove(&key);
		});
	}
}

/// Steps 3-5 of the protocol: origin fetch, transparency gate, write-back.
async fn fetch_and_store(
	store: &Arc<dyn TileStore>,
	origin: &OriginClient,
	policy: &CachePolicy,
	coord: &TileCoord,
) -> Result<Option<TileReply>> {
	let Some(data) = origin.fetch_tile(coord).await? else {
		trace!("origin has no tile {coord} for '{}'", store.id());
		return Ok(None);
	};

	if should_store(store.id(), policy, &data) {
		store.create_tile(coord, &data, policy.write_timeout).await?;
	}
	Ok(Some(TileReply::new(data)))
}

fn should_store(id: &str, policy: &CachePolicy, data: &[u8]) -> bool {
	if !policy.store {
		return false;
	}
	if !policy.store_transparent && is_fully_transparent_png(data) {
		debug!("skipping fully transparent tile for '{id}'");
		return false;
	}
	true
}
