//! The common contract of the three tile back-ends.
//!
//! All public operations address tiles in XYZ; each back-end converts to
//! its canonical persisted scheme on the boundary (MBTiles: TMS rows, XYZ
//! directory and PostgreSQL: XYZ rows).

use crate::StoreType;
use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, time::Duration};
use tilegate_core::{Coverage, TileCoord, TileHeaders, TileMetadata, error::GatewayError};

/// Database/read timeout used when an operation carries no explicit one.
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(30);

/// A served tile: its bytes, the magic-sniffed headers and the write
/// timestamp (epoch milliseconds) when the back-end knows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileReply {
	pub data: Vec<u8>,
	pub headers: TileHeaders,
	pub created: Option<u64>,
}

impl TileReply {
	pub fn new(data: Vec<u8>) -> TileReply {
		TileReply {
			headers: TileHeaders::from_bytes(&data),
			data,
			created: None,
		}
	}

	#[must_use]
	pub fn with_created(mut self, created: Option<u64>) -> TileReply {
		self.created = created;
		self
	}
}

/// One per-tile bookkeeping value from [`TileStore::extra_info`].
#[derive(Clone, Debug, PartialEq)]
pub enum ExtraInfo {
	Hash(String),
	Created(u64),
}

impl ExtraInfo {
	pub fn as_hash(&self) -> Option<&str> {
		match self {
			ExtraInfo::Hash(hash) => Some(hash),
			ExtraInfo::Created(_) => None,
		}
	}

	pub fn as_created(&self) -> Option<u64> {
		match self {
			ExtraInfo::Created(created) => Some(*created),
			ExtraInfo::Hash(_) => None,
		}
	}
}

/// Map from `"z/x/y"` (XYZ) to the requested bookkeeping value. Only tiles
/// whose value is non-null appear.
pub type ExtraInfoMap = HashMap<String, ExtraInfo>;

/// The hex MD5 of a tile buffer, as stored in the `hash` column.
pub fn tile_hash(data: &[u8]) -> String {
	format!("{:x}", md5::compute(data))
}

/// The unified contract over the tile back-ends.
#[async_trait]
pub trait TileStore: Send + Sync {
	fn store_type(&self) -> StoreType;

	fn id(&self) -> &str;

	/// Reads one tile. A missing row fails with [`GatewayError::TileNotFound`].
	async fn get_tile(&self, coord: &TileCoord) -> Result<TileReply>;

	/// Upserts one tile, recomputing `hash` and `created`.
	async fn create_tile(&self, coord: &TileCoord, data: &[u8], timeout: Duration) -> Result<()>;

	/// Deletes one tile by key. Deleting a missing tile is a no-op.
	async fn remove_tile(&self, coord: &TileCoord, timeout: Duration) -> Result<()>;

	/// Fetches `created` (or `hash` when `want_created` is false) for every
	/// tile inside the coverages, in one query.
	async fn extra_info(&self, coverages: &[Coverage], want_created: bool) -> Result<ExtraInfoMap>;

	/// Backfills missing `hash`/`created` values; returns the repaired count.
	async fn calculate_extra_info(&self) -> Result<u64>;

	/// The source metadata, reconstructed from the tiles where absent.
	async fn metadata(&self) -> Result<TileMetadata>;

	/// Merges `patch` into the stored metadata.
	async fn update_metadata(&self, patch: &TileMetadata, timeout: Duration) -> Result<()>;

	async fn count_tiles(&self) -> Result<u64>;

	/// Stored tile payload bytes.
	async fn size_bytes(&self) -> Result<u64>;

	/// Reclaims space. Explicit only; never an implicit post-clean step.
	async fn compact(&self) -> Result<()>;

	/// Housekeeping after a clean run; the XYZ back-end prunes emptied tile
	/// directories here.
	async fn finish_clean(&self) -> Result<()> {
		Ok(())
	}

	/// Builds pyramid overviews down from the current maxzoom.
	async fn add_overviews(&self, _concurrency: usize, _tile_size: u32) -> Result<()> {
		Err(
			GatewayError::UnsupportedOperation(format!("add_overviews on {} store", self.store_type()))
				.into(),
		)
	}

	/// Releases the source. Further calls are undefined.
	async fn close(&self) -> Result<()> {
		Ok(())
	}
}
