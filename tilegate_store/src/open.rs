//! Opening sources: the dispatch from a `StoreType` tag to a boxed
//! back-end, plus the on-disk layout under `$DATA_DIR/caches/`.

use crate::{MBTilesStore, PgStore, StoreType, TileStore, XyzStore};
use anyhow::{Context, Result, ensure};
use lazy_static::lazy_static;
use regex::Regex;
use std::{
	path::{Path, PathBuf},
	time::Duration,
};

lazy_static! {
	/// Source ids become path components, so they are strictly limited.
	static ref RE_SOURCE_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap();
}

/// How and where sources are opened.
#[derive(Clone, Debug)]
pub struct StoreOptions {
	/// Root data directory; caches live under `<data_dir>/caches/`.
	pub data_dir: PathBuf,
	/// Connection base for PostgreSQL sources (`POSTGRESQL_BASE_URI`).
	pub pg_base_uri: Option<String>,
	pub create_if_missing: bool,
	pub timeout: Duration,
}

impl StoreOptions {
	pub fn new(data_dir: &Path) -> StoreOptions {
		StoreOptions {
			data_dir: data_dir.to_path_buf(),
			pg_base_uri: std::env::var("POSTGRESQL_BASE_URI").ok(),
			create_if_missing: true,
			timeout: Duration::from_secs(30),
		}
	}

	pub fn caches_dir(&self) -> PathBuf {
		self.data_dir.join("caches")
	}

	/// `<data_dir>/caches/mbtiles/<id>/<id>.mbtiles`
	pub fn mbtiles_path(&self, id: &str) -> PathBuf {
		self
			.caches_dir()
			.join(StoreType::Mbtiles.cache_dir_name())
			.join(id)
			.join(format!("{id}.mbtiles"))
	}

	/// `<data_dir>/caches/xyzs/<id>/`
	pub fn xyz_root(&self, id: &str) -> PathBuf {
		self.caches_dir().join(StoreType::Xyz.cache_dir_name()).join(id)
	}
}

/// Checks that a source id is safe to use as a path component.
pub fn validate_source_id(id: &str) -> Result<()> {
	ensure!(
		RE_SOURCE_ID.is_match(id),
		"invalid source id '{id}': only letters, digits, '_' and '-' are allowed"
	);
	Ok(())
}

/// Opens a source, dispatching on its `StoreType` tag.
pub async fn open_store(id: &str, store_type: StoreType, options: &StoreOptions) -> Result<Box<dyn TileStore>> {
	validate_source_id(id)?;

	Ok(match store_type {
		StoreType::Mbtiles => Box::new(
			MBTilesStore::open(
				id,
				&options.mbtiles_path(id),
				options.create_if_missing,
				options.timeout,
			)
			.await?,
		),
		StoreType::Xyz => Box::new(
			XyzStore::open(id, &options.xyz_root(id), options.create_if_missing, options.timeout).await?,
		),
		StoreType::Pg => {
			let base_uri = options
				.pg_base_uri
				.as_deref()
				.context("POSTGRESQL_BASE_URI is not set but a pg source is configured")?;
			Box::new(PgStore::open(id, base_uri, options.create_if_missing, options.timeout).await?)
		}
	})
}
