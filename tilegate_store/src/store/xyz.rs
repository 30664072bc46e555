//! Tiles as files in a sharded directory layout with a SQLite side index.
//!
//! Layout: `<root>/<z>/<x>/<y>.<ext>` plus `<root>/<id>.sqlite` holding
//! `(z, x, y, hash, created)` rows and the metadata table. Files are
//! written via the locked tmp-and-rename protocol and are the source of
//! truth on read; the index only serves the bookkeeping queries and can be
//! rebuilt from the file tree at any time.

use crate::{
	DEFAULT_DB_TIMEOUT, ExtraInfo, ExtraInfoMap, StoreType, TileReply, TileStore,
	meta_rows::{metadata_to_rows, rows_to_metadata},
	tile_hash, vector_layers,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{trace, warn};
use regex::Regex;
use std::{
	collections::BTreeSet,
	fs, io,
	path::{Path, PathBuf},
	time::{Duration, UNIX_EPOCH},
};
use tilegate_core::{
	Coverage, TileBBox, TileBounds, TileCoord, TileFormat, TileMetadata, TileScheme,
	error::GatewayError,
	utils::{
		SqlitePool, create_file_with_lock, now_millis, remove_file_with_lock,
		rusqlite::{self, OptionalExtension, params},
	},
};

lazy_static! {
	/// Shape of a tile file name inside the sharded layout.
	static ref RE_TILE_FILE: Regex = Regex::new(r"^(\d+)\.(png|jpe?g|webp|gif|pbf)$").unwrap();
	static ref RE_SHARD_DIR: Regex = Regex::new(r"^\d+$").unwrap();
}

const ALL_FORMATS: [TileFormat; 5] = [
	TileFormat::PBF,
	TileFormat::PNG,
	TileFormat::JPG,
	TileFormat::WEBP,
	TileFormat::GIF,
];

pub struct XyzStore {
	id: String,
	root: PathBuf,
	pool: SqlitePool,
}

impl XyzStore {
	/// Opens (and with `create_if_missing` initialises) the directory and
	/// its side index.
	pub async fn open(id: &str, root: &Path, create_if_missing: bool, timeout: Duration) -> Result<XyzStore> {
		trace!("open xyz store '{id}' at {root:?}");

		if create_if_missing {
			fs::create_dir_all(root).with_context(|| format!("creating directory {root:?}"))?;
		} else {
			anyhow::ensure!(root.is_dir(), "xyz store directory {root:?} does not exist");
		}

		let pool = SqlitePool::open(&root.join(format!("{id}.sqlite")), create_if_missing)?;
		let store = XyzStore {
			id: id.to_string(),
			root: root.to_path_buf(),
			pool,
		};

		store
			.pool
			.call(timeout, |conn| {
				conn.execute_batch(
					"CREATE TABLE IF NOT EXISTS tiles (
						z INTEGER,
						x INTEGER,
						y INTEGER,
						hash TEXT,
						created BIGINT,
						UNIQUE (z, x, y)
					);
					CREATE TABLE IF NOT EXISTS metadata (name TEXT UNIQUE, value TEXT);",
				)
			})
			.await?;

		Ok(store)
	}

	fn tile_path(&self, coord: &TileCoord, format: TileFormat) -> PathBuf {
		self
			.root
			.join(coord.z.to_string())
			.join(coord.x.to_string())
			.join(format!("{}.{}", coord.y, format.extension()))
	}

	/// The stored file for `coord`, in any known format.
	fn find_tile_file(&self, coord: &TileCoord) -> Option<(PathBuf, TileFormat)> {
		ALL_FORMATS.into_iter().find_map(|format| {
			let path = self.tile_path(coord, format);
			path.is_file().then_some((path, format))
		})
	}

	async fn upsert_index_row(&self, coord: &TileCoord, hash: String, created: i64, timeout: Duration) -> Result<()> {
		let (z, x, y) = (i64::from(coord.z), i64::from(coord.x), i64::from(coord.y));
		self
			.pool
			.call(timeout, move |conn| {
				conn.execute(
					"INSERT INTO tiles (z, x, y, hash, created) VALUES (?1, ?2, ?3, ?4, ?5)
					ON CONFLICT (z, x, y) DO UPDATE SET hash = excluded.hash, created = excluded.created",
					params![z, x, y, hash, created],
				)
			})
			.await?;
		Ok(())
	}

	/// Every tile file in the tree, as `(coord, path)`.
	fn walk_tile_files(&self) -> Result<Vec<(TileCoord, PathBuf)>> {
		let mut files = Vec::new();

		let numeric_dirs = |dir: &Path| -> Result<Vec<(u32, PathBuf)>> {
			let mut dirs = Vec::new();
			for entry in fs::read_dir(dir)? {
				let path = entry?.path();
				let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
					continue;
				};
				if path.is_dir() && RE_SHARD_DIR.is_match(name) {
					if let Ok(index) = name.parse::<u32>() {
						dirs.push((index, path));
					}
				}
			}
			Ok(dirs)
		};

		for (z, z_dir) in numeric_dirs(&self.root)? {
			if z > u32::from(tilegate_core::MAX_ZOOM) {
				continue;
			}
			for (x, x_dir) in numeric_dirs(&z_dir)? {
				for entry in fs::read_dir(&x_dir)? {
					let path = entry?.path();
					let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
						continue;
					};
					let Some(captures) = RE_TILE_FILE.captures(name) else {
						continue;
					};
					let Ok(y) = captures[1].parse::<u32>() else {
						continue;
					};
					if let Ok(coord) = TileCoord::new(z as u8, x, y) {
						files.push((coord, path));
					}
				}
			}
		}
		Ok(files)
	}

	async fn metadata_rows(&self) -> Result<Vec<(String, String)>> {
		self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| {
				let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
				let rows = stmt
					.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
					.collect::<rusqlite::Result<Vec<_>>>()?;
				Ok(rows)
			})
			.await
	}
}

#[async_trait]
impl TileStore for XyzStore {
	fn store_type(&self) -> StoreType {
		StoreType::Xyz
	}

	fn id(&self) -> &str {
		&self.id
	}

	async fn get_tile(&self, coord: &TileCoord) -> Result<TileReply> {
		trace!("read tile {coord} from xyz '{}'", self.id);

		let Some((path, _format)) = self.find_tile_file(coord) else {
			return Err(GatewayError::TileNotFound.into());
		};
		let data = fs::read(&path).with_context(|| format!("reading {path:?}"))?;
		let created = fs::metadata(&path)
			.ok()
			.and_then(|metadata| metadata.modified().ok())
			.and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
			.map(|duration| duration.as_millis() as u64);
		Ok(TileReply::new(data).with_created(created))
	}

	async fn create_tile(&self, coord: &TileCoord, data: &[u8], timeout: Duration) -> Result<()> {
		let format = TileFormat::from_bytes(data);
		let path = self.tile_path(coord, format);

		create_file_with_lock(&path, data, timeout).await?;

		// a rewrite in a new format leaves no stale sibling behind
		for stale in ALL_FORMATS.into_iter().filter(|stale| *stale != format) {
			match fs::remove_file(self.tile_path(coord, stale)) {
				Ok(()) => {}
				Err(error) if error.kind() == io::ErrorKind::NotFound => {}
				Err(error) => return Err(error.into()),
			}
		}

		self
			.upsert_index_row(coord, tile_hash(data), now_millis() as i64, timeout)
			.await
	}

	async fn remove_tile(&self, coord: &TileCoord, timeout: Duration) -> Result<()> {
		for format in ALL_FORMATS {
			remove_file_with_lock(&self.tile_path(coord, format), timeout).await?;
		}

		let (z, x, y) = (i64::from(coord.z), i64::from(coord.x), i64::from(coord.y));
		self
			.pool
			.call(timeout, move |conn| {
				conn.execute("DELETE FROM tiles WHERE z = ?1 AND x = ?2 AND y = ?3", params![z, x, y])
			})
			.await?;
		Ok(())
	}

	async fn extra_info(&self, coverages: &[Coverage], want_created: bool) -> Result<ExtraInfoMap> {
		let bounds = TileBounds::from_coverages(coverages, TileScheme::Xyz, None)?;
		let column = if want_created { "created" } else { "hash" };

		let mut selects = Vec::new();
		for range in &bounds.ranges {
			if range.is_empty() {
				continue;
			}
			selects.push(format!(
				"SELECT z, x, y, {column} AS value FROM tiles \
				WHERE z = {z} AND x BETWEEN {x0} AND {x1} AND y BETWEEN {y0} AND {y1} \
				AND {column} IS NOT NULL",
				z = range.z,
				x0 = range.x_min(),
				x1 = range.x_max(),
				y0 = range.y_min(),
				y1 = range.y_max(),
			));
		}
		if selects.is_empty() {
			return Ok(ExtraInfoMap::new());
		}
		let sql = selects.join(" UNION ALL ");
		trace!("extra info SQL: {sql}");

		self
			.pool
			.call(DEFAULT_DB_TIMEOUT, move |conn| {
				let mut stmt = conn.prepare(&sql)?;
				let mut map = ExtraInfoMap::new();
				let mut rows = stmt.query([])?;
				while let Some(row) = rows.next()? {
					let z = row.get::<_, i64>(0)?;
					let x = row.get::<_, i64>(1)?;
					let y = row.get::<_, i64>(2)?;
					let value = if want_created {
						ExtraInfo::Created(row.get::<_, i64>(3)?.max(0) as u64)
					} else {
						ExtraInfo::Hash(row.get::<_, String>(3)?)
					};
					map.insert(format!("{z}/{x}/{y}"), value);
				}
				Ok(map)
			})
			.await
	}

	/// Rebuilds the index from the file tree: files without a (complete)
	/// index row get one, rows without a file are dropped.
	async fn calculate_extra_info(&self) -> Result<u64> {
		let files = self.walk_tile_files()?;
		let mut repaired = 0u64;

		let mut file_keys = BTreeSet::new();
		for (coord, path) in &files {
			file_keys.insert((i64::from(coord.z), i64::from(coord.x), i64::from(coord.y)));

			let (z, x, y) = (i64::from(coord.z), i64::from(coord.x), i64::from(coord.y));
			let indexed: Option<Option<String>> = self
				.pool
				.call(DEFAULT_DB_TIMEOUT, move |conn| {
					conn
						.query_row(
							"SELECT hash FROM tiles WHERE z = ?1 AND x = ?2 AND y = ?3",
							params![z, x, y],
							|row| row.get(0),
						)
						.optional()
				})
				.await?;
			if matches!(indexed, Some(Some(_))) {
				continue;
			}

			let data = fs::read(path).with_context(|| format!("reading {path:?}"))?;
			let created = fs::metadata(path)?
				.modified()
				.ok()
				.and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
				.map(|duration| duration.as_millis() as i64)
				.unwrap_or_else(|| now_millis() as i64);
			self
				.upsert_index_row(coord, tile_hash(&data), created, DEFAULT_DB_TIMEOUT)
				.await?;
			repaired += 1;
		}

		// drop index rows whose file is gone
		let rows: Vec<(i64, i64, i64)> = self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| {
				let mut stmt = conn.prepare("SELECT z, x, y FROM tiles")?;
				let rows = stmt
					.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
					.collect::<rusqlite::Result<Vec<_>>>()?;
				Ok(rows)
			})
			.await?;
		for key in rows {
			if !file_keys.contains(&key) {
				self
					.pool
					.call(DEFAULT_DB_TIMEOUT, move |conn| {
						conn.execute(
							"DELETE FROM tiles WHERE z = ?1 AND x = ?2 AND y = ?3",
							params![key.0, key.1, key.2],
						)
					})
					.await?;
				repaired += 1;
			}
		}

		trace!("repaired {repaired} index rows in xyz '{}'", self.id);
		Ok(repaired)
	}

	async fn metadata(&self) -> Result<TileMetadata> {
		let mut meta = rows_to_metadata(self.metadata_rows().await?);

		let files = self.walk_tile_files()?;
		if files.is_empty() {
			return Ok(meta);
		}

		let min_zoom = files.iter().map(|(coord, _)| coord.z).min().unwrap();
		let max_zoom = files.iter().map(|(coord, _)| coord.z).max().unwrap();
		if meta.minzoom.is_none() {
			meta.minzoom = Some(min_zoom);
		}
		if meta.maxzoom.is_none() {
			meta.maxzoom = Some(max_zoom);
		}
		if meta.format.is_none() {
			let (_, path) = &files[0];
			meta.format = Some(TileFormat::from_bytes(&fs::read(path)?));
		}
		if meta.bounds.is_none() {
			let mut bounds: Option<tilegate_core::GeoBBox> = None;
			for z in min_zoom..=max_zoom {
				let level: Vec<&TileCoord> =
					files.iter().filter(|(coord, _)| coord.z == z).map(|(coord, _)| coord).collect();
				if level.is_empty() {
					continue;
				}
				let bbox = TileBBox::new(
					z,
					level.iter().map(|coord| coord.x).min().unwrap(),
					level.iter().map(|coord| coord.y).min().unwrap(),
					level.iter().map(|coord| coord.x).max().unwrap(),
					level.iter().map(|coord| coord.y).max().unwrap(),
				)?
				.as_geo_bbox(TileScheme::Xyz)?;
				match &mut bounds {
					Some(bounds) => bounds.extend(&bbox),
					None => bounds = Some(bbox),
				}
			}
			meta.bounds = bounds.map(|bounds| bounds.limited_to_mercator());
		}
		if meta.format == Some(TileFormat::PBF) && meta.vector_layers.is_none() {
			let mut names = BTreeSet::new();
			for (_, path) in files.iter().filter(|(coord, _)| coord.z == max_zoom).take(32) {
				match vector_layers::layer_names(&fs::read(path)?) {
					Ok(layer_names) => names.extend(layer_names),
					Err(error) => warn!("skipping undecodable vector tile in '{}': {error}", self.id),
				}
			}
			if !names.is_empty() {
				meta.vector_layers = Some(
					names
						.into_iter()
						.map(|name| tilegate_core::VectorLayer::named(&name))
						.collect(),
				);
			}
		}

		Ok(meta)
	}

	async fn update_metadata(&self, patch: &TileMetadata, timeout: Duration) -> Result<()> {
		let mut meta = rows_to_metadata(self.metadata_rows().await?);
		meta.merge(patch);
		let rows = metadata_to_rows(&meta);

		self
			.pool
			.call(timeout, move |conn| {
				for (name, value) in &rows {
					conn.execute(
						"INSERT INTO metadata (name, value) VALUES (?1, ?2)
						ON CONFLICT (name) DO UPDATE SET value = excluded.value",
						params![name, value],
					)?;
				}
				Ok(())
			})
			.await
	}

	async fn count_tiles(&self) -> Result<u64> {
		Ok(self.walk_tile_files()?.len() as u64)
	}

	async fn size_bytes(&self) -> Result<u64> {
		let mut total = 0u64;
		for (_, path) in self.walk_tile_files()? {
			total += fs::metadata(&path)?.len();
		}
		Ok(total)
	}

	async fn compact(&self) -> Result<()> {
		trace!("vacuum xyz side index '{}'", self.id);
		self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| conn.execute_batch("VACUUM"))
			.await
	}

	/// Prunes emptied shard directories bottom-up.
	async fn finish_clean(&self) -> Result<()> {
		let numeric_dirs = |dir: &Path| -> Vec<PathBuf> {
			fs::read_dir(dir)
				.into_iter()
				.flatten()
				.flatten()
				.map(|entry| entry.path())
				.filter(|path| {
					path.is_dir()
						&& path
							.file_name()
							.and_then(|name| name.to_str())
							.is_some_and(|name| RE_SHARD_DIR.is_match(name))
				})
				.collect()
		};

		for z_dir in numeric_dirs(&self.root) {
			for x_dir in numeric_dirs(&z_dir) {
				// fails while non-empty, which is exactly what we want
				let _ = fs::remove_dir(&x_dir);
			}
			let _ = fs::remove_dir(&z_dir);
		}
		Ok(())
	}

	async fn add_overviews(&self, concurrency: usize, tile_size: u32) -> Result<()> {
		crate::build_overviews(self, concurrency, tile_size).await
	}
}

impl std::fmt::Debug for XyzStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("XyzStore")
			.field("id", &self.id)
			.field("root", &self.root)
			.finish()
	}
}
