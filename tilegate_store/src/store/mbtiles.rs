//! Tiles in a single SQLite file following the MBTiles convention.
//!
//! Rows persist the y index in TMS (`tile_row = 2^z - 1 - y_xyz`); the
//! public operations take XYZ and convert on the boundary. The schema is
//! the classic `metadata(name, value)` plus `tiles(zoom_level, tile_column,
//! tile_row, tile_data)`, extended by additive `hash` and `created` columns
//! that are retrofitted onto legacy files with `ALTER TABLE`.

use crate::{
	DEFAULT_DB_TIMEOUT, ExtraInfo, ExtraInfoMap, StoreType, TileReply, TileStore,
	meta_rows::{metadata_to_rows, rows_to_metadata},
	tile_hash, vector_layers,
};
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use log::{trace, warn};
use std::{collections::BTreeSet, path::{Path, PathBuf}, time::Duration};
use tilegate_core::{
	Coverage, TileBBox, TileBounds, TileCoord, TileFormat, TileMetadata, TileScheme,
	error::GatewayError,
	utils::{
		SqlitePool, now_millis,
		rusqlite::{self, OptionalExtension, params},
	},
};

/// How many NULL-hash rows one repair batch loads.
const REPAIR_BATCH_SIZE: u32 = 256;
/// How many tiles the vector-layer reconstruction samples.
const LAYER_SAMPLE_SIZE: u32 = 32;

pub struct MBTilesStore {
	id: String,
	path: PathBuf,
	pool: SqlitePool,
}

impl MBTilesStore {
	/// Opens (and with `create_if_missing` initialises) the database file.
	pub async fn open(id: &str, path: &Path, create_if_missing: bool, timeout: Duration) -> Result<MBTilesStore> {
		trace!("open mbtiles store '{id}' at {path:?}");

		let pool = SqlitePool::open(path, create_if_missing)
			.with_context(|| format!("opening mbtiles store '{id}'"))?;
		let store = MBTilesStore {
			id: id.to_string(),
			path: path.to_path_buf(),
			pool,
		};

		if create_if_missing {
			store
				.pool
				.call(timeout, |conn| {
					conn.execute_batch(
						"CREATE TABLE IF NOT EXISTS metadata (name TEXT UNIQUE, value TEXT);
						CREATE TABLE IF NOT EXISTS tiles (
							zoom_level INTEGER,
							tile_column INTEGER,
							tile_row INTEGER,
							tile_data BLOB,
							hash TEXT,
							created BIGINT,
							UNIQUE (zoom_level, tile_column, tile_row)
						);",
					)
				})
				.await?;
		}
		store.upgrade_legacy_schema(timeout).await?;

		Ok(store)
	}

	/// Adds the `hash` and `created` columns to files predating them.
	async fn upgrade_legacy_schema(&self, timeout: Duration) -> Result<()> {
		let columns: BTreeSet<String> = self
			.pool
			.call(timeout, |conn| {
				let mut stmt = conn.prepare("PRAGMA table_info(tiles)")?;
				let names = stmt
					.query_map([], |row| row.get::<_, String>(1))?
					.collect::<rusqlite::Result<BTreeSet<String>>>()?;
				Ok(names)
			})
			.await?;
		ensure!(!columns.is_empty(), "mbtiles file {:?} has no tiles table", self.path);

		for (column, definition) in [("hash", "hash TEXT"), ("created", "created BIGINT")] {
			if !columns.contains(column) {
				trace!("adding column '{column}' to legacy mbtiles file {:?}", self.path);
				self
					.pool
					.call(timeout, move |conn| {
						conn.execute(&format!("ALTER TABLE tiles ADD COLUMN {definition}"), [])
					})
					.await?;
			}
		}
		Ok(())
	}

	fn tms_row(coord: &TileCoord) -> u32 {
		TileScheme::flip_y(coord.z, coord.y)
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

	async fn zoom_range(&self) -> Result<Option<(u8, u8)>> {
		self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| {
				conn
					.query_row(
						"SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles",
						[],
						|row| {
							Ok(match (row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?) {
								(Some(min), Some(max)) => Some((min as u8, max as u8)),
								_ => None,
							})
						},
					)
			})
			.await
	}

	/// Per-zoom column/row extremes, unioned into one geographic bbox.
	async fn bounds_from_tiles(&self, min_zoom: u8, max_zoom: u8) -> Result<Option<tilegate_core::GeoBBox>> {
		let mut bounds: Option<tilegate_core::GeoBBox> = None;
		for z in min_zoom..=max_zoom {
			let extremes = self
				.pool
				.call(DEFAULT_DB_TIMEOUT, move |conn| {
					conn.query_row(
						"SELECT MIN(tile_column), MAX(tile_column), MIN(tile_row), MAX(tile_row)
						FROM tiles WHERE zoom_level = ?1",
						[i64::from(z)],
						|row| {
							Ok((
								row.get::<_, Option<i64>>(0)?,
								row.get::<_, Option<i64>>(1)?,
								row.get::<_, Option<i64>>(2)?,
								row.get::<_, Option<i64>>(3)?,
							))
						},
					)
				})
				.await?;
			let (Some(x0), Some(x1), Some(r0), Some(r1)) = extremes else {
				continue;
			};
			let max_index = i64::from(TileScheme::flip_y(z, 0));
			let clamp = |v: i64| v.clamp(0, max_index) as u32;
			// rows are TMS; flip back to XYZ before building the bbox
			let bbox = TileBBox::new(
				z,
				clamp(x0),
				TileScheme::flip_y(z, clamp(r1)),
				clamp(x1),
				TileScheme::flip_y(z, clamp(r0)),
			)?
			.as_geo_bbox(TileScheme::Xyz)?;
			match &mut bounds {
				Some(bounds) => bounds.extend(&bbox),
				None => bounds = Some(bbox),
			}
		}
		Ok(bounds.map(|bounds| bounds.limited_to_mercator()))
	}

	/// Unions the layer names of a sample of tiles at `zoom`.
	async fn vector_layers_from_tiles(&self, zoom: u8) -> Result<Option<Vec<tilegate_core::VectorLayer>>> {
		let bodies: Vec<Vec<u8>> = self
			.pool
			.call(DEFAULT_DB_TIMEOUT, move |conn| {
				let mut stmt =
					conn.prepare("SELECT tile_data FROM tiles WHERE zoom_level = ?1 LIMIT ?2")?;
				let rows = stmt
					.query_map(params![i64::from(zoom), i64::from(LAYER_SAMPLE_SIZE)], |row| {
						row.get::<_, Vec<u8>>(0)
					})?
					.collect::<rusqlite::Result<Vec<_>>>()?;
				Ok(rows)
			})
			.await?;

		let mut names = BTreeSet::new();
		for body in &bodies {
			match vector_layers::layer_names(body) {
				Ok(layer_names) => names.extend(layer_names),
				Err(error) => warn!("skipping undecodable vector tile in '{}': {error}", self.id),
			}
		}
		if names.is_empty() {
			return Ok(None);
		}
		Ok(Some(
			names
				.into_iter()
				.map(|name| tilegate_core::VectorLayer::named(&name))
				.collect(),
		))
	}
}

#[async_trait]
impl TileStore for MBTilesStore {
	fn store_type(&self) -> StoreType {
		StoreType::Mbtiles
	}

	fn id(&self) -> &str {
		&self.id
	}

	async fn get_tile(&self, coord: &TileCoord) -> Result<TileReply> {
		trace!("read tile {coord} from mbtiles '{}'", self.id);

		let (z, x, row) = (i64::from(coord.z), i64::from(coord.x), i64::from(Self::tms_row(coord)));
		let found = self
			.pool
			.call(DEFAULT_DB_TIMEOUT, move |conn| {
				conn
					.query_row(
						"SELECT tile_data, created FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
						params![z, x, row],
						|db_row| Ok((db_row.get::<_, Vec<u8>>(0)?, db_row.get::<_, Option<i64>>(1)?)),
					)
					.optional()
			})
			.await?;

		match found {
			Some((data, created)) => {
				Ok(TileReply::new(data).with_created(created.map(|created| created.max(0) as u64)))
			}
			None => Err(GatewayError::TileNotFound.into()),
		}
	}

	async fn create_tile(&self, coord: &TileCoord, data: &[u8], timeout: Duration) -> Result<()> {
		let (z, x, row) = (i64::from(coord.z), i64::from(coord.x), i64::from(Self::tms_row(coord)));
		let hash = tile_hash(data);
		let created = now_millis() as i64;

		self
			.pool
			.call(timeout, move |conn| {
				conn.execute(
					"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data, hash, created)
					VALUES (?1, ?2, ?3, ?4, ?5, ?6)
					ON CONFLICT (zoom_level, tile_column, tile_row)
					DO UPDATE SET tile_data = excluded.tile_data, hash = excluded.hash, created = excluded.created",
					params![z, x, row, data, hash, created],
				)
			})
			.await?;
		Ok(())
	}

	async fn remove_tile(&self, coord: &TileCoord, timeout: Duration) -> Result<()> {
		let (z, x, row) = (i64::from(coord.z), i64::from(coord.x), i64::from(Self::tms_row(coord)));
		self
			.pool
			.call(timeout, move |conn| {
				conn.execute(
					"DELETE FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
					params![z, x, row],
				)
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
			let z = range.z;
			let (r0, r1) = (
				TileScheme::flip_y(z, range.y_max()),
				TileScheme::flip_y(z, range.y_min()),
			);
			selects.push(format!(
				"SELECT zoom_level, tile_column, tile_row, {column} AS value FROM tiles \
				WHERE zoom_level = {z} AND tile_column BETWEEN {x0} AND {x1} \
				AND tile_row BETWEEN {r0} AND {r1} AND {column} IS NOT NULL",
				x0 = range.x_min(),
				x1 = range.x_max(),
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
					let z = row.get::<_, i64>(0)? as u8;
					let x = row.get::<_, i64>(1)? as u32;
					let y = TileScheme::flip_y(z, row.get::<_, i64>(2)? as u32);
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

	async fn calculate_extra_info(&self) -> Result<u64> {
		let mut repaired = 0u64;
		loop {
			let batch = self
				.pool
				.call(DEFAULT_DB_TIMEOUT, |conn| {
					let mut stmt = conn.prepare(
						"SELECT rowid, tile_data FROM tiles WHERE hash IS NULL LIMIT ?1",
					)?;
					let rows = stmt
						.query_map([i64::from(REPAIR_BATCH_SIZE)], |row| {
							Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
						})?
						.collect::<rusqlite::Result<Vec<_>>>()?;
					Ok(rows)
				})
				.await?;
			if batch.is_empty() {
				break;
			}

			let updates: Vec<(i64, String)> = batch
				.iter()
				.map(|(rowid, data)| (*rowid, tile_hash(data)))
				.collect();
			let created = now_millis() as i64;
			self
				.pool
				.call(DEFAULT_DB_TIMEOUT, move |conn| {
					for (rowid, hash) in &updates {
						conn.execute(
							"UPDATE tiles SET hash = ?1, created = COALESCE(created, ?2) WHERE rowid = ?3",
							params![hash, created, rowid],
						)?;
					}
					Ok(())
				})
				.await?;
			repaired += batch.len() as u64;
		}

		trace!("repaired {repaired} rows in mbtiles '{}'", self.id);
		Ok(repaired)
	}

	async fn metadata(&self) -> Result<TileMetadata> {
		let mut meta = rows_to_metadata(self.metadata_rows().await?);

		let Some((min_zoom, max_zoom)) = self.zoom_range().await? else {
			return Ok(meta);
		};
		if meta.minzoom.is_none() {
			meta.minzoom = Some(min_zoom);
		}
		if meta.maxzoom.is_none() {
			meta.maxzoom = Some(max_zoom);
		}
		if meta.format.is_none() {
			let sample: Option<Vec<u8>> = self
				.pool
				.call(DEFAULT_DB_TIMEOUT, |conn| {
					conn
						.query_row("SELECT tile_data FROM tiles LIMIT 1", [], |row| row.get(0))
						.optional()
				})
				.await?;
			meta.format = sample.as_deref().map(TileFormat::from_bytes);
		}
		if meta.bounds.is_none() {
			meta.bounds = self.bounds_from_tiles(min_zoom, max_zoom).await?;
		}
		if meta.format == Some(TileFormat::PBF) && meta.vector_layers.is_none() {
			meta.vector_layers = self.vector_layers_from_tiles(max_zoom).await?;
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
		let count: i64 = self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| {
				conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))
			})
			.await?;
		Ok(count.max(0) as u64)
	}

	async fn size_bytes(&self) -> Result<u64> {
		let size: i64 = self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| {
				conn.query_row(
					"SELECT COALESCE(SUM(LENGTH(tile_data)), 0) FROM tiles",
					[],
					|row| row.get(0),
				)
			})
			.await?;
		Ok(size.max(0) as u64)
	}

	async fn compact(&self) -> Result<()> {
		trace!("vacuum mbtiles '{}'", self.id);
		self
			.pool
			.call(DEFAULT_DB_TIMEOUT, |conn| conn.execute_batch("VACUUM"))
			.await
	}

	async fn add_overviews(&self, concurrency: usize, tile_size: u32) -> Result<()> {
		crate::build_overviews(self, concurrency, tile_size).await
	}
}

impl std::fmt::Debug for MBTilesStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesStore")
			.field("id", &self.id)
			.field("path", &self.path)
			.finish()
	}
}
