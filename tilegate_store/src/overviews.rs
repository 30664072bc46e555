//! The pyramid overview builder.
//!
//! Works tile-by-tile through the [`TileStore`] contract: for every parent
//! tile of an overview zoom it reads the four children at the zoom below,
//! composites them (missing children stay transparent), downsamples and
//! upserts the parent. Levels are built from `maxzoom - 1` downwards until
//! the source bbox fits into a single tile, then `metadata.minzoom` is
//! updated to the newly reached zoom.

use crate::{DEFAULT_DB_TIMEOUT, TileStore};
use anyhow::{Context, Result, bail, ensure};
use futures::{StreamExt, stream};
use log::{debug, trace, warn};
use std::time::Duration;
use tilegate_core::{
	Coverage, GeoBBox, TileBBox, TileCoord, TileFormat, TileMetadata, TileScheme,
	error::GatewayError,
};

/// Overview composition runs on a small pool.
const MAX_OVERVIEW_CONCURRENCY: usize = 16;
/// A level fits into one tile once the source covers at most this share of it.
const ONE_TILE_FIT: f64 = 0.95;

/// Number of zoom levels to build so that the source bbox at
/// `maxzoom - dz` spans at most `ONE_TILE_FIT` of one tile.
fn overview_depth(bounds: &GeoBBox, max_zoom: u8) -> u8 {
	let [x0, _, x1, _] = bounds.to_mercator();
	let world = 2.0 * tilegate_core::lon_to_mercator_x(180.0);
	let fraction = ((x1 - x0) / world).clamp(0.0, 1.0);

	let mut dz = 1u8;
	while max_zoom > dz && fraction * f64::from(1u32 << (max_zoom - dz)) > ONE_TILE_FIT {
		dz += 1;
	}
	dz
}

async fn read_child(store: &dyn TileStore, coord: &TileCoord) -> Option<Vec<u8>> {
	match store.get_tile(coord).await {
		Ok(reply) => Some(reply.data),
		Err(error) if GatewayError::is_not_found(&error) => None,
		Err(error) => {
			// unreadable children degrade to a transparent quadrant
			warn!("unreadable child tile {coord} in '{}': {error}", store.id());
			None
		}
	}
}

/// Builds one parent from its four children; `Ok(false)` when all children
/// are missing and nothing was written.
async fn build_parent(
	store: &dyn TileStore,
	parent: &TileCoord,
	tile_width: u32,
	tile_height: u32,
	format: TileFormat,
	timeout: Duration,
) -> Result<bool> {
	let children = parent.children()?;
	let mut bodies: [Option<Vec<u8>>; 4] = [None, None, None, None];
	for (slot, child) in bodies.iter_mut().zip(children.iter()) {
		*slot = read_child(store, child).await;
	}
	if bodies.iter().all(Option::is_none) {
		return Ok(false);
	}

	let data = tilegate_image::compose_quad(&bodies, tile_width, tile_height, format)?;
	store.create_tile(parent, &data, timeout).await?;
	Ok(true)
}

/// Synthesises overview levels for a raster source. See the module docs.
pub async fn build_overviews(store: &dyn TileStore, concurrency: usize, tile_size: u32) -> Result<()> {
	let concurrency = concurrency.clamp(1, MAX_OVERVIEW_CONCURRENCY);
	ensure!(tile_size > 0, "tile size must be positive");

	let meta = store.metadata().await?;
	let Some(max_zoom) = meta.maxzoom else {
		bail!("store '{}' has no tiles to build overviews from", store.id());
	};
	ensure!(max_zoom > 0, "store '{}' is already at zoom 0", store.id());
	let bounds = meta.bounds.context("source has no bounds")?;

	// discover the native tile size from any stored tile at maxzoom
	let existing = store
		.extra_info(&[Coverage::from_bbox(max_zoom, bounds)], true)
		.await?;
	let Some(sample_key) = existing.keys().next() else {
		bail!("store '{}' has no tiles at zoom {max_zoom}", store.id());
	};
	let sample_coord = parse_key(sample_key)?;
	let sample = store.get_tile(&sample_coord).await?;
	let format = meta.format.unwrap_or_else(|| TileFormat::from_bytes(&sample.data));
	if format == TileFormat::PBF {
		return Err(
			GatewayError::UnsupportedOperation("overviews on a vector tile source".to_string()).into(),
		);
	}
	let (tile_width, tile_height) =
		tilegate_image::raster_size(&sample.data).context("measuring native tile size")?;

	let depth = overview_depth(&bounds, max_zoom);
	let target_zoom = max_zoom - depth;
	debug!(
		"building overviews for '{}' from zoom {} down to {target_zoom} ({tile_width}x{tile_height}, {format})",
		store.id(),
		max_zoom - 1
	);

	for zoom in (target_zoom..max_zoom).rev() {
		let parents = TileBBox::from_geo(zoom, &bounds, TileScheme::Xyz)?;
		trace!("overview level {zoom}: {} candidate parents", parents.count_tiles());

		let written = stream::iter(parents.iter_coords())
			.map(|parent| async move {
				match build_parent(store, &parent, tile_width, tile_height, format, DEFAULT_DB_TIMEOUT).await {
					Ok(written) => u64::from(written),
					Err(error) => {
						warn!("failed to build overview tile {parent} in '{}': {error}", store.id());
						0
					}
				}
			})
			.buffer_unordered(concurrency)
			.fold(0u64, |sum, written| async move { sum + written })
			.await;
		trace!("overview level {zoom}: wrote {written} tiles");
	}

	store
		.update_metadata(
			&TileMetadata {
				minzoom: Some(target_zoom),
				..TileMetadata::default()
			},
			DEFAULT_DB_TIMEOUT,
		)
		.await?;
	Ok(())
}

fn parse_key(key: &str) -> Result<TileCoord> {
	let parts: Vec<&str> = key.split('/').collect();
	ensure!(parts.len() == 3, "malformed tile key '{key}'");
	TileCoord::new(parts[0].parse()?, parts[1].parse()?, parts[2].parse()?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{MBTilesStore, TileStore};
	use tilegate_image::solid_png;

	async fn open_mbtiles_temp(temp_dir: &assert_fs::TempDir) -> Result<MBTilesStore> {
		MBTilesStore::open(
			"overview",
			&temp_dir.path().join("overview.mbtiles"),
			true,
			Duration::from_secs(5),
		)
		.await
	}

	#[test]
	fn depth_reaches_one_tile() {
		// the whole world needs to go all the way down to zoom 0
		assert_eq!(overview_depth(&GeoBBox::world(), 4), 4);

		// a half-world-wide box fits a single tile at zoom 0
		let half = GeoBBox::new(-180.0, -40.0, 0.0, 40.0).unwrap();
		assert_eq!(overview_depth(&half, 2), 2);

		// a tiny box fits one tile one level up
		let tiny = GeoBBox::new(13.0, 52.0, 13.01, 52.01).unwrap();
		assert_eq!(overview_depth(&tiny, 10), 1);
	}

	#[test]
	fn key_parsing() {
		let coord = parse_key("3/2/5").unwrap();
		assert_eq!((coord.z, coord.x, coord.y), (3, 2, 5));
		assert!(parse_key("3/2").is_err());
		assert!(parse_key("a/b/c").is_err());
	}

	#[tokio::test]
	async fn quadrant_pyramid() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let store = open_mbtiles_temp(&temp_dir).await?;
		let timeout = Duration::from_secs(5);

		// four tiles at zoom 2 in the north-western quadrant block
		let colors = [
			[255, 0, 0, 255],
			[0, 255, 0, 255],
			[0, 0, 255, 255],
			[255, 255, 0, 255],
		];
		for (index, color) in colors.iter().enumerate() {
			let coord = TileCoord::new(2, index as u32 % 2, index as u32 / 2)?;
			store.create_tile(&coord, &solid_png(8, 8, *color), timeout).await?;
		}

		store.add_overviews(2, 256).await?;

		// one composite at zoom 1 and one at zoom 0
		let z1 = store.get_tile(&TileCoord::new(1, 0, 0)?).await?;
		assert_eq!(z1.headers.content_type, "image/png");
		let raster = tilegate_image::decode_raster(&z1.data)?;
		assert_eq!((raster.width(), raster.height()), (8, 8));

		let z0 = store.get_tile(&TileCoord::new(0, 0, 0)?).await?;
		assert_eq!(z0.headers.content_type, "image/png");

		assert_eq!(store.metadata().await?.minzoom, Some(0));
		Ok(())
	}

	#[tokio::test]
	async fn missing_children_leave_transparent_quadrants() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let store = open_mbtiles_temp(&temp_dir).await?;
		let timeout = Duration::from_secs(5);

		// a single child: the other three quadrants stay transparent
		store
			.create_tile(&TileCoord::new(1, 0, 0)?, &solid_png(8, 8, [200, 0, 0, 255]), timeout)
			.await?;
		store.add_overviews(1, 256).await?;

		let parent = store.get_tile(&TileCoord::new(0, 0, 0)?).await?;
		let raster = tilegate_image::decode_raster(&parent.data)?;
		let rgba = raster.to_rgba8();
		// north-west quadrant carries the child, south-east stays empty
		assert_eq!(rgba.get_pixel(1, 1).0[3], 255);
		assert_eq!(rgba.get_pixel(6, 6).0[3], 0);
		Ok(())
	}

	#[tokio::test]
	async fn vector_sources_are_rejected() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let store = open_mbtiles_temp(&temp_dir).await?;

		store
			.create_tile(&TileCoord::new(1, 0, 0)?, &[0x1F, 0x8B, 0x08, 0x00], Duration::from_secs(5))
			.await?;
		let error = store.add_overviews(1, 256).await.unwrap_err();
		assert!(matches!(
			GatewayError::find_in(&error),
			Some(GatewayError::UnsupportedOperation(_))
		));
		Ok(())
	}
}
