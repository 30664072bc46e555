//! Coverages: the persisted description of a rectangular pyramid slice.
//!
//! A coverage pairs a zoom level with either a geographic bbox or a circle
//! (center plus radius in meters). Seed, clean and inventory jobs take a
//! coverage list and expand every entry into one inclusive tile rectangle.

use crate::{GeoBBox, MAX_ZOOM, TileBBox, TileScheme};
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// A circle in geographic coordinates with a Mercator-meter radius.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Circle {
	/// `[lon, lat]` in degrees.
	pub center: [f64; 2],
	/// Radius in EPSG:3857 meters.
	pub radius_m: f64,
}

/// One pyramid slice: a zoom level plus a bbox or a circle.
///
/// Exactly one of `bbox` and `circle` must be present; [`Coverage::validate`]
/// enforces this when a persisted document is loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Coverage {
	pub zoom: u8,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bbox: Option<GeoBBox>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub circle: Option<Circle>,
}

impl Coverage {
	pub fn from_bbox(zoom: u8, bbox: GeoBBox) -> Coverage {
		Coverage {
			zoom,
			bbox: Some(bbox),
			circle: None,
		}
	}

	pub fn from_circle(zoom: u8, circle: Circle) -> Coverage {
		Coverage {
			zoom,
			bbox: None,
			circle: Some(circle),
		}
	}

	pub fn validate(&self) -> Result<()> {
		ensure!(self.zoom <= MAX_ZOOM, "coverage zoom ({}) must be <= {MAX_ZOOM}", self.zoom);
		ensure!(
			self.bbox.is_some() != self.circle.is_some(),
			"coverage must have exactly one of 'bbox' and 'circle'"
		);
		if let Some(circle) = &self.circle {
			ensure!(circle.radius_m >= 0.0, "circle radius ({}) must be >= 0", circle.radius_m);
		}
		Ok(())
	}

	/// The geographic bbox of the coverage, clamped to the Mercator world.
	pub fn to_geo_bbox(&self) -> Result<GeoBBox> {
		self.validate()?;
		if let Some(bbox) = self.bbox {
			Ok(bbox.limited_to_mercator())
		} else {
			let circle = self.circle.unwrap();
			GeoBBox::from_circle(circle.center[0], circle.center[1], circle.radius_m)
		}
	}

	/// Expands the coverage to its tile rectangle, optionally intersected
	/// with `limit`. An empty intersection yields a zero-size range.
	pub fn to_tile_bbox(&self, scheme: TileScheme, limit: Option<&GeoBBox>) -> Result<TileBBox> {
		let mut bbox = self.to_geo_bbox()?;
		if let Some(limit) = limit {
			bbox.intersect(limit);
		}
		TileBBox::from_geo(self.zoom, &bbox, scheme)
	}
}

/// One coverage per zoom level over a fixed bbox, `min_zoom..=max_zoom`.
pub fn coverages_for_zoom_range(bbox: GeoBBox, min_zoom: u8, max_zoom: u8) -> Result<Vec<Coverage>> {
	ensure!(min_zoom <= max_zoom, "min_zoom ({min_zoom}) must be <= max_zoom ({max_zoom})");
	ensure!(max_zoom <= MAX_ZOOM, "max_zoom ({max_zoom}) must be <= {MAX_ZOOM}");
	Ok((min_zoom..=max_zoom).map(|zoom| Coverage::from_bbox(zoom, bbox)).collect())
}

/// The tile rectangles of a coverage list, in list order.
#[derive(Clone, Debug)]
pub struct TileBounds {
	pub ranges: Vec<TileBBox>,
}

impl TileBounds {
	/// Expands every coverage into its tile rectangle.
	pub fn from_coverages(
		coverages: &[Coverage],
		scheme: TileScheme,
		limit: Option<&GeoBBox>,
	) -> Result<TileBounds> {
		let ranges = coverages
			.iter()
			.enumerate()
			.map(|(index, coverage)| {
				coverage
					.to_tile_bbox(scheme, limit)
					.with_context(|| format!("expanding coverage #{index} at zoom {}", coverage.zoom))
			})
			.collect::<Result<Vec<TileBBox>>>()?;
		Ok(TileBounds { ranges })
	}

	/// Total tile count over all ranges.
	pub fn total(&self) -> u64 {
		self.ranges.iter().map(TileBBox::count_tiles).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.total() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn world() -> GeoBBox {
		GeoBBox::new(-180.0, -85.0, 180.0, 85.0).unwrap()
	}

	#[test]
	fn validation() {
		let both = Coverage {
			zoom: 3,
			bbox: Some(world()),
			circle: Some(Circle {
				center: [0.0, 0.0],
				radius_m: 10.0,
			}),
		};
		assert!(both.validate().is_err());

		let neither = Coverage {
			zoom: 3,
			bbox: None,
			circle: None,
		};
		assert!(neither.validate().is_err());

		assert!(Coverage::from_bbox(26, world()).validate().is_err());
		assert!(Coverage::from_bbox(3, world()).validate().is_ok());
	}

	#[test]
	fn world_z1_has_four_tiles() {
		let bounds =
			TileBounds::from_coverages(&[Coverage::from_bbox(1, world())], TileScheme::Xyz, None).unwrap();
		assert_eq!(bounds.ranges.len(), 1);
		let range = &bounds.ranges[0];
		assert_eq!((range.x_min(), range.y_min(), range.x_max(), range.y_max()), (0, 0, 1, 1));
		assert_eq!(bounds.total(), 4);
	}

	#[test]
	fn empty_coverage_list() {
		let bounds = TileBounds::from_coverages(&[], TileScheme::Xyz, None).unwrap();
		assert_eq!(bounds.total(), 0);
		assert!(bounds.is_empty());
	}

	#[test]
	fn limit_intersection() {
		let coverage = Coverage::from_bbox(4, GeoBBox::new(-10.0, -10.0, 10.0, 10.0).unwrap());

		// a disjoint limit empties the range
		let far = GeoBBox::new(100.0, 50.0, 120.0, 60.0).unwrap();
		let range = coverage.to_tile_bbox(TileScheme::Xyz, Some(&far)).unwrap();
		assert!(range.is_empty());

		// a containing limit changes nothing
		let range_unlimited = coverage.to_tile_bbox(TileScheme::Xyz, None).unwrap();
		let range_limited = coverage.to_tile_bbox(TileScheme::Xyz, Some(&world())).unwrap();
		assert_eq!(range_unlimited.count_tiles(), range_limited.count_tiles());
	}

	#[test]
	fn circle_coverage() {
		let coverage = Coverage::from_circle(
			10,
			Circle {
				center: [13.4, 52.5],
				radius_m: 5_000.0,
			},
		);
		let range = coverage.to_tile_bbox(TileScheme::Xyz, None).unwrap();
		assert!(range.count_tiles() >= 1);
		assert!(range.contains(&crate::TileCoord::from_lon_lat(13.4, 52.5, 10, TileScheme::Xyz).unwrap()));
	}

	#[test]
	fn zoom_range_expansion() {
		let coverages = coverages_for_zoom_range(world(), 0, 2).unwrap();
		assert_eq!(coverages.len(), 3);
		let bounds = TileBounds::from_coverages(&coverages, TileScheme::Xyz, None).unwrap();
		assert_eq!(bounds.total(), 1 + 4 + 16);

		assert!(coverages_for_zoom_range(world(), 3, 2).is_err());
	}

	#[test]
	fn persisted_form() {
		let coverage: Coverage = serde_json::from_str(r#"{"zoom":3,"bbox":[-10,-5,10,5]}"#).unwrap();
		assert_eq!(coverage.zoom, 3);
		assert!(coverage.bbox.is_some());
		coverage.validate().unwrap();

		let coverage: Coverage =
			serde_json::from_str(r#"{"zoom":5,"circle":{"center":[13.4,52.5],"radius_m":1000}}"#).unwrap();
		assert!(coverage.circle.is_some());
		coverage.validate().unwrap();

		assert!(serde_json::from_str::<Coverage>(r#"{"zoom":3,"box":[1,2,3,4]}"#).is_err());
	}
}
