//! The per-source metadata record.
//!
//! Every data source carries one metadata record describing its name,
//! attribution, zoom range, bounds and format. Back-ends persist it in
//! their own way (MBTiles `metadata` table, XYZ/PG side tables); this type
//! is the common in-memory shape with the defaulting and derivation rules.

use crate::{GeoBBox, TileFormat};
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAXZOOM: u8 = 22;

/// Whether a source is a base layer or drawn over one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
	#[default]
	Overlay,
	Baselayer,
}

/// One layer entry of a vector source, as published in TileJSON
/// `vector_layers`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
	pub id: String,
	#[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
	pub fields: serde_json::Map<String, serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub minzoom: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub maxzoom: Option<u8>,
}

impl VectorLayer {
	pub fn named(id: &str) -> VectorLayer {
		VectorLayer {
			id: id.to_string(),
			..VectorLayer::default()
		}
	}
}

/// The metadata record of a data source.
///
/// All fields are optional in persisted form; [`TileMetadata::filled`]
/// applies the documented defaults: world bounds, `maxzoom` 22 and a center
/// derived from bounds and the middle zoom.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub attribution: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub kind: Option<LayerKind>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub format: Option<TileFormat>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub minzoom: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub maxzoom: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bounds: Option<GeoBBox>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub center: Option<[f64; 3]>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub vector_layers: Option<Vec<VectorLayer>>,
}

impl TileMetadata {
	/// Overwrites every field for which `patch` provides a value.
	///
	/// Bounds are re-clamped to the Mercator world after patching.
	pub fn merge(&mut self, patch: &TileMetadata) {
		fn take<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
			if source.is_some() {
				target.clone_from(source);
			}
		}
		take(&mut self.name, &patch.name);
		take(&mut self.description, &patch.description);
		take(&mut self.attribution, &patch.attribution);
		take(&mut self.version, &patch.version);
		take(&mut self.kind, &patch.kind);
		take(&mut self.format, &patch.format);
		take(&mut self.minzoom, &patch.minzoom);
		take(&mut self.maxzoom, &patch.maxzoom);
		take(&mut self.bounds, &patch.bounds);
		take(&mut self.center, &patch.center);
		take(&mut self.vector_layers, &patch.vector_layers);

		if let Some(bounds) = &mut self.bounds {
			bounds.limit_to_mercator();
		}
	}

	/// Applies the documented defaults to all missing fields.
	#[must_use]
	pub fn filled(mut self) -> TileMetadata {
		self.kind.get_or_insert_with(LayerKind::default);
		self.minzoom.get_or_insert(0);
		self.maxzoom.get_or_insert(DEFAULT_MAXZOOM);
		let bounds = {
			let bounds = self.bounds.get_or_insert_with(GeoBBox::world);
			bounds.limit_to_mercator();
			*bounds
		};
		if self.center.is_none() {
			let zoom = (self.minzoom.unwrap() + self.maxzoom.unwrap()) / 2;
			self.center = Some([
				(bounds.x_min + bounds.x_max) / 2.0,
				(bounds.y_min + bounds.y_max) / 2.0,
				f64::from(zoom),
			]);
		}
		self
	}

	/// Checks the zoom range ordering; bounds are validated by `GeoBBox`.
	pub fn validate(&self) -> Result<()> {
		if let (Some(minzoom), Some(maxzoom)) = (self.minzoom, self.maxzoom) {
			ensure!(
				minzoom <= maxzoom,
				"minzoom ({minzoom}) must be <= maxzoom ({maxzoom})"
			);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MAX_MERCATOR_LAT;

	#[test]
	fn defaults() {
		let meta = TileMetadata::default().filled();
		assert_eq!(meta.kind, Some(LayerKind::Overlay));
		assert_eq!(meta.minzoom, Some(0));
		assert_eq!(meta.maxzoom, Some(DEFAULT_MAXZOOM));
		assert_eq!(
			meta.bounds.unwrap().as_array(),
			[-180.0, -MAX_MERCATOR_LAT, 180.0, MAX_MERCATOR_LAT]
		);
		// center: middle of bounds at floor((0 + 22) / 2)
		let center = meta.center.unwrap();
		assert_eq!(center[0], 0.0);
		assert_eq!(center[1], 0.0);
		assert_eq!(center[2], 11.0);
	}

	#[test]
	fn center_derivation_uses_zoom_range() {
		let meta = TileMetadata {
			minzoom: Some(4),
			maxzoom: Some(9),
			bounds: Some(GeoBBox::new(10.0, 40.0, 20.0, 60.0).unwrap()),
			..TileMetadata::default()
		}
		.filled();
		assert_eq!(meta.center.unwrap(), [15.0, 50.0, 6.0]);
	}

	#[test]
	fn merge_patches_and_clamps() {
		let mut meta = TileMetadata {
			name: Some("base".to_string()),
			maxzoom: Some(14),
			..TileMetadata::default()
		};
		meta.merge(&TileMetadata {
			description: Some("patched".to_string()),
			bounds: Some(GeoBBox::new(-180.0, -90.0, 180.0, 90.0).unwrap()),
			..TileMetadata::default()
		});
		assert_eq!(meta.name.as_deref(), Some("base"));
		assert_eq!(meta.description.as_deref(), Some("patched"));
		assert_eq!(meta.maxzoom, Some(14));
		// merged bounds were clamped to the Mercator world
		assert_eq!(meta.bounds.unwrap().y_max, MAX_MERCATOR_LAT);
	}

	#[test]
	fn validate_zoom_order() {
		let meta = TileMetadata {
			minzoom: Some(9),
			maxzoom: Some(4),
			..TileMetadata::default()
		};
		assert!(meta.validate().is_err());
	}

	#[test]
	fn persisted_form() {
		let meta: TileMetadata = serde_json::from_str(
			r#"{"name":"osm","type":"baselayer","format":"pbf","minzoom":0,"maxzoom":14,
			"bounds":[-180,-85.051129,180,85.051129],
			"vector_layers":[{"id":"water","fields":{"kind":"String"}}]}"#,
		)
		.unwrap();
		assert_eq!(meta.kind, Some(LayerKind::Baselayer));
		assert_eq!(meta.format, Some(TileFormat::PBF));
		assert_eq!(meta.vector_layers.as_ref().unwrap()[0].id, "water");

		let json = serde_json::to_value(&meta).unwrap();
		assert_eq!(json["type"], "baselayer");
		assert!(json.get("center").is_none());
	}
}
