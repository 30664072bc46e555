//! Conversion between [`TileMetadata`] and the `metadata(name, value)`
//! rows shared by the MBTiles file and the XYZ side index.
//!
//! Scalars map to one row each; `bounds` and `center` are comma lists;
//! `vector_layers` travels inside the `json` row as in the MBTiles
//! convention.

use anyhow::{Context, Result};
use log::warn;
use tilegate_core::{GeoBBox, LayerKind, TileFormat, TileMetadata, VectorLayer};

fn parse_floats(value: &str) -> Result<Vec<f64>> {
	value
		.split(',')
		.map(|part| part.trim().parse::<f64>().context("parsing number list"))
		.collect()
}

/// Builds a metadata record from `(name, value)` rows, ignoring unknown
/// names and logging malformed values instead of failing the source.
pub fn rows_to_metadata(rows: Vec<(String, String)>) -> TileMetadata {
	let mut meta = TileMetadata::default();

	for (name, value) in rows {
		let result: Result<()> = (|| {
			match name.as_str() {
				"name" => meta.name = Some(value.clone()),
				"description" => meta.description = Some(value.clone()),
				"attribution" => meta.attribution = Some(value.clone()),
				"version" => meta.version = Some(value.clone()),
				"type" => {
					meta.kind = Some(match value.as_str() {
						"baselayer" => LayerKind::Baselayer,
						_ => LayerKind::Overlay,
					})
				}
				"format" => meta.format = Some(TileFormat::parse_str(&value)?),
				"minzoom" => meta.minzoom = Some(value.trim().parse()?),
				"maxzoom" => meta.maxzoom = Some(value.trim().parse()?),
				"bounds" => {
					let bounds = parse_floats(&value)?;
					meta.bounds = Some(GeoBBox::try_from(bounds)?.limited_to_mercator());
				}
				"center" => {
					let center = parse_floats(&value)?;
					anyhow::ensure!(center.len() == 3, "center must have 3 elements");
					meta.center = Some([center[0], center[1], center[2]]);
				}
				"json" => {
					let json: serde_json::Value = serde_json::from_str(&value)?;
					if let Some(layers) = json.get("vector_layers") {
						meta.vector_layers = Some(serde_json::from_value::<Vec<VectorLayer>>(layers.clone())?);
					}
				}
				_ => {}
			}
			Ok(())
		})();
		if let Err(error) = result {
			warn!("ignoring malformed metadata row '{name}': {error}");
		}
	}

	meta
}

/// Serialises the provided fields of a metadata record to `(name, value)`
/// rows. Absent fields produce no row.
pub fn metadata_to_rows(meta: &TileMetadata) -> Vec<(String, String)> {
	let mut rows = Vec::new();
	let mut push = |name: &str, value: Option<String>| {
		if let Some(value) = value {
			rows.push((name.to_string(), value));
		}
	};

	push("name", meta.name.clone());
	push("description", meta.description.clone());
	push("attribution", meta.attribution.clone());
	push("version", meta.version.clone());
	push(
		"type",
		meta.kind.map(|kind| {
			match kind {
				LayerKind::Baselayer => "baselayer",
				LayerKind::Overlay => "overlay",
			}
			.to_string()
		}),
	);
	push("format", meta.format.map(|format| format.to_string()));
	push("minzoom", meta.minzoom.map(|zoom| zoom.to_string()));
	push("maxzoom", meta.maxzoom.map(|zoom| zoom.to_string()));
	push(
		"bounds",
		meta.bounds.map(|bounds| {
			let [w, s, e, n] = bounds.as_array();
			format!("{w},{s},{e},{n}")
		}),
	);
	push(
		"center",
		meta.center.map(|center| format!("{},{},{}", center[0], center[1], center[2])),
	);
	push(
		"json",
		meta.vector_layers.as_ref().map(|layers| {
			serde_json::json!({ "vector_layers": layers }).to_string()
		}),
	);

	rows
}
