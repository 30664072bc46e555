use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Latitude limit of the spherical-Mercator projection.
pub static MAX_MERCATOR_LAT: f64 = 85.051_129;
pub static MAX_MERCATOR_LNG: f64 = 180.0;
/// Spherical Mercator radius (WGS84 semi-major axis) in meters.
pub static EARTH_RADIUS: f64 = 6_378_137.0;

/// A geographic bounding box in EPSG:4326 degrees,
/// `[west, south, east, north]`.
///
/// The box must satisfy `x_min <= x_max`; a coverage crossing the
/// anti-meridian is rejected as malformed rather than silently wrapped.
///
/// # Examples
/// ```
/// use tilegate_core::GeoBBox;
///
/// let bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
/// assert_eq!(bbox.as_array(), [-10.0, -5.0, 10.0, 5.0]);
/// ```
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct GeoBBox {
	pub x_min: f64,
	pub y_min: f64,
	pub x_max: f64,
	pub y_max: f64,
}

impl GeoBBox {
	/// Creates a checked `west, south, east, north` bounding box.
	///
	/// # Errors
	/// Returns an error if any coordinate is out of range or if the box is
	/// inverted (`west > east` or `south > north`).
	pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<GeoBBox> {
		GeoBBox {
			x_min,
			y_min,
			x_max,
			y_max,
		}
		.checked()
	}

	/// The world in Mercator-safe latitudes: `[-180, -85.051129, 180, 85.051129]`.
	pub fn world() -> GeoBBox {
		GeoBBox {
			x_min: -MAX_MERCATOR_LNG,
			y_min: -MAX_MERCATOR_LAT,
			x_max: MAX_MERCATOR_LNG,
			y_max: MAX_MERCATOR_LAT,
		}
	}

	fn checked(self) -> Result<Self> {
		ensure!(self.x_min >= -180., "x_min ({}) must be >= -180", self.x_min);
		ensure!(self.y_min >= -90., "y_min ({}) must be >= -90", self.y_min);
		ensure!(self.x_max <= 180., "x_max ({}) must be <= 180", self.x_max);
		ensure!(self.y_max <= 90., "y_max ({}) must be <= 90", self.y_max);
		ensure!(
			self.x_min <= self.x_max,
			"x_min ({}) must be <= x_max ({}); bounding boxes must not cross the anti-meridian",
			self.x_min,
			self.x_max
		);
		ensure!(
			self.y_min <= self.y_max,
			"y_min ({}) must be <= y_max ({})",
			self.y_min,
			self.y_max
		);
		Ok(self)
	}

	/// Clamps the box in place to the valid Mercator span.
	pub fn limit_to_mercator(&mut self) {
		self.x_min = self.x_min.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
		self.y_min = self.y_min.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
		self.x_max = self.x_max.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
		self.y_max = self.y_max.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
	}

	/// Non-mutating version of [`limit_to_mercator`](Self::limit_to_mercator).
	#[must_use = "this returns the clamped box without modifying the original"]
	pub fn limited_to_mercator(mut self) -> GeoBBox {
		self.limit_to_mercator();
		self
	}

	/// Expands the box in place to include `other`.
	pub fn extend(&mut self, other: &GeoBBox) {
		self.x_min = self.x_min.min(other.x_min);
		self.y_min = self.y_min.min(other.y_min);
		self.x_max = self.x_max.max(other.x_max);
		self.y_max = self.y_max.max(other.y_max);
	}

	/// Shrinks the box in place to the overlap with `other`.
	///
	/// A disjoint `other` leaves an inverted, empty box; check with
	/// [`is_empty`](Self::is_empty).
	pub fn intersect(&mut self, other: &GeoBBox) {
		self.x_min = self.x_min.max(other.x_min);
		self.y_min = self.y_min.max(other.y_min);
		self.x_max = self.x_max.min(other.x_max);
		self.y_max = self.y_max.min(other.y_max);
	}

	/// Non-mutating version of [`intersect`](Self::intersect).
	#[must_use]
	pub fn intersected(mut self, other: &GeoBBox) -> GeoBBox {
		self.intersect(other);
		self
	}

	pub fn is_empty(&self) -> bool {
		(self.x_min > self.x_max) || (self.y_min > self.y_max)
	}

	pub fn as_array(&self) -> [f64; 4] {
		[self.x_min, self.y_min, self.x_max, self.y_max]
	}

	/// Projects the box to EPSG:3857 meters, clamping latitudes first.
	pub fn to_mercator(&self) -> [f64; 4] {
		[
			lon_to_mercator_x(self.x_min),
			lat_to_mercator_y(self.y_min),
			lon_to_mercator_x(self.x_max),
			lat_to_mercator_y(self.y_max),
		]
	}

	/// Builds the bounding box of a circle given in degrees and meters by
	/// expanding its center in EPSG:3857 and projecting back.
	pub fn from_circle(center_lon: f64, center_lat: f64, radius_m: f64) -> Result<GeoBBox> {
		ensure!(radius_m >= 0.0, "circle radius ({radius_m}) must be >= 0");
		let x = lon_to_mercator_x(center_lon);
		let y = lat_to_mercator_y(center_lat);
		Ok(GeoBBox {
			x_min: mercator_x_to_lon(x - radius_m),
			y_min: mercator_y_to_lat(y - radius_m),
			x_max: mercator_x_to_lon(x + radius_m),
			y_max: mercator_y_to_lat(y + radius_m),
		}
		.limited_to_mercator())
	}
}

/// Forward Mercator, longitude degrees to meters. Input is clamped.
pub fn lon_to_mercator_x(lon: f64) -> f64 {
	let lon = lon.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
	EARTH_RADIUS * lon.to_radians()
}

/// Forward Mercator, latitude degrees to meters. Input is clamped.
pub fn lat_to_mercator_y(lat: f64) -> f64 {
	let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
	let phi = lat.to_radians();
	EARTH_RADIUS * ((std::f64::consts::FRAC_PI_4 + phi / 2.0).tan()).ln()
}

/// Inverse Mercator, meters to longitude degrees. Output is clamped.
pub fn mercator_x_to_lon(x: f64) -> f64 {
	(x / EARTH_RADIUS).to_degrees().clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG)
}

/// Inverse Mercator, meters to latitude degrees. Output is clamped.
pub fn mercator_y_to_lat(y: f64) -> f64 {
	let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
	lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
}

impl Debug for GeoBBox {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"GeoBBox({}, {}, {}, {})",
			self.x_min, self.y_min, self.x_max, self.y_max
		)
	}
}

impl TryFrom<[f64; 4]> for GeoBBox {
	type Error = anyhow::Error;

	fn try_from(input: [f64; 4]) -> Result<Self> {
		GeoBBox::new(input[0], input[1], input[2], input[3])
	}
}

impl From<GeoBBox> for [f64; 4] {
	fn from(bbox: GeoBBox) -> [f64; 4] {
		bbox.as_array()
	}
}

impl TryFrom<Vec<f64>> for GeoBBox {
	type Error = anyhow::Error;

	fn try_from(input: Vec<f64>) -> Result<Self> {
		ensure!(
			input.len() == 4,
			"bounding box must have 4 elements (west, south, east, north)"
		);
		GeoBBox::new(input[0], input[1], input[2], input[3])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn creation_and_accessors() {
		let bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		assert_eq!(bbox.as_array(), [-10.0, -5.0, 10.0, 5.0]);
		assert_eq!(format!("{bbox:?}"), "GeoBBox(-10, -5, 10, 5)");
	}

	#[test]
	fn invalid_ranges() {
		assert!(GeoBBox::new(-190.0, -5.0, 10.0, 5.0).is_err());
		assert!(GeoBBox::new(-10.0, -95.0, 10.0, 5.0).is_err());
		assert!(GeoBBox::new(-10.0, -5.0, 190.0, 5.0).is_err());
		assert!(GeoBBox::new(-10.0, -5.0, 10.0, 95.0).is_err());
		// anti-meridian crossing is a malformed box
		assert!(GeoBBox::new(170.0, -5.0, -170.0, 5.0).is_err());
		assert!(GeoBBox::new(-10.0, 6.0, 10.0, 5.0).is_err());
	}

	#[test]
	fn limit_to_mercator() {
		let mut bbox = GeoBBox::new(-180.0, -90.0, 180.0, 90.0).unwrap();
		bbox.limit_to_mercator();
		assert_eq!(bbox.as_array(), [-180.0, -MAX_MERCATOR_LAT, 180.0, MAX_MERCATOR_LAT]);
	}

	#[test]
	fn extend_and_intersect() {
		let mut bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		bbox.extend(&GeoBBox::new(-12.0, -3.0, 8.0, 6.0).unwrap());
		assert_eq!(bbox.as_array(), [-12.0, -5.0, 10.0, 6.0]);

		let mut bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		bbox.intersect(&GeoBBox::new(-8.0, -4.0, 12.0, 4.0).unwrap());
		assert_eq!(bbox.as_array(), [-8.0, -4.0, 10.0, 4.0]);
		assert!(!bbox.is_empty());

		let disjoint = GeoBBox::new(20.0, 20.0, 30.0, 30.0).unwrap();
		assert!(bbox.intersected(&disjoint).is_empty());
	}

	#[test]
	fn world_mercator_bounds() {
		let [x_min, y_min, x_max, y_max] = GeoBBox::world().to_mercator();
		let e = 20_037_508.342789244_f64;
		assert!((x_min + e).abs() < 2.0, "x_min={x_min}");
		assert!((y_min + e).abs() < 10.0, "y_min={y_min}");
		assert!((x_max - e).abs() < 2.0, "x_max={x_max}");
		assert!((y_max - e).abs() < 10.0, "y_max={y_max}");
	}

	#[rstest]
	#[case(0.0, 0.0)]
	#[case(13.4, 52.5)]
	#[case(-122.4, 37.8)]
	#[case(179.9, -85.0)]
	fn mercator_roundtrip(#[case] lon: f64, #[case] lat: f64) {
		assert!((mercator_x_to_lon(lon_to_mercator_x(lon)) - lon).abs() < 1e-9);
		assert!((mercator_y_to_lat(lat_to_mercator_y(lat)) - lat).abs() < 1e-9);
	}

	#[test]
	fn clamped_projection() {
		// out-of-range inputs are clamped before projecting
		assert_eq!(lon_to_mercator_x(200.0), lon_to_mercator_x(180.0));
		assert_eq!(lat_to_mercator_y(90.0), lat_to_mercator_y(MAX_MERCATOR_LAT));
	}

	#[test]
	fn circle_to_bbox() {
		let bbox = GeoBBox::from_circle(13.4, 52.5, 10_000.0).unwrap();
		assert!(bbox.x_min < 13.4 && 13.4 < bbox.x_max);
		assert!(bbox.y_min < 52.5 && 52.5 < bbox.y_max);
		// ~10 km is ~0.09 degrees of longitude at the equator scale
		assert!((bbox.x_max - bbox.x_min) > 0.15 && (bbox.x_max - bbox.x_min) < 0.2);

		assert!(GeoBBox::from_circle(0.0, 0.0, -1.0).is_err());

		let point = GeoBBox::from_circle(0.0, 0.0, 0.0).unwrap();
		assert_eq!(point.x_min, point.x_max);
	}

	#[test]
	fn serde_roundtrip() {
		let bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		let json = serde_json::to_string(&bbox).unwrap();
		assert_eq!(json, "[-10.0,-5.0,10.0,5.0]");
		assert_eq!(serde_json::from_str::<GeoBBox>(&json).unwrap(), bbox);
		assert!(serde_json::from_str::<GeoBBox>("[170.0,0.0,-170.0,1.0]").is_err());
	}
}
