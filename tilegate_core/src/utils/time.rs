//! Epoch-millisecond timestamps and threshold parsing.
//!
//! Tile rows carry `created` as epoch milliseconds. Cleanup and refresh
//! thresholds are given either as an absolute ISO-8601 timestamp (with or
//! without offset, assumed UTC) or as a relative "N days ago".

use anyhow::{Context, Result, bail};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::{SystemTime, UNIX_EPOCH};
use time::{
	PrimitiveDateTime, format_description::well_known::Rfc3339, macros::format_description,
};

lazy_static! {
	static ref RE_DAYS_AGO: Regex = Regex::new(r"^\s*(\d+)\s*days?\s+ago\s*$").unwrap();
}

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Current time as epoch milliseconds.
pub fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|duration| duration.as_millis() as u64)
		.unwrap_or(0)
}

fn millis_from_unix_nanos(nanos: i128) -> u64 {
	(nanos / 1_000_000).max(0) as u64
}

/// Parses a time threshold into epoch milliseconds.
///
/// Accepted forms: RFC 3339 (`2024-01-01T00:00:00Z`), an offset-less
/// ISO-8601 timestamp assumed UTC (`2024-01-01T00:00:00`), a bare date
/// (`2024-01-01`), and a relative `"N days ago"`.
pub fn parse_time_threshold(input: &str) -> Result<u64> {
	if let Some(captures) = RE_DAYS_AGO.captures(input) {
		let days: u64 = captures[1].parse().context("parsing day count")?;
		return Ok(now_millis().saturating_sub(days.saturating_mul(MILLIS_PER_DAY)));
	}

	if let Ok(datetime) = time::OffsetDateTime::parse(input, &Rfc3339) {
		return Ok(millis_from_unix_nanos(datetime.unix_timestamp_nanos()));
	}

	let datetime_format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
	if let Ok(datetime) = PrimitiveDateTime::parse(input, &datetime_format) {
		return Ok(millis_from_unix_nanos(datetime.assume_utc().unix_timestamp_nanos()));
	}

	let date_format = format_description!("[year]-[month]-[day]");
	if let Ok(date) = time::Date::parse(input, &date_format) {
		return Ok(millis_from_unix_nanos(
			date.midnight().assume_utc().unix_timestamp_nanos(),
		));
	}

	bail!("cannot parse time threshold '{input}': expected ISO-8601 or 'N days ago'")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn now_is_recent() {
		// after 2024-01-01 and before 2100
		let now = now_millis();
		assert!(now > 1_704_000_000_000);
		assert!(now < 4_102_444_800_000);
	}

	#[test]
	fn absolute_forms() {
		assert_eq!(parse_time_threshold("1970-01-02T00:00:00").unwrap(), 86_400_000);
		assert_eq!(parse_time_threshold("1970-01-02T00:00:00Z").unwrap(), 86_400_000);
		assert_eq!(parse_time_threshold("1970-01-02").unwrap(), 86_400_000);
		assert_eq!(
			parse_time_threshold("2024-01-01T00:00:00+01:00").unwrap(),
			1_704_063_600_000
		);
		// pre-epoch clamps to zero
		assert_eq!(parse_time_threshold("1969-01-01").unwrap(), 0);
	}

	#[test]
	fn relative_form() {
		let threshold = parse_time_threshold("2 days ago").unwrap();
		let expected = now_millis() - 2 * MILLIS_PER_DAY;
		assert!(threshold.abs_diff(expected) < 5_000);

		assert!(parse_time_threshold("1 day ago").unwrap() > threshold);
		assert!(parse_time_threshold("days ago").is_err());
		assert!(parse_time_threshold("soon").is_err());
	}
}
