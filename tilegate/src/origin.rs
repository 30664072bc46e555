//! The upstream tile origin: URL templating, bounded retries and the
//! "no tile" contract.
//!
//! A 204 or 404 from the origin means the tile does not exist; that is a
//! success with nothing to store. Any other failure is retried up to
//! `max_try` times with a short pause, then surfaced as
//! [`GatewayError::OriginUnavailable`].

use anyhow::{Context, Result, ensure};
use log::{trace, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::{str::FromStr, time::Duration};
use tilegate_core::{TileCoord, error::GatewayError};

/// Pause between origin retries.
const RETRY_PAUSE: Duration = Duration::from_millis(25);

pub struct OriginClient {
	client: reqwest::Client,
	url_template: String,
	max_try: u32,
	timeout: Duration,
}

impl OriginClient {
	/// Builds a client for one origin URL template containing `{z}`, `{x}`
	/// and `{y}` placeholders.
	pub fn new(
		url_template: &str,
		headers: &[(String, String)],
		max_try: u32,
		timeout: Duration,
	) -> Result<OriginClient> {
		ensure!(max_try >= 1, "max_try ({max_try}) must be >= 1");
		ensure!(
			url_template.contains("{z}") && url_template.contains("{x}") && url_template.contains("{y}"),
			"origin url '{url_template}' must contain {{z}}, {{x}} and {{y}}"
		);

		let mut header_map = HeaderMap::new();
		for (name, value) in headers {
			header_map.insert(
				HeaderName::from_str(name).with_context(|| format!("invalid header name '{name}'"))?,
				HeaderValue::from_str(value).with_context(|| format!("invalid value for header '{name}'"))?,
			);
		}

		Ok(OriginClient {
			client: reqwest::Client::builder().default_headers(header_map).build()?,
			url_template: url_template.to_string(),
			max_try,
			timeout,
		})
	}

	/// The concrete URL for one tile. The coordinate is used as-is; callers
	/// pass it in the scheme the origin expects.
	pub fn tile_url(&self, coord: &TileCoord) -> String {
		self
			.url_template
			.replace("{z}", &coord.z.to_string())
			.replace("{x}", &coord.x.to_string())
			.replace("{y}", &coord.y.to_string())
	}

	/// Fetches one tile. `Ok(None)` means the origin has no tile (204/404).
	pub async fn fetch_tile(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>> {
		let url = self.tile_url(coord);
		let mut last_error = String::new();

		for attempt in 1..=self.max_try {
			trace!("origin fetch {url} (attempt {attempt}/{})", self.max_try);

			match self.client.get(&url).timeout(self.timeout).send().await {
				Ok(response) => {
					let status = response.status();
					if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
						return Ok(None);
					}
					if status.is_success() {
						let body = response.bytes().await;
						match body {
							Ok(body) => return Ok(Some(body.to_vec())),
							Err(error) => last_error = format!("reading body from {url}: {error}"),
						}
					} else {
						last_error = format!("{url} answered {status}");
					}
				}
				Err(error) => last_error = format!("fetching {url}: {error}"),
			}

			if attempt < self.max_try {
				warn!("origin attempt {attempt}/{} failed: {last_error}", self.max_try);
				tokio::time::sleep(RETRY_PAUSE).await;
			}
		}

		Err(GatewayError::OriginUnavailable(last_error).into())
	}
}

impl std::fmt::Debug for OriginClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OriginClient")
			.field("url_template", &self.url_template)
			.field("max_try", &self.max_try)
			.finish()
	}
}

#[cfg(test)]
pub mod tests {
	use super::*;
	use std::sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	};
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	/// Serves each connection one canned HTTP response, round-robin over
	/// `responses`; returns the chosen base URL template.
	pub async fn spawn_stub_origin(responses: Vec<(u16, Vec<u8>)>) -> (String, Arc<AtomicU32>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let hits = Arc::new(AtomicU32::new(0));
		let hits_inner = Arc::clone(&hits);

		tokio::spawn(async move {
			loop {
				let Ok((mut socket, _)) = listener.accept().await else {
					return;
				};
				let index = hits_inner.fetch_add(1, Ordering::SeqCst) as usize;
				let (status, body) = responses[index.min(responses.len() - 1)].clone();
				tokio::spawn(async move {
					let mut buffer = [0u8; 2048];
					let _ = socket.read(&mut buffer).await;
					let reason = match status {
						200 => "OK",
						204 => "No Content",
						404 => "Not Found",
						_ => "Error",
					};
					let header = format!(
						"HTTP/1.1 {status} {reason}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
						body.len()
					);
					let _ = socket.write_all(header.as_bytes()).await;
					let _ = socket.write_all(&body).await;
					let _ = socket.shutdown().await;
				});
			}
		});

		(format!("http://127.0.0.1:{port}/tiles/{{z}}/{{x}}/{{y}}.png"), hits)
	}

	#[test]
	fn url_substitution() {
		let origin = OriginClient::new(
			"https://tiles.example.com/{z}/{x}/{y}.png",
			&[],
			3,
			Duration::from_secs(1),
		)
		.unwrap();
		let coord = TileCoord::new(3, 2, 5).unwrap();
		assert_eq!(origin.tile_url(&coord), "https://tiles.example.com/3/2/5.png");
	}

	#[test]
	fn template_validation() {
		assert!(OriginClient::new("https://example.com/{z}/{x}.png", &[], 3, Duration::from_secs(1)).is_err());
		assert!(OriginClient::new("https://example.com/{z}/{x}/{y}", &[], 0, Duration::from_secs(1)).is_err());
		assert!(
			OriginClient::new(
				"https://example.com/{z}/{x}/{y}",
				&[("x-api-key".to_string(), "secret".to_string())],
				1,
				Duration::from_secs(1)
			)
			.is_ok()
		);
	}

	#[tokio::test]
	async fn fetch_success() -> Result<()> {
		let (url, _hits) = spawn_stub_origin(vec![(200, b"tile bytes".to_vec())]).await;
		let origin = OriginClient::new(&url, &[], 2, Duration::from_secs(2))?;

		let body = origin.fetch_tile(&TileCoord::new(0, 0, 0)?).await?;
		assert_eq!(body.as_deref(), Some(b"tile bytes".as_slice()));
		Ok(())
	}

	#[tokio::test]
	async fn no_content_and_not_found_mean_no_tile() -> Result<()> {
		for status in [204u16, 404] {
			let (url, _hits) = spawn_stub_origin(vec![(status, Vec::new())]).await;
			let origin = OriginClient::new(&url, &[], 2, Duration::from_secs(2))?;
			assert_eq!(origin.fetch_tile(&TileCoord::new(0, 0, 0)?).await?, None);
		}
		Ok(())
	}

	#[tokio::test]
	async fn retries_then_succeeds() -> Result<()> {
		let (url, hits) = spawn_stub_origin(vec![
			(500, Vec::new()),
			(500, Vec::new()),
			(200, b"late".to_vec()),
		])
		.await;
		let origin = OriginClient::new(&url, &[], 5, Duration::from_secs(2))?;

		let body = origin.fetch_tile(&TileCoord::new(0, 0, 0)?).await?;
		assert_eq!(body.as_deref(), Some(b"late".as_slice()));
		assert_eq!(hits.load(Ordering::SeqCst), 3);
		Ok(())
	}

	#[tokio::test]
	async fn exhausted_retries_surface() -> Result<()> {
		let (url, hits) = spawn_stub_origin(vec![(500, Vec::new())]).await;
		let origin = OriginClient::new(&url, &[], 3, Duration::from_secs(2))?;

		let error = origin.fetch_tile(&TileCoord::new(0, 0, 0)?).await.unwrap_err();
		assert!(matches!(
			GatewayError::find_in(&error),
			Some(GatewayError::OriginUnavailable(_))
		));
		assert_eq!(hits.load(Ordering::SeqCst), 3);
		Ok(())
	}
}
