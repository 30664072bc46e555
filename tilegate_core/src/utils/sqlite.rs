//! Pooled SQLite access with bounded BUSY retries.
//!
//! Every database call goes through [`SqlitePool::call`], which re-runs the
//! closure while SQLite reports `BUSY`/`LOCKED`, sleeping ~25 ms between
//! attempts, and gives up with [`GatewayError::DbTimeout`] at the deadline.
//! Handles are opened with `synchronous=FULL`, `journal_mode=TRUNCATE` and
//! `mmap_size=0`.

use crate::error::GatewayError;
use anyhow::{Context, Result, ensure};
use log::trace;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::{fs, path::Path, time::Duration};
use tokio::time::Instant;

pub use r2d2_sqlite::rusqlite;
use r2d2_sqlite::rusqlite::Connection;

/// Wait between retries of a busy database call.
pub const BUSY_RETRY_INTERVAL: Duration = Duration::from_millis(25);

fn is_busy(error: &rusqlite::Error) -> bool {
	matches!(
		error,
		rusqlite::Error::SqliteFailure(failure, _)
			if failure.code == rusqlite::ErrorCode::DatabaseBusy
				|| failure.code == rusqlite::ErrorCode::DatabaseLocked
	)
}

/// A pooled handle to one SQLite database file.
#[derive(Clone)]
pub struct SqlitePool {
	pool: Pool<SqliteConnectionManager>,
}

impl SqlitePool {
	/// Opens (and with `create_if_missing` creates) the database at `path`,
	/// including its parent directory.
	pub fn open(path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
		trace!("open sqlite database {path:?}");

		if create_if_missing {
			if let Some(parent) = path.parent() {
				fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;
			}
		} else {
			ensure!(path.exists(), "database file {path:?} does not exist");
		}

		let manager = SqliteConnectionManager::file(path).with_init(|conn| {
			conn.execute_batch(
				"PRAGMA synchronous = FULL;
				PRAGMA journal_mode = TRUNCATE;
				PRAGMA mmap_size = 0;",
			)
		});
		let pool = Pool::builder().max_size(10).build(manager)?;

		Ok(SqlitePool { pool })
	}

	/// Runs `f` on a pooled connection, retrying while the database is busy.
	///
	/// # Errors
	/// Fails with [`GatewayError::DbTimeout`] when the call stays busy until
	/// the deadline; any other database error is returned as-is.
	pub async fn call<T>(
		&self,
		timeout: Duration,
		f: impl Fn(&Connection) -> rusqlite::Result<T>,
	) -> Result<T> {
		let deadline = Instant::now() + timeout;

		loop {
			let conn = self.pool.get()?;
			match f(&conn) {
				Ok(value) => return Ok(value),
				Err(error) if is_busy(&error) => {
					drop(conn);
					if Instant::now() >= deadline {
						return Err(anyhow::Error::from(GatewayError::DbTimeout(timeout)).context(error));
					}
					tokio::time::sleep(BUSY_RETRY_INTERVAL).await;
				}
				Err(error) => return Err(error.into()),
			}
		}
	}
}
