//! Cross-process exclusive file operations via sentinel lock files.
//!
//! A writer acquires `<path>.lock` with exclusive-create semantics, retrying
//! every ~25 ms until its deadline. File creation goes through `<path>.tmp`
//! followed by an atomic rename, so a reader never observes a partial file.
//! The lock file is removed on every exit path of the critical section.

use crate::error::GatewayError;
use anyhow::{Context, Result};
use log::{trace, warn};
use std::{
	ffi::OsString,
	fs, io,
	path::{Path, PathBuf},
	time::Duration,
};
use tokio::time::Instant;

/// Wait between lock acquisition attempts.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(suffix);
	PathBuf::from(name)
}

/// An acquired sentinel lock. Removal happens on drop, which covers both the
/// success and the failure path of the critical section.
pub struct FileLock {
	lock_path: PathBuf,
}

impl FileLock {
	/// Acquires `<path>.lock`, waiting up to `timeout`.
	///
	/// # Errors
	/// Fails with [`GatewayError::LockTimeout`] once the deadline passes.
	pub async fn acquire(path: &Path, timeout: Duration) -> Result<FileLock> {
		let lock_path = with_suffix(path, ".lock");
		let deadline = Instant::now() + timeout;

		loop {
			match fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
				Ok(_) => {
					trace!("acquired lock {lock_path:?}");
					return Ok(FileLock { lock_path });
				}
				Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
					if Instant::now() >= deadline {
						return Err(GatewayError::LockTimeout(path.to_path_buf()).into());
					}
					tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
				}
				Err(error) if error.kind() == io::ErrorKind::NotFound => {
					let parent = path.parent().context("lock target has no parent directory")?;
					fs::create_dir_all(parent)
						.with_context(|| format!("creating directory {parent:?}"))?;
				}
				Err(error) => {
					return Err(error).context(format!("creating lock file {lock_path:?}"));
				}
			}
		}
	}
}

impl Drop for FileLock {
	fn drop(&mut self) {
		if let Err(error) = fs::remove_file(&self.lock_path) {
			if error.kind() != io::ErrorKind::NotFound {
				warn!("failed to remove lock file {:?}: {error}", self.lock_path);
			}
		}
	}
}

/// Writes `data` to `path` under its lock: `<path>.tmp` first, then an
/// atomic rename into place.
pub async fn create_file_with_lock(path: &Path, data: &[u8], timeout: Duration) -> Result<()> {
	let _lock = FileLock::acquire(path, timeout).await?;

	let tmp_path = with_suffix(path, ".tmp");
	fs::write(&tmp_path, data).with_context(|| format!("writing {tmp_path:?}"))?;
	fs::rename(&tmp_path, path).with_context(|| format!("renaming {tmp_path:?} into place"))?;
	Ok(())
}

/// Removes `path` under its lock. A missing target is a no-op; returns
/// whether a file was actually removed.
pub async fn remove_file_with_lock(path: &Path, timeout: Duration) -> Result<bool> {
	let _lock = FileLock::acquire(path, timeout).await?;

	match fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
		Err(error) => Err(error).context(format!("removing {path:?}")),
	}
}

/// Removes every `*.lock` file under `root`, returning the count.
///
/// Meant for startup only: safe solely when no peer process is holding
/// locks in the same data directory.
pub fn sweep_orphan_locks(root: &Path) -> Result<usize> {
	fn sweep(dir: &Path, removed: &mut usize) -> Result<()> {
		for entry in fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))? {
			let path = entry?.path();
			if path.is_dir() {
				sweep(&path, removed)?;
			} else if path.extension().is_some_and(|extension| extension == "lock") {
				trace!("sweeping orphaned lock {path:?}");
				fs::remove_file(&path)?;
				*removed += 1;
			}
		}
		Ok(())
	}

	let mut removed = 0;
	if root.is_dir() {
		sweep(root, &mut removed)?;
	}
	if removed > 0 {
		warn!("removed {removed} orphaned lock files under {root:?}");
	}
	Ok(removed)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn create_is_atomic_and_unlocks() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let path = temp_dir.path().join("deep").join("tile.png");

		create_file_with_lock(&path, b"first", Duration::from_secs(1)).await?;
		assert_eq!(fs::read(&path)?, b"first");
		assert!(!with_suffix(&path, ".lock").exists());
		assert!(!with_suffix(&path, ".tmp").exists());

		// overwrite under the same protocol
		create_file_with_lock(&path, b"second", Duration::from_secs(1)).await?;
		assert_eq!(fs::read(&path)?, b"second");
		Ok(())
	}

	#[tokio::test]
	async fn contention_times_out() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let path = temp_dir.path().join("tile.png");

		// a foreign holder of the lock
		fs::write(with_suffix(&path, ".lock"), b"")?;

		let error = create_file_with_lock(&path, b"data", Duration::from_millis(80))
			.await
			.unwrap_err();
		assert!(matches!(
			GatewayError::find_in(&error),
			Some(GatewayError::LockTimeout(_))
		));
		assert!(!path.exists());
		Ok(())
	}

	#[tokio::test]
	async fn waits_for_release() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let path = temp_dir.path().join("tile.png");
		let lock_path = with_suffix(&path, ".lock");
		fs::write(&lock_path, b"")?;

		let writer = {
			let path = path.clone();
			tokio::spawn(async move { create_file_with_lock(&path, b"late", Duration::from_secs(5)).await })
		};

		tokio::time::sleep(Duration::from_millis(60)).await;
		fs::remove_file(&lock_path)?;

		writer.await??;
		assert_eq!(fs::read(&path)?, b"late");
		Ok(())
	}

	#[tokio::test]
	async fn remove_tolerates_missing() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let path = temp_dir.path().join("tile.png");

		assert!(!remove_file_with_lock(&path, Duration::from_secs(1)).await?);

		fs::write(&path, b"data")?;
		assert!(remove_file_with_lock(&path, Duration::from_secs(1)).await?);
		assert!(!path.exists());
		Ok(())
	}

	#[test]
	fn orphan_sweep() -> Result<()> {
		let temp_dir = assert_fs::TempDir::new()?;
		let root = temp_dir.path();
		fs::create_dir_all(root.join("a/b"))?;
		fs::write(root.join("a/b/1.png.lock"), b"")?;
		fs::write(root.join("a/2.pbf.lock"), b"")?;
		fs::write(root.join("a/b/1.png"), b"tile")?;

		assert_eq!(sweep_orphan_locks(root)?, 2);
		assert!(root.join("a/b/1.png").exists());
		assert_eq!(sweep_orphan_locks(root)?, 0);
		assert_eq!(sweep_orphan_locks(&root.join("missing"))?, 0);
		Ok(())
	}
}
