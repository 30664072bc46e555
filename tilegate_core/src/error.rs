//! Error kinds observable at the cache-engine boundary.
//!
//! The crates in this workspace propagate `anyhow::Result` everywhere; the
//! kinds below are the few failures callers must be able to tell apart
//! (fall through to origin on a miss, surface a timeout, refuse an
//! operation). They travel inside `anyhow::Error` and are recovered with
//! [`GatewayError::find_in`].

use std::{error::Error, fmt, path::PathBuf, time::Duration};

/// Failure kinds that cross the cache-engine boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
	/// Lookup miss on a tile key. Recovered by the read-through path.
	TileNotFound,
	/// A sentinel lock file could not be acquired before the deadline.
	LockTimeout(PathBuf),
	/// A database call stayed busy until its deadline.
	DbTimeout(Duration),
	/// The origin kept failing after the configured number of attempts.
	OriginUnavailable(String),
	/// The origin answered 204/404: no tile exists. Recovered as "no store".
	OriginEmpty,
	/// A persisted configuration document failed validation at load.
	SchemaInvalid(String),
	/// The operation is not implemented for the addressed back-end.
	UnsupportedOperation(String),
}

impl fmt::Display for GatewayError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			GatewayError::TileNotFound => write!(f, "tile not found"),
			GatewayError::LockTimeout(path) => write!(f, "timeout acquiring lock for {path:?}"),
			GatewayError::DbTimeout(timeout) => write!(f, "database stayed busy for {timeout:?}"),
			GatewayError::OriginUnavailable(msg) => write!(f, "origin unavailable: {msg}"),
			GatewayError::OriginEmpty => write!(f, "origin has no tile"),
			GatewayError::SchemaInvalid(msg) => write!(f, "invalid configuration: {msg}"),
			GatewayError::UnsupportedOperation(op) => write!(f, "unsupported operation: {op}"),
		}
	}
}

impl Error for GatewayError {}

impl GatewayError {
	/// Looks for a `GatewayError` anywhere in an `anyhow` error chain.
	pub fn find_in(error: &anyhow::Error) -> Option<&GatewayError> {
		error.chain().find_map(|cause| cause.downcast_ref::<GatewayError>())
	}

	/// True if the chain bottoms out in a tile-lookup miss.
	pub fn is_not_found(error: &anyhow::Error) -> bool {
		matches!(Self::find_in(error), Some(GatewayError::TileNotFound))
	}
}
