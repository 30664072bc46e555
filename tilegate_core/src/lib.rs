//! Core types and helpers for the tilegate cache engine: tile addressing,
//! coverage algebra, format sniffing, metadata records, file locking and the
//! retrying SQLite adapter.

pub mod error;
pub mod progress;
pub mod types;
pub use types::*;
pub mod utils;
