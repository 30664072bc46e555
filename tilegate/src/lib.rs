//! The gateway's job layer: the bounded-concurrency coverage operator, the
//! read-through cache protocol, the persisted seed/cleanup configuration
//! and the seed / clean / summary drivers.

pub mod cache;
pub mod config;
pub mod jobs;
pub mod operator;
pub mod origin;
