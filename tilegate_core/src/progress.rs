//! Progress reporting for long-running jobs.
//!
//! A [`Progress`] handle counts completed work items and logs a line at
//! every decile. Methods take `&self` so many workers can report into one
//! shared handle.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Progress {
	message: String,
	max_value: u64,
	position: AtomicU64,
}

impl Progress {
	pub fn new(message: &str, max_value: u64) -> Progress {
		info!("{message}: 0/{max_value}");
		Progress {
			message: message.to_string(),
			max_value,
			position: AtomicU64::new(0),
		}
	}

	fn decile(&self, position: u64) -> u64 {
		if self.max_value == 0 {
			10
		} else {
			position.min(self.max_value) * 10 / self.max_value
		}
	}

	pub fn inc(&self, delta: u64) {
		let position = self.position.fetch_add(delta, Ordering::Relaxed) + delta;
		if self.decile(position) > self.decile(position - delta) {
			info!(
				"{}: {}/{} ({}%)",
				self.message,
				position.min(self.max_value),
				self.max_value,
				self.decile(position) * 10
			);
		}
	}

	pub fn position(&self) -> u64 {
		self.position.load(Ordering::Relaxed)
	}

	pub fn finish(&self) {
		info!("{}: finished {}/{}", self.message, self.position(), self.max_value);
	}
}
