//! Wall-clock milliseconds driven by the tokio timer.
//!
//! Snapshots record unix milliseconds, while every wait in the monitor goes
//! through tokio. Anchoring the wall clock once and advancing it with
//! [`tokio::time::Instant`] keeps both views consistent, including under a
//! paused test runtime.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
	anchor_ms: u64,
	anchor: Instant,
}

impl Clock {
	pub fn new() -> Self {
		let anchor_ms = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_millis() as u64;
		Self {
			anchor_ms,
			anchor: Instant::now(),
		}
	}

	/// Current unix time in milliseconds.
	pub fn now_ms(&self) -> u64 {
		self.anchor_ms + self.anchor.elapsed().as_millis() as u64
	}

	/// Time since `since_ms`; zero if `since_ms` lies in the future.
	pub fn elapsed_since(&self, since_ms: u64) -> Duration {
		Duration::from_millis(self.now_ms().saturating_sub(since_ms))
	}
}

impl Default for Clock {
	fn default() -> Self {
		Self::new()
	}
}
