//! Fixed-window rate limiter for the polling endpoints
//!
//! Dashboard clients poll for updates; a runaway poller must not turn the
//! telemetry store into load on its own host.

use crate::error::CoreError;
use dashmap::DashMap;
use std::time::{Duration, Instant};

pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, (Instant, u32)>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Count one request for `key`, failing with `RateLimited` once the
    /// window's budget is spent.
    pub fn check(&self, key: &str) -> Result<(), CoreError> {
        let now = Instant::now();
        let mut slot = self
            .windows
            .entry(key.to_string())
            .or_insert((now, 0));
        let (window_start, count) = slot.value_mut();

        if now.duration_since(*window_start) >= self.window {
            *window_start = now;
            *count = 0;
        }

        if *count >= self.limit {
            return Err(CoreError::RateLimited);
        }

        *count += 1;
        Ok(())
    }
}
