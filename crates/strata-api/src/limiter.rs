//! Per-key request limiting over fixed one-minute windows.

use std::time::{Duration, Instant};

use dashmap::DashMap;

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
  started: Instant,
  count:   u32,
}

#[derive(Default)]
pub struct RateLimiter {
  windows: DashMap<i64, Window>,
}

impl RateLimiter {
  pub fn new() -> Self { Self::default() }

  /// Count one request for `key_id`. A limit of zero disables limiting.
  ///
  /// On rejection, returns the number of seconds until the window resets.
  pub fn check(&self, key_id: i64, limit: u32) -> Result<(), u64> {
    self.check_at(key_id, limit, Instant::now())
  }

  fn check_at(&self, key_id: i64, limit: u32, now: Instant) -> Result<(), u64> {
    if limit == 0 {
      return Ok(());
    }
    let mut window = self.windows.entry(key_id).or_insert(Window {
      started: now,
      count:   0,
    });
    if now.duration_since(window.started) >= WINDOW {
      window.started = now;
      window.count = 0;
    }
    if window.count >= limit {
      let elapsed = now.duration_since(window.started);
      let remaining = WINDOW.saturating_sub(elapsed).as_secs().max(1);
      return Err(remaining);
    }
    window.count += 1;
    Ok(())
  }
}
