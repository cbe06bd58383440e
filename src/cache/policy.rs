//! Freshness policy for cached responses.

use chrono::{DateTime, Duration, Utc};

/// How long a cached API response stays fresh (5 minutes).
pub const API_CACHE_TTL_MS: i64 = 5 * 60 * 1000;

/// Decides whether a stored entry is still usable without a refetch.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
  ttl: Duration,
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self {
      ttl: Duration::milliseconds(API_CACHE_TTL_MS),
    }
  }
}

impl FreshnessPolicy {
  pub fn new() -> Self {
    Self::default()
  }

  /// Use a non-default TTL.
  #[allow(dead_code)]
  pub fn with_ttl(ttl: Duration) -> Self {
    Self { ttl }
  }

  /// `true` while the elapsed time since `stored_at` is below the TTL.
  ///
  /// There is no clock-skew correction: a timestamp in the future counts
  /// as fresh until the TTL elapses from that future point.
  pub fn is_fresh(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - stored_at < self.ttl
  }
}
