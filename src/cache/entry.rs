//! Captured response snapshots and the entries stored in the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A network response captured for caching: body bytes, status line and
/// headers, without any freshness metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub status_text: String,
  /// Header name/value pairs in arrival order.
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  /// Whether the captured status is 2xx.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A snapshot plus the timestamp recording when it was stored.
///
/// `stored_at` is set exactly once, when the entry is built for storage;
/// a refresh writes a whole new entry rather than touching an old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub response: ResponseSnapshot,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Wrap a snapshot for storage, stamping it with the current time.
  pub fn new(response: ResponseSnapshot) -> Self {
    Self {
      response,
      stored_at: Utc::now(),
    }
  }
}
