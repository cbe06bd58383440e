//! Offline cache for booking API reads.
//!
//! Mirrors the site's service worker behavior:
//! - GET requests to an allow-list of API paths are answered from cache
//!   while fresh (5 minute TTL) and refetched synchronously once stale
//! - everything else passes through to the network untouched
//! - entries live in a versioned namespace; bumping the version drops
//!   every previous generation during activation

mod entry;
mod policy;
mod proxy;
mod store;

pub use entry::{CacheEntry, ResponseSnapshot};
pub use policy::FreshnessPolicy;
pub use proxy::{CacheProxy, OutboundRequest, DEFAULT_CACHED_PATHS, DEFAULT_CACHE_VERSION};
pub use store::{CacheStore, MemoryStore, SqliteStore};
