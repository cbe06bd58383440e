//! Request interception and the cache-or-fetch orchestration.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use color_eyre::Result;
use tracing::{debug, warn};

use super::entry::{CacheEntry, ResponseSnapshot};
use super::policy::FreshnessPolicy;
use super::store::CacheStore;

/// Current cache namespace. Bumping this on deployment drops every entry
/// from previous generations during activation.
pub const DEFAULT_CACHE_VERSION: &str = "datafirst-cache-v1";

/// API paths that participate in caching.
pub const DEFAULT_CACHED_PATHS: &[&str] = &["/api/availability/next"];

/// An outgoing request as seen by the proxy.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
  pub method: String,
  pub url: String,
}

impl OutboundRequest {
  /// A GET request for the given URL.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
    }
  }
}

/// Intercepts outgoing requests and serves allow-listed GET reads from a
/// versioned cache.
///
/// Fresh entries are returned without any network contact; stale or missing
/// entries trigger a blocking refetch whose ok response replaces the entry.
/// Everything else passes through to the network untouched. Concurrent
/// requests for the same key are not coalesced; both fetch, and the second
/// store wins.
pub struct CacheProxy {
  store: Arc<dyn CacheStore>,
  policy: FreshnessPolicy,
  namespace: String,
  cached_paths: Vec<String>,
}

impl CacheProxy {
  /// Create a proxy over the given store.
  ///
  /// Construction is installation: the proxy intercepts requests
  /// immediately, with no handoff delay for in-flight work.
  pub fn new(
    store: Arc<dyn CacheStore>,
    namespace: impl Into<String>,
    cached_paths: Vec<String>,
  ) -> Self {
    Self {
      store,
      policy: FreshnessPolicy::new(),
      namespace: namespace.into(),
      cached_paths,
    }
  }

  /// Use a non-default freshness policy.
  #[allow(dead_code)]
  pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Delete cached namespaces left over from previous deployments.
  ///
  /// Cleanup is best-effort: a namespace that fails to delete is logged
  /// and skipped, and never blocks activation of the current one.
  pub fn activate(&self) {
    let namespaces = match self.store.list_namespaces() {
      Ok(namespaces) => namespaces,
      Err(e) => {
        warn!(error = %e, "could not enumerate cache namespaces");
        return;
      }
    };

    for namespace in namespaces {
      if namespace == self.namespace {
        continue;
      }
      match self.store.delete_namespace(&namespace) {
        Ok(()) => debug!(namespace = %namespace, "deleted stale cache namespace"),
        Err(e) => warn!(namespace = %namespace, error = %e, "failed to delete stale cache namespace"),
      }
    }
  }

  /// Handle one outgoing request.
  ///
  /// `forward` is the continue-to-network callback; it is invoked at most
  /// once. Requests outside the allow-list (and non-GET requests) are
  /// forwarded untouched with no cache reads or writes. For allow-listed
  /// requests:
  ///
  /// 1. A fresh cached entry is returned with zero network calls.
  /// 2. A stale or missing entry triggers a blocking fetch; the ok
  ///    response replaces the entry, a non-ok response is never stored.
  /// 3. The caller always receives the network response on the fetch
  ///    path; a store failure is logged and absorbed.
  pub async fn handle<F, Fut>(&self, request: &OutboundRequest, forward: F) -> Result<ResponseSnapshot>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResponseSnapshot>>,
  {
    if !self.is_cacheable(request) {
      return forward().await;
    }

    let key = request.url.as_str();
    match self.store.get(&self.namespace, key) {
      Ok(Some(entry)) if self.policy.is_fresh(entry.stored_at, Utc::now()) => {
        debug!(url = %request.url, "using cached response");
        return Ok(entry.response);
      }
      Ok(_) => {}
      Err(e) => {
        // An unreadable entry is treated as a miss.
        warn!(url = %request.url, error = %e, "cache lookup failed");
      }
    }

    debug!(url = %request.url, "fetching fresh data");
    let response = forward().await?;

    if response.ok() {
      let entry = CacheEntry::new(response.clone());
      if let Err(e) = self.store.put(&self.namespace, key, &entry) {
        // Must never surface as a request failure.
        warn!(url = %request.url, error = %e, "failed to store cached response");
      }
    }

    Ok(response)
  }

  /// Only GET reads to allow-listed paths participate in caching.
  fn is_cacheable(&self, request: &OutboundRequest) -> bool {
    if !request.method.eq_ignore_ascii_case("GET") {
      return false;
    }

    let path = request_path(&request.url);
    self.cached_paths.iter().any(|p| path.contains(p.as_str()))
  }
}

/// Path component of a URL. Relative URLs are already paths, minus any
/// query or fragment.
fn request_path(url: &str) -> String {
  match url::Url::parse(url) {
    Ok(parsed) => parsed.path().to_string(),
    Err(_) => url
      .split(['?', '#'])
      .next()
      .unwrap_or(url)
      .to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::MemoryStore;
  use chrono::Duration;
  use color_eyre::eyre::eyre;
  use futures::future::BoxFuture;
  use std::sync::atomic::{AtomicU32, Ordering};

  const SLOT_URL: &str = "https://api.datafirst.test/api/availability/next";

  fn snapshot(status: u16, body: &str) -> ResponseSnapshot {
    ResponseSnapshot {
      status,
      status_text: if status == 200 { "OK" } else { "" }.to_string(),
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  /// Store wrapper that counts reads and writes, and can be made to fail
  /// on write.
  struct InstrumentedStore {
    inner: MemoryStore,
    gets: AtomicU32,
    puts: AtomicU32,
    fail_puts: bool,
  }

  impl InstrumentedStore {
    fn new() -> Self {
      Self {
        inner: MemoryStore::new(),
        gets: AtomicU32::new(0),
        puts: AtomicU32::new(0),
        fail_puts: false,
      }
    }

    fn failing() -> Self {
      Self {
        fail_puts: true,
        ..Self::new()
      }
    }
  }

  impl CacheStore for InstrumentedStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
      self.gets.fetch_add(1, Ordering::SeqCst);
      self.inner.get(namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
      self.puts.fetch_add(1, Ordering::SeqCst);
      if self.fail_puts {
        return Err(eyre!("disk full"));
      }
      self.inner.put(namespace, key, entry)
    }

    fn list_namespaces(&self) -> Result<Vec<String>> {
      self.inner.list_namespaces()
    }

    fn delete_namespace(&self, namespace: &str) -> Result<()> {
      self.inner.delete_namespace(namespace)
    }
  }

  fn proxy_over(store: Arc<InstrumentedStore>) -> CacheProxy {
    CacheProxy::new(
      store,
      "datafirst-cache-v1",
      vec!["/api/availability/next".to_string()],
    )
  }

  /// Seed the store with an entry whose timestamp is `age` in the past.
  fn seed_entry(store: &InstrumentedStore, url: &str, body: &str, age: Duration) {
    let mut entry = CacheEntry::new(snapshot(200, body));
    entry.stored_at = Utc::now() - age;
    store.inner.put("datafirst-cache-v1", url, &entry).unwrap();
  }

  fn counting_fetch(
    calls: Arc<AtomicU32>,
    response: ResponseSnapshot,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<ResponseSnapshot>> {
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      Box::pin(async move { Ok(response) })
    }
  }

  #[tokio::test]
  async fn test_non_allowlisted_request_bypasses_cache() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let request = OutboundRequest::get("https://api.datafirst.test/api/bookings");
    let response = proxy
      .handle(&request, counting_fetch(calls.clone(), snapshot(200, "[]")))
      .await
      .unwrap();

    assert_eq!(response, snapshot(200, "[]"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // No cache reads or writes at all
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_non_get_request_bypasses_cache() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let request = OutboundRequest {
      method: "POST".to_string(),
      url: SLOT_URL.to_string(),
    };
    proxy
      .handle(&request, counting_fetch(calls.clone(), snapshot(201, "{}")))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_fresh_hit_makes_no_network_call() {
    let store = Arc::new(InstrumentedStore::new());
    seed_entry(&store, SLOT_URL, "{\"slot\":\"10:00\"}", Duration::minutes(1));

    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "fresh")),
      )
      .await
      .unwrap();

    assert_eq!(response.body, b"{\"slot\":\"10:00\"}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_stale_entry_refetched_and_overwritten() {
    let store = Arc::new(InstrumentedStore::new());
    seed_entry(&store, SLOT_URL, "old", Duration::minutes(6));

    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let start = Utc::now();

    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "new")),
      )
      .await
      .unwrap();

    assert_eq!(response.body, b"new");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);

    let entry = store.get("datafirst-cache-v1", SLOT_URL).unwrap().unwrap();
    assert_eq!(entry.response.body, b"new");
    assert!(entry.stored_at >= start);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "{\"slot\":\"09:30\"}")),
      )
      .await
      .unwrap();

    assert!(response.ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.get("datafirst-cache-v1", SLOT_URL).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_non_ok_response_is_never_stored() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());

    // Miss path: nothing stored
    let calls = Arc::new(AtomicU32::new(0));
    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(503, "unavailable")),
      )
      .await
      .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);

    // Stale path: the old entry is kept as-is
    seed_entry(&store, SLOT_URL, "old", Duration::minutes(6));
    proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(500, "boom")),
      )
      .await
      .unwrap();
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    let entry = store.get("datafirst-cache-v1", SLOT_URL).unwrap().unwrap();
    assert_eq!(entry.response.body, b"old");
  }

  #[tokio::test]
  async fn test_store_failure_does_not_surface() {
    let store = Arc::new(InstrumentedStore::failing());
    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "{\"slot\":\"10:00\"}")),
      )
      .await
      .unwrap();

    // The write was attempted and failed, but the caller still gets the
    // network response unchanged.
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(response, snapshot(200, "{\"slot\":\"10:00\"}"));
  }

  #[tokio::test]
  async fn test_network_failure_propagates() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());

    let result = proxy
      .handle(&OutboundRequest::get(SLOT_URL), || async {
        Err(eyre!("connection refused"))
      })
      .await;

    assert!(result.is_err());
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_activation_deletes_stale_namespaces() {
    let store = Arc::new(InstrumentedStore::new());
    store
      .inner
      .put("datafirst-cache-v1", "/a", &CacheEntry::new(snapshot(200, "a")))
      .unwrap();
    store
      .inner
      .put("datafirst-cache-v2", "/a", &CacheEntry::new(snapshot(200, "a")))
      .unwrap();

    let proxy = CacheProxy::new(store.clone(), "datafirst-cache-v2", vec![]);
    proxy.activate();

    assert_eq!(
      store.list_namespaces().unwrap(),
      vec!["datafirst-cache-v2".to_string()]
    );

    // Nothing stale left: activation deletes nothing and does not fail
    proxy.activate();
    assert_eq!(
      store.list_namespaces().unwrap(),
      vec!["datafirst-cache-v2".to_string()]
    );
  }

  #[tokio::test]
  async fn test_query_string_does_not_defeat_allowlist() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let url = format!("{}?tz=UTC", SLOT_URL);
    proxy
      .handle(
        &OutboundRequest::get(&url),
        counting_fetch(calls.clone(), snapshot(200, "{}")),
      )
      .await
      .unwrap();

    // Matched the allow-list and was cached under the full URL key
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    assert!(store.get("datafirst-cache-v1", &url).unwrap().is_some());
  }

  /// Full lifecycle: miss at t=0, hit within the TTL, refetch past it.
  #[tokio::test]
  async fn test_end_to_end_freshness_cycle() {
    let store = Arc::new(InstrumentedStore::new());
    let proxy = proxy_over(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    // t=0: miss, one network call, entry stored
    proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "first")),
      )
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t=120s: back-date the entry two minutes; still fresh, zero calls
    backdate(&store, SLOT_URL, Duration::seconds(120));
    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "second")),
      )
      .await
      .unwrap();
    assert_eq!(response.body, b"first");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t=400s: past the 300s TTL; one call, entry overwritten
    backdate(&store, SLOT_URL, Duration::seconds(400));
    let start = Utc::now();
    let response = proxy
      .handle(
        &OutboundRequest::get(SLOT_URL),
        counting_fetch(calls.clone(), snapshot(200, "second")),
      )
      .await
      .unwrap();
    assert_eq!(response.body, b"second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let entry = store.get("datafirst-cache-v1", SLOT_URL).unwrap().unwrap();
    assert_eq!(entry.response.body, b"second");
    assert!(entry.stored_at >= start);
  }

  /// Rewrite the stored entry's timestamp to `age` in the past, keeping
  /// the response as-is.
  fn backdate(store: &InstrumentedStore, url: &str, age: Duration) {
    let mut entry = store.inner.get("datafirst-cache-v1", url).unwrap().unwrap();
    entry.stored_at = Utc::now() - age;
    store.inner.put("datafirst-cache-v1", url, &entry).unwrap();
  }
}
