//! HTTP client for the booking backend, routed through the cache proxy.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;

use crate::cache::{CacheProxy, OutboundRequest, ResponseSnapshot};

/// Build a full URL for an API request.
///
/// Absolute `http(s)` URLs pass through unchanged. Otherwise the configured
/// base URL is prepended; an empty base leaves the path as-is for
/// same-origin deployments behind a dev proxy.
pub fn build_api_url(base: &str, path: &str) -> String {
  if path.starts_with("http") {
    return path.to_string();
  }

  if base.is_empty() {
    return path.to_string();
  }

  if path.starts_with('/') {
    format!("{}{}", base, path)
  } else {
    format!("{}/{}", base, path)
  }
}

/// Backend API client with transparent caching.
///
/// Callers issue ordinary requests and are not aware caching occurred,
/// beyond the latency difference between a hit and a full round-trip.
pub struct ApiClient {
  http: reqwest::Client,
  proxy: Arc<CacheProxy>,
  base_url: String,
}

impl ApiClient {
  pub fn new(base_url: impl Into<String>, proxy: Arc<CacheProxy>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      proxy,
      base_url: base_url.into(),
    })
  }

  /// Issue a GET through the cache proxy and return the response snapshot,
  /// whatever its status.
  pub async fn get(&self, path: &str) -> Result<ResponseSnapshot> {
    let url = build_api_url(&self.base_url, path);
    let request = OutboundRequest::get(url.clone());

    let http = self.http.clone();
    self
      .proxy
      .handle(&request, || async move {
        let response = http
          .get(&url)
          .header("accept", "application/json")
          .send()
          .await
          .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;
        snapshot_response(response).await
      })
      .await
  }

  /// GET and deserialize a JSON body.
  ///
  /// On a non-ok status, surfaces the backend's `message` field when the
  /// body carries one, falling back to the status line.
  pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let response = self.get(path).await?;

    if !response.ok() {
      let message = serde_json::from_slice::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from));

      return Err(match message {
        Some(message) => eyre!(message),
        None => eyre!("API error: {} {}", response.status, response.status_text),
      });
    }

    // 204 No Content deserializes as null
    let body: &[u8] = if response.status == 204 {
      b"null"
    } else {
      &response.body
    };

    serde_json::from_slice(body).map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }
}

/// Capture a network response as a storable snapshot.
async fn snapshot_response(response: reqwest::Response) -> Result<ResponseSnapshot> {
  let status = response.status();
  let headers = response
    .headers()
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = response
    .bytes()
    .await
    .map_err(|e| eyre!("Failed to read response body: {}", e))?
    .to_vec();

  Ok(ResponseSnapshot {
    status: status.as_u16(),
    status_text: status.canonical_reason().unwrap_or("").to_string(),
    headers,
    body,
  })
}
