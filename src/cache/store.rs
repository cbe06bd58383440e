//! Cache store trait plus in-memory and SQLite implementations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use super::entry::CacheEntry;

/// Storage backend for cached responses.
///
/// Entries are grouped into namespaces, one per deployment generation.
/// Individual operations are atomic, but nothing spans a lookup-then-store
/// sequence; concurrent writers to the same key race last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Look up the entry for a key, if any.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry under a key, replacing any previous one.
  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()>;

  /// List every namespace that currently holds entries.
  fn list_namespaces(&self) -> Result<Vec<String>>;

  /// Drop a namespace and everything in it.
  fn delete_namespace(&self, namespace: &str) -> Result<()>;
}

/// In-process store backed by a HashMap. Used in tests and when persistence
/// is disabled.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      entries
        .get(&(namespace.to_string(), key.to_string()))
        .cloned(),
    )
  }

  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert((namespace.to_string(), key.to_string()), entry.clone());
    Ok(())
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut namespaces: Vec<String> = entries.keys().map(|(ns, _)| ns.clone()).collect();
    namespaces.sort();
    namespaces.dedup();
    Ok(namespaces)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.retain(|(ns, _), _| ns != namespace);
    Ok(())
  }
}

/// SQLite-backed persistent store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open a transient store for tests.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open cache database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  /// Run database migrations for the cache table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
-- Cached response snapshots, one row per (namespace, request URL)
CREATE TABLE IF NOT EXISTS response_cache (
    namespace TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    entry BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_namespace
    ON response_cache(namespace);
"#;

/// SHA256 hash of the request URL, for a stable fixed-length key.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheStore for SqliteStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT entry FROM response_cache WHERE namespace = ? AND key_hash = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let data: Option<Vec<u8>> = stmt
      .query_row(params![namespace, key_hash(key)], |row| row.get(0))
      .ok();

    match data {
      Some(data) => {
        let entry: CacheEntry = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cache entry: {}", e))?;
        Ok(Some(entry))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(entry).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (namespace, key_hash, url, entry, stored_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          namespace,
          key_hash(key),
          key,
          data,
          entry.stored_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT namespace FROM response_cache ORDER BY namespace")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let namespaces: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(namespaces)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    Ok(())
  }
}
