use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_CACHED_PATHS, DEFAULT_CACHE_VERSION};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Backend base URL; empty means same-origin relative paths (local dev
  /// behind a proxy).
  pub api_url: String,

  /// Cache namespace version. Bump on deployment to invalidate every
  /// previously cached entry.
  pub cache_version: String,

  /// API path substrings that participate in caching. Adding entries here
  /// is the supported way to cache more endpoints.
  pub cached_paths: Vec<String>,

  /// Override the cache database location (default:
  /// $XDG_DATA_HOME/offcache/cache.db).
  pub cache_db: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_url: String::new(),
      cache_version: DEFAULT_CACHE_VERSION.to_string(),
      cached_paths: DEFAULT_CACHED_PATHS.iter().map(|s| s.to_string()).collect(),
      cache_db: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  ///
  /// Every field has a default, so a missing config file is not an error.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
