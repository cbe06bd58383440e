mod cache;
mod client;
mod config;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Fetch booking API endpoints through the offline cache")]
#[command(version)]
struct Args {
  /// API path or absolute URL to request (e.g. /api/availability/next)
  path: String,

  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep entries in memory only; do not touch the on-disk cache
  #[arg(long)]
  no_store: bool,

  /// Pretty-print the response as JSON
  #[arg(long)]
  json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offcache=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let store: Arc<dyn cache::CacheStore> = if args.no_store {
    Arc::new(cache::MemoryStore::new())
  } else {
    match &config.cache_db {
      Some(path) => Arc::new(cache::SqliteStore::open_at(path)?),
      None => Arc::new(cache::SqliteStore::open()?),
    }
  };

  let proxy = Arc::new(cache::CacheProxy::new(
    store,
    config.cache_version.clone(),
    config.cached_paths.clone(),
  ));

  // Activation drops cached generations from previous deployments
  proxy.activate();

  let client = client::ApiClient::new(config.api_url.clone(), proxy)?;

  if args.json {
    let value: serde_json::Value = client.get_json(&args.path).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    return Ok(());
  }

  let response = client.get(&args.path).await?;
  if !response.ok() {
    eprintln!("{} {}", response.status, response.status_text);
  }
  print!("{}", String::from_utf8_lossy(&response.body));

  Ok(())
}
