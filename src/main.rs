mod cache;
mod cases;
mod commands;
mod config;
mod error;
mod logging;
mod search;
mod session;
#[cfg(test)]
mod testing;
mod uploads;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing::info;

use cache::{CacheStore, MemoryStorage, NoopStorage, SqliteStorage};
use cases::RestTransport;
use commands::Command;
use config::{CacheBackend, Config};
use session::Session;

#[derive(Parser, Debug)]
#[command(name = "casesync")]
#[command(about = "Cached, incremental access to a support case API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/casesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

fn open_cache(config: &Config) -> Result<CacheStore> {
  let store = match config.cache.backend {
    CacheBackend::Sqlite => CacheStore::new(SqliteStorage::open()?),
    CacheBackend::Memory => CacheStore::new(MemoryStorage::new()),
    CacheBackend::None => CacheStore::new(NoopStorage),
  };
  Ok(
    store
      .with_ttl(config.ttl())
      .with_capacity(config.cache.capacity),
  )
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  let config = Config::load(args.config.as_deref())?;
  let cache = open_cache(&config)?;

  // Clearing needs no credentials
  if let Command::ClearCache = args.command {
    cache.clear();
    println!("cache cleared");
    return Ok(());
  }

  let sweeper = cache.spawn_sweeper(config.sweep_interval());

  let transport = RestTransport::new(&config)?;
  let session = Session::new(transport, cache, config.search.page_size);
  session.authenticate();

  let result = commands::run(args.command, &session, &config.api.username).await;

  sweeper.abort();
  let stats = session.cache().sweep();
  info!(expired = stats.expired, evicted = stats.evicted, "final cache sweep");

  result
}
