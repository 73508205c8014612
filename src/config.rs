use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  pub username: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// On-disk cache in the user data directory
  #[default]
  Sqlite,
  /// Process-lifetime cache
  Memory,
  /// Caching disabled
  None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// Lifetime of a cached response
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Maximum number of entries kept after a sweep (0 = unbounded)
  #[serde(default = "default_capacity")]
  pub capacity: usize,
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::default(),
      ttl_secs: default_ttl_secs(),
      capacity: default_capacity(),
      sweep_interval_secs: default_sweep_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
  #[serde(default = "default_page_size")]
  pub page_size: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
    }
  }
}

/// One year
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_ttl_secs() -> u64 {
  300
}

fn default_capacity() -> usize {
  2000
}

fn default_sweep_interval_secs() -> u64 {
  30
}

fn default_page_size() -> usize {
  50
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./casesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/casesync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/casesync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("casesync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("casesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.search.page_size == 0 {
      return Err(eyre!("search.page_size must be at least 1"));
    }
    Ok(config)
  }

  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache.ttl_secs.min(MAX_TTL_SECS) as i64)
  }

  pub fn sweep_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.cache.sweep_interval_secs.max(1))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks CASESYNC_API_TOKEN first, then CASES_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("CASESYNC_API_TOKEN")
      .or_else(|_| std::env::var("CASES_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set CASESYNC_API_TOKEN or CASES_API_TOKEN environment variable.")
      })
  }
}
