//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::keys::ResourceKind;

/// Trait for remote records that can be cached and accumulated in a search window.
///
/// Implementors name the resource kind they are listed under.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Resource kind this record is listed and cached under
  fn kind() -> ResourceKind;
}

/// Result from a cached read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: PageSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: PageSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: PageSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
  /// Fetched from the remote API during this call
  Network,
  /// Read from the cache store
  Cache,
  /// Already present in the in-memory search window
  Window,
}
