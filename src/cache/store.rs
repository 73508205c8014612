//! Keyed response cache with per-entry expiry and a capacity bound.

use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::keys::{KeyPattern, QueryKey};
use super::storage::{CacheStorage, StoredEntry};
use super::traits::CacheResult;

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
  pub expired: usize,
  pub evicted: usize,
}

/// Keyed cache over an injectable storage backend.
///
/// Every operation succeeds from the caller's point of view. Backend failures
/// are logged and degrade to a miss (reads) or a no-op (writes), so a broken
/// cache only ever costs extra network calls.
///
/// Capacity is not enforced on write. `sweep` (run periodically by
/// `spawn_sweeper`) drops expired entries and then recycles the oldest
/// insertions until the store is back within capacity.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  /// Lifetime of entries written with `put`
  ttl: Duration,
  /// Maximum number of entries kept after a sweep; 0 means unbounded
  capacity: usize,
  seq: Arc<AtomicU64>,
}

impl CacheStore {
  /// Create a store over the given backend with a 5 minute TTL and no capacity bound.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self::from_arc(Arc::new(storage))
  }

  pub fn from_arc(storage: Arc<dyn CacheStorage>) -> Self {
    let seq = storage.max_seq().unwrap_or_else(|e| {
      warn!(error = %e, "cache backend unreadable, restarting sequence");
      0
    });
    Self {
      storage,
      ttl: Duration::minutes(5),
      capacity: 0,
      seq: Arc::new(AtomicU64::new(seq)),
    }
  }

  /// Set the default TTL for entries.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Set the capacity enforced by `sweep`.
  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Store a value under the default TTL.
  pub fn put<T: Serialize>(&self, key: &impl QueryKey, value: &T) {
    self.put_with_ttl(key, value, self.ttl);
  }

  /// Store a value, replacing any existing entry and resetting its expiry.
  pub fn put_with_ttl<T: Serialize>(&self, key: &impl QueryKey, value: &T, ttl: Duration) {
    let cache_key = key.cache_key();
    let data = match serde_json::to_vec(value) {
      Ok(data) => data,
      Err(e) => {
        warn!(key = %cache_key, error = %e, "failed to serialize cache value, skipping write");
        return;
      }
    };

    let inserted_at = Utc::now();
    let entry = StoredEntry {
      data,
      inserted_at,
      expires_at: inserted_at + ttl,
      seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
    };

    if let Err(e) = self.storage.put(&cache_key, entry) {
      warn!(key = %cache_key, error = %e, "cache write failed");
    }
  }

  /// Look up a value. Missing, expired and undecodable entries are all a miss;
  /// the latter two are removed on the way out.
  pub fn get<T: DeserializeOwned>(&self, key: &impl QueryKey) -> Option<CacheResult<T>> {
    let cache_key = key.cache_key();
    let entry = match self.storage.get(&cache_key) {
      Ok(Some(entry)) => entry,
      Ok(None) => {
        debug!(key = %cache_key, "cache miss");
        return None;
      }
      Err(e) => {
        warn!(key = %cache_key, error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    if entry.is_expired(Utc::now()) {
      debug!(key = %cache_key, "cache entry expired");
      self.remove_key(&cache_key);
      return None;
    }

    match serde_json::from_slice(&entry.data) {
      Ok(value) => {
        debug!(key = %cache_key, "cache hit");
        Some(CacheResult::from_cache(value, entry.inserted_at))
      }
      Err(e) => {
        warn!(key = %cache_key, error = %e, "undecodable cache entry, dropping");
        self.remove_key(&cache_key);
        None
      }
    }
  }

  /// Remove one entry. No-op if absent.
  pub fn remove(&self, key: &impl QueryKey) {
    self.remove_key(&key.cache_key());
  }

  fn remove_key(&self, cache_key: &str) {
    if let Err(e) = self.storage.remove(cache_key) {
      warn!(key = %cache_key, error = %e, "cache remove failed");
    }
  }

  /// Remove every entry whose key satisfies the predicate.
  pub fn remove_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
    match self.storage.remove_matching(&predicate) {
      Ok(removed) => removed,
      Err(e) => {
        // Unknown which entries matched, so none of them may survive
        warn!(error = %e, "cache remove_matching failed, clearing cache");
        self.clear();
        0
      }
    }
  }

  /// Remove every entry the pattern matches.
  pub fn remove_pattern(&self, pattern: &KeyPattern) -> usize {
    match pattern {
      KeyPattern::Exact(key) => {
        let existed = matches!(self.storage.get(key), Ok(Some(_)));
        self.remove_key(key);
        usize::from(existed)
      }
      KeyPattern::Prefix(_) => self.remove_matching(|key| pattern.matches(key)),
    }
  }

  /// Drop everything.
  pub fn clear(&self) {
    match self.storage.clear() {
      Ok(()) => info!("cache cleared"),
      Err(e) => warn!(error = %e, "cache clear failed"),
    }
  }

  /// Number of entries currently held, expired ones included.
  pub fn len(&self) -> usize {
    self.storage.len().unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop expired entries, then evict oldest insertions while over capacity.
  pub fn sweep(&self) -> SweepStats {
    let mut stats = SweepStats::default();

    match self.storage.remove_expired(Utc::now()) {
      Ok(expired) => stats.expired = expired,
      Err(e) => warn!(error = %e, "cache expiry sweep failed"),
    }

    if self.capacity > 0 {
      let len = self.len();
      if len > self.capacity {
        match self.storage.oldest_keys(len - self.capacity) {
          Ok(keys) => {
            for key in &keys {
              self.remove_key(key);
            }
            stats.evicted = keys.len();
          }
          Err(e) => warn!(error = %e, "cache eviction scan failed"),
        }
      }
    }

    if stats != SweepStats::default() {
      debug!(
        expired = stats.expired,
        evicted = stats.evicted,
        "cache sweep"
      );
    }
    stats
  }

  /// Run `sweep` on a fixed interval until the handle is aborted.
  pub fn spawn_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
    let store = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        store.sweep();
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::keys::CaseQueryKey;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::traits::PageSource;

  fn case_key(n: u32) -> CaseQueryKey {
    CaseQueryKey::Case {
      number: n.to_string(),
    }
  }

  #[test]
  fn test_put_then_get() {
    let store = CacheStore::new(MemoryStorage::new());
    store.put(&case_key(1), &vec!["a", "b"]);

    let hit = store.get::<Vec<String>>(&case_key(1)).unwrap();
    assert_eq!(hit.data, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(hit.source, PageSource::Cache);
    assert!(hit.cached_at.is_some());
  }

  #[test]
  fn test_failed_scan_clears_everything() {
    use crate::cache::storage::SqliteStorage;

    let path = std::env::temp_dir().join(format!("casesync-scan-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let store = CacheStore::new(SqliteStorage::open_at(&path).unwrap());
    store.put(&case_key(1), &1u32);
    rusqlite::Connection::open(&path)
      .unwrap()
      .execute(
        "INSERT INTO cache_entries (cache_key, data, inserted_at, expires_at, seq)
         VALUES (X'FF00', X'00', '2024-01-01T00:00:00.000000Z', '2099-01-01T00:00:00.000000Z', 9)",
        [],
      )
      .unwrap();

    assert_eq!(store.remove_pattern(&KeyPattern::Prefix("filter:".to_string())), 0);
    assert!(store.get::<u32>(&case_key(1)).is_none());
    assert!(store.is_empty());

    drop(store);
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_overwrite_replaces_value() {
    let store = CacheStore::new(MemoryStorage::new());
    store.put(&case_key(1), &1u32);
    store.put(&case_key(1), &2u32);
    assert_eq!(store.get::<u32>(&case_key(1)).unwrap().data, 2);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_expired_entry_is_miss_and_removed() {
    let store = CacheStore::new(MemoryStorage::new());
    store.put_with_ttl(&case_key(1), &1u32, Duration::zero());

    assert!(store.get::<u32>(&case_key(1)).is_none());
    assert_eq!(store.len(), 0);
  }

  #[test]
  fn test_undecodable_entry_is_miss() {
    let store = CacheStore::new(MemoryStorage::new());
    store.put(&case_key(1), &"text");
    assert!(store.get::<u32>(&case_key(1)).is_none());
    assert!(store.is_empty());
  }

  #[test]
  fn test_remove_absent_is_noop() {
    let store = CacheStore::new(MemoryStorage::new());
    store.remove(&case_key(9));
    store.put(&case_key(1), &1u32);
    store.remove(&case_key(1));
    store.remove(&case_key(1));
    assert!(store.is_empty());
  }

  #[test]
  fn test_remove_pattern_prefix() {
    let store = CacheStore::new(MemoryStorage::new());
    store.put(&case_key(1), &1u32);
    store.put(&case_key(2), &2u32);
    store.put(
      &CaseQueryKey::Comments {
        case: "1".to_string(),
      },
      &3u32,
    );

    let removed = store.remove_pattern(&KeyPattern::Prefix("case:".to_string()));
    assert_eq!(removed, 2);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_capacity_not_enforced_until_sweep() {
    let store = CacheStore::new(MemoryStorage::new()).with_capacity(2);
    for n in 1..=4 {
      store.put(&case_key(n), &n);
    }
    assert_eq!(store.len(), 4);

    let stats = store.sweep();
    assert_eq!(stats.evicted, 2);
    assert_eq!(store.len(), 2);

    // Oldest insertions go first
    assert!(store.get::<u32>(&case_key(1)).is_none());
    assert!(store.get::<u32>(&case_key(2)).is_none());
    assert_eq!(store.get::<u32>(&case_key(3)).unwrap().data, 3);
    assert_eq!(store.get::<u32>(&case_key(4)).unwrap().data, 4);
  }

  #[test]
  fn test_rewrite_refreshes_insertion_age() {
    let store = CacheStore::new(MemoryStorage::new()).with_capacity(2);
    store.put(&case_key(1), &1u32);
    store.put(&case_key(2), &2u32);
    store.put(&case_key(1), &10u32);
    store.put(&case_key(3), &3u32);

    store.sweep();
    assert!(store.get::<u32>(&case_key(2)).is_none());
    assert_eq!(store.get::<u32>(&case_key(1)).unwrap().data, 10);
  }

  #[test]
  fn test_sweep_drops_expired_first() {
    let store = CacheStore::new(MemoryStorage::new()).with_capacity(2);
    store.put_with_ttl(&case_key(1), &1u32, Duration::zero());
    store.put(&case_key(2), &2u32);
    store.put(&case_key(3), &3u32);

    let stats = store.sweep();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.evicted, 0);
    assert_eq!(store.len(), 2);
  }

  #[test]
  fn test_clear() {
    let store = CacheStore::new(MemoryStorage::new());
    store.put(&case_key(1), &1u32);
    store.clear();
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn test_sweeper_runs_periodically() {
    let store = CacheStore::new(MemoryStorage::new()).with_capacity(1);
    store.put(&case_key(1), &1u32);
    store.put(&case_key(2), &2u32);

    let handle = store.spawn_sweeper(std::time::Duration::from_millis(10));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.abort();

    assert_eq!(store.len(), 1);
  }
}
