//! Cache storage trait and its in-memory, SQLite and no-op implementations.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A serialized cache entry as held by a storage backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  /// JSON-encoded payload
  pub data: Vec<u8>,
  /// When the entry was written
  pub inserted_at: DateTime<Utc>,
  /// Entry is valid while `now < expires_at`
  pub expires_at: DateTime<Utc>,
  /// Write sequence number, breaks ties between equal insertion times
  pub seq: u64,
}

impl StoredEntry {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Trait for cache storage backends.
///
/// Backends are plain key/value persistence; expiry and capacity policy
/// live in `CacheStore`.
pub trait CacheStorage: Send + Sync {
  /// Insert or replace an entry.
  fn put(&self, key: &str, entry: StoredEntry) -> Result<()>;

  /// Get an entry regardless of expiry.
  fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

  /// Remove an entry. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// Remove every entry whose key satisfies the predicate. Returns the count removed.
  fn remove_matching(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize>;

  /// Remove every entry that expired at or before `now`.
  fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize>;

  /// Keys ordered by insertion, oldest first, at most `limit` of them.
  fn oldest_keys(&self, limit: usize) -> Result<Vec<String>>;

  /// Number of stored entries, expired ones included.
  fn len(&self) -> Result<usize>;

  /// Highest sequence number stored, so a reopened store keeps ordering.
  fn max_seq(&self) -> Result<u64>;

  /// Drop everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn put(&self, _key: &str, _entry: StoredEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _key: &str) -> Result<Option<StoredEntry>> {
    Ok(None) // Always miss
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn remove_matching(&self, _predicate: &dyn Fn(&str) -> bool) -> Result<usize> {
    Ok(0)
  }

  fn remove_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }

  fn oldest_keys(&self, _limit: usize) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn len(&self) -> Result<usize> {
    Ok(0)
  }

  fn max_seq(&self) -> Result<u64> {
    Ok(0)
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// Process-local storage backed by a hash map.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn put(&self, key: &str, entry: StoredEntry) -> Result<()> {
    self.lock()?.insert(key.to_string(), entry);
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn remove_matching(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|key, _| !predicate(key));
    Ok(before - entries.len())
  }

  fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    Ok(before - entries.len())
  }

  fn oldest_keys(&self, limit: usize) -> Result<Vec<String>> {
    let entries = self.lock()?;
    let mut aged: Vec<(&String, DateTime<Utc>, u64)> = entries
      .iter()
      .map(|(key, entry)| (key, entry.inserted_at, entry.seq))
      .collect();
    aged.sort_by_key(|(_, inserted_at, seq)| (*inserted_at, *seq));
    let keys = aged
      .into_iter()
      .take(limit)
      .map(|(key, _, _)| key.clone())
      .collect();
    Ok(keys)
  }

  fn len(&self) -> Result<usize> {
    Ok(self.lock()?.len())
  }

  fn max_seq(&self) -> Result<u64> {
    Ok(self.lock()?.values().map(|e| e.seq).max().unwrap_or(0))
  }

  fn clear(&self) -> Result<()> {
    self.lock()?.clear();
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Create a new SQLite storage at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Create a throwaway database that lives as long as the storage.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("casesync").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Generic keyed cache (stores serialized JSON)
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    inserted_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    seq INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age
    ON cache_entries(inserted_at, seq);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
    ON cache_entries(expires_at);
"#;

impl CacheStorage for SqliteStorage {
  fn put(&self, key: &str, entry: StoredEntry) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, data, inserted_at, expires_at, seq)
         VALUES (?, ?, ?, ?, ?)",
        params![
          key,
          entry.data,
          format_datetime(entry.inserted_at),
          format_datetime(entry.expires_at),
          entry.seq as i64
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, String, String, i64)> = conn
      .query_row(
        "SELECT data, inserted_at, expires_at, seq FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((data, inserted_at, expires_at, seq)) => Ok(Some(StoredEntry {
        data,
        inserted_at: parse_datetime(&inserted_at)?,
        expires_at: parse_datetime(&expires_at)?,
        seq: seq as u64,
      })),
      None => Ok(None),
    }
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache entry {}: {}", key, e))?;
    Ok(())
  }

  fn remove_matching(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize> {
    let mut conn = self.lock()?;

    let keys: Vec<String> = {
      let mut stmt = conn
        .prepare("SELECT cache_key FROM cache_entries")
        .map_err(|e| eyre!("Failed to prepare key scan: {}", e))?;
      let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| eyre!("Failed to scan cache keys: {}", e))?;
      let scanned = rows
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read cache key: {}", e))?;
      scanned.into_iter().filter(|key| predicate(key)).collect()
    };

    if keys.is_empty() {
      return Ok(0);
    }

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for key in &keys {
      tx.execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])
        .map_err(|e| eyre!("Failed to remove cache entry {}: {}", key, e))?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(keys.len())
  }

  fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE expires_at <= ?",
        params![format_datetime(now)],
      )
      .map_err(|e| eyre!("Failed to remove expired entries: {}", e))?;
    Ok(removed)
  }

  fn oldest_keys(&self, limit: usize) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT cache_key FROM cache_entries ORDER BY inserted_at, seq LIMIT ?")
      .map_err(|e| eyre!("Failed to prepare age scan: {}", e))?;

    let keys = stmt
      .query_map(params![limit as i64], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to scan cache ages: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }

  fn len(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }

  fn max_seq(&self) -> Result<u64> {
    let conn = self.lock()?;
    let seq: Option<i64> = conn
      .query_row("SELECT MAX(seq) FROM cache_entries", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read cache sequence: {}", e))?;
    Ok(seq.unwrap_or(0) as u64)
  }

  fn clear(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    Ok(())
  }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string written by `format_datetime`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn entry(payload: &str, age_secs: i64, seq: u64) -> StoredEntry {
    let inserted_at = Utc::now() - Duration::seconds(age_secs);
    StoredEntry {
      data: payload.as_bytes().to_vec(),
      inserted_at,
      expires_at: inserted_at + Duration::minutes(5),
      seq,
    }
  }

  fn backends() -> Vec<(&'static str, Box<dyn CacheStorage>)> {
    vec![
      ("memory", Box::new(MemoryStorage::new())),
      ("sqlite", Box::new(SqliteStorage::open_in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_put_get_replace() {
    for (name, storage) in backends() {
      storage.put("case:1", entry("\"a\"", 0, 1)).unwrap();
      storage.put("case:1", entry("\"b\"", 0, 2)).unwrap();

      let stored = storage.get("case:1").unwrap().unwrap();
      assert_eq!(stored.data, b"\"b\"".to_vec(), "{}", name);
      assert_eq!(stored.seq, 2, "{}", name);
      assert_eq!(storage.len().unwrap(), 1, "{}", name);
    }
  }

  #[test]
  fn test_remove_is_idempotent() {
    for (name, storage) in backends() {
      storage.put("case:1", entry("1", 0, 1)).unwrap();
      storage.remove("case:1").unwrap();
      storage.remove("case:1").unwrap();
      assert!(storage.get("case:1").unwrap().is_none(), "{}", name);
    }
  }

  #[test]
  fn test_remove_matching() {
    for (name, storage) in backends() {
      storage.put("filter:aa", entry("1", 0, 1)).unwrap();
      storage.put("filter:bb", entry("2", 0, 2)).unwrap();
      storage.put("case:7", entry("3", 0, 3)).unwrap();

      let removed = storage
        .remove_matching(&|key: &str| key.starts_with("filter:"))
        .unwrap();
      assert_eq!(removed, 2, "{}", name);
      assert!(storage.get("case:7").unwrap().is_some(), "{}", name);
    }
  }

  #[test]
  fn test_oldest_keys_order() {
    for (name, storage) in backends() {
      storage.put("new", entry("1", 0, 3)).unwrap();
      storage.put("old", entry("2", 60, 1)).unwrap();
      storage.put("mid", entry("3", 30, 2)).unwrap();

      assert_eq!(
        storage.oldest_keys(2).unwrap(),
        vec!["old".to_string(), "mid".to_string()],
        "{}",
        name
      );
      assert_eq!(storage.max_seq().unwrap(), 3, "{}", name);
    }
  }

  #[test]
  fn test_remove_expired() {
    for (name, storage) in backends() {
      storage.put("fresh", entry("1", 0, 1)).unwrap();
      storage.put("stale", entry("2", 600, 2)).unwrap();

      assert_eq!(storage.remove_expired(Utc::now()).unwrap(), 1, "{}", name);
      assert!(storage.get("fresh").unwrap().is_some(), "{}", name);
      assert!(storage.get("stale").unwrap().is_none(), "{}", name);
    }
  }

  #[test]
  fn test_clear() {
    for (name, storage) in backends() {
      storage.put("a", entry("1", 0, 1)).unwrap();
      storage.put("b", entry("2", 0, 2)).unwrap();
      storage.clear().unwrap();
      assert_eq!(storage.len().unwrap(), 0, "{}", name);
    }
  }

  #[test]
  fn test_sqlite_unreadable_key_is_an_error() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("case:1", entry("1", 0, 1)).unwrap();
    storage
      .lock()
      .unwrap()
      .execute(
        "INSERT INTO cache_entries (cache_key, data, inserted_at, expires_at, seq)
         VALUES (X'FF00', X'00', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:05:00.000000Z', 2)",
        [],
      )
      .unwrap();

    assert!(storage.remove_matching(&|_: &str| true).is_err());
    assert!(storage.oldest_keys(10).is_err());
    assert!(storage.get("case:1").unwrap().is_some());
  }

  #[test]
  fn test_noop_always_misses() {
    let storage = NoopStorage;
    storage.put("a", entry("1", 0, 1)).unwrap();
    assert!(storage.get("a").unwrap().is_none());
    assert_eq!(storage.len().unwrap(), 0);
  }
}
