//! Cache store implementations: in-memory, SQLite, and no-op.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CacheStore;

/// A single cached entry with its metadata.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The materialized value
  pub value: Value,
  /// When the entry was stored
  pub cached_at: DateTime<Utc>,
}

/// Store that doesn't cache anything.
/// Used when caching is disabled - every read regenerates.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn get(&self, _key: &str) -> Result<Option<Value>> {
    Ok(None) // Always miss
  }

  fn forget(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn get_or_set_forever(&self, _key: &str, producer: &dyn Fn() -> Result<Value>) -> Result<Value> {
    producer() // Compute, then discard
  }

  fn flush(&self) -> Result<()> {
    Ok(())
  }
}

/// Process-local store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Number of entries currently held.
  pub fn len(&self) -> Result<usize> {
    Ok(self.entries()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.entries()?.is_empty())
  }
}

impl CacheStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.entries()?.get(key).cloned())
  }

  fn forget(&self, key: &str) -> Result<()> {
    self.entries()?.remove(key);
    Ok(())
  }

  fn get_or_set_forever(&self, key: &str, producer: &dyn Fn() -> Result<Value>) -> Result<Value> {
    if let Some(value) = self.get(key)? {
      return Ok(value);
    }

    // The lock is not held while producing, so a producer may read the store.
    let value = producer()?;
    self.entries()?.insert(key.to_string(), value.clone());
    Ok(value)
  }

  fn flush(&self) -> Result<()> {
    self.entries()?.clear();
    Ok(())
  }
}

/// SQLite-based cache store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
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

    Ok(data_dir.join("cache-machine").join("cache.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// Get an entry together with the time it was stored.
  pub fn entry(&self, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry '{}': {}", key, e))?;

    match row {
      Some((data, cached_at_str)) => {
        let value: Value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cache entry '{}': {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry { value, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, value: &Value) -> Result<()> {
    let data =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, data, cached_at)
         VALUES (?, ?, datetime('now'))",
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to store cache entry '{}': {}", key, e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.entry(key)?.map(|entry| entry.value))
  }

  fn forget(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "DELETE FROM cache_entries WHERE cache_key = ?",
        params![key],
      )
      .map_err(|e| eyre!("Failed to forget cache entry '{}': {}", key, e))?;

    Ok(())
  }

  fn get_or_set_forever(&self, key: &str, producer: &dyn Fn() -> Result<Value>) -> Result<Value> {
    if let Some(value) = self.get(key)? {
      return Ok(value);
    }

    let value = producer()?;
    self.put(key, &value)?;
    Ok(value)
  }

  fn flush(&self) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to flush cache: {}", e))?;

    Ok(())
  }
}

/// Store selected at runtime from configuration.
pub enum StoreBackend {
  Memory(MemoryStore),
  Sqlite(SqliteStore),
  Noop(NoopStore),
}

impl StoreBackend {
  pub fn name(&self) -> &'static str {
    match self {
      StoreBackend::Memory(_) => "memory",
      StoreBackend::Sqlite(_) => "sqlite",
      StoreBackend::Noop(_) => "none",
    }
  }

  fn inner(&self) -> &dyn CacheStore {
    match self {
      StoreBackend::Memory(store) => store,
      StoreBackend::Sqlite(store) => store,
      StoreBackend::Noop(store) => store,
    }
  }
}

impl CacheStore for StoreBackend {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    self.inner().get(key)
  }

  fn forget(&self, key: &str) -> Result<()> {
    self.inner().forget(key)
  }

  fn get_or_set_forever(&self, key: &str, producer: &dyn Fn() -> Result<Value>) -> Result<Value> {
    self.inner().get_or_set_forever(key, producer)
  }

  fn flush(&self) -> Result<()> {
    self.inner().flush()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::cell::Cell;

  fn exercise_get_or_set(store: &dyn CacheStore) {
    let calls = Cell::new(0);
    let producer = || -> Result<Value> {
      calls.set(calls.get() + 1);
      Ok(json!(["a", "b"]))
    };

    assert_eq!(store.get("letters").unwrap(), None);
    assert_eq!(
      store.get_or_set_forever("letters", &producer).unwrap(),
      json!(["a", "b"])
    );
    assert_eq!(
      store.get_or_set_forever("letters", &producer).unwrap(),
      json!(["a", "b"])
    );
    assert_eq!(calls.get(), 1);
    assert_eq!(store.get("letters").unwrap(), Some(json!(["a", "b"])));

    store.forget("letters").unwrap();
    assert_eq!(store.get("letters").unwrap(), None);

    // Forgetting an absent key is fine
    store.forget("letters").unwrap();
  }

  fn exercise_producer_failure(store: &dyn CacheStore) {
    let result = store.get_or_set_forever("broken", &|| Err(eyre!("query failed")));

    assert_eq!(result.unwrap_err().to_string(), "query failed");
    assert_eq!(store.get("broken").unwrap(), None);
  }

  fn exercise_flush(store: &dyn CacheStore) {
    store.get_or_set_forever("a", &|| Ok(json!(1))).unwrap();
    store.get_or_set_forever("b", &|| Ok(json!(2))).unwrap();

    store.flush().unwrap();

    assert_eq!(store.get("a").unwrap(), None);
    assert_eq!(store.get("b").unwrap(), None);
  }

  #[test]
  fn test_memory_store() {
    let store = MemoryStore::new();
    exercise_get_or_set(&store);
    exercise_producer_failure(&store);
    exercise_flush(&store);
    assert!(store.is_empty().unwrap());
  }

  #[test]
  fn test_memory_store_producer_can_read_store() {
    let store = MemoryStore::new();
    store.get_or_set_forever("base", &|| Ok(json!(2))).unwrap();

    let derived = store
      .get_or_set_forever("derived", &|| -> Result<Value> {
        let base = store.get("base")?.and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(json!(base * 10))
      })
      .unwrap();

    assert_eq!(derived, json!(20));
    assert_eq!(store.len().unwrap(), 2);
  }

  #[test]
  fn test_sqlite_store() {
    let store = SqliteStore::open_in_memory().unwrap();
    exercise_get_or_set(&store);
    exercise_producer_failure(&store);
    exercise_flush(&store);
  }

  #[test]
  fn test_sqlite_entry_has_timestamp() {
    let store = SqliteStore::open_in_memory().unwrap();
    let before = Utc::now() - chrono::Duration::seconds(5);

    store
      .get_or_set_forever("select_posts", &|| Ok(json!({"1": "Title"})))
      .unwrap();

    let entry = store.entry("select_posts").unwrap().unwrap();
    assert_eq!(entry.value, json!({"1": "Title"}));
    assert!(entry.cached_at >= before);
  }

  #[test]
  fn test_sqlite_store_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.get_or_set_forever("k", &|| Ok(json!("v"))).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!("v")));
  }

  #[test]
  fn test_noop_store_always_produces() {
    let store = NoopStore;
    let calls = Cell::new(0);
    let producer = || -> Result<Value> {
      calls.set(calls.get() + 1);
      Ok(json!(true))
    };

    store.get_or_set_forever("k", &producer).unwrap();
    store.get_or_set_forever("k", &producer).unwrap();

    assert_eq!(calls.get(), 2);
    assert_eq!(store.get("k").unwrap(), None);
  }

  #[test]
  fn test_backend_dispatch() {
    let backend = StoreBackend::Memory(MemoryStore::new());
    assert_eq!(backend.name(), "memory");
    exercise_get_or_set(&backend);
    exercise_flush(&backend);
  }
}
