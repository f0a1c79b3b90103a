//! Cache storage trait and its memory, SQLite, and no-op implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::error::CacheError;
use super::types::CacheEntry;

/// Trait for cache storage backends.
///
/// `get` only ever returns unexpired entries; expired ones are dropped on
/// the way out.
pub trait CacheStorage: Send + Sync {
  /// Get the live entry for `key`, if any.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

  /// Store `payload` under `key`, expiring `ttl` from now.
  fn put(&self, key: &str, payload: &Value, ttl: Duration) -> Result<CacheEntry, CacheError>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), CacheError>;
}

fn expiry_from_now(ttl: Duration) -> Result<DateTime<Utc>, CacheError> {
  let ttl = chrono::Duration::from_std(ttl)
    .map_err(|e| CacheError::Backend(format!("TTL out of range: {}", e)))?;
  Ok(Utc::now() + ttl)
}

fn poisoned<E: std::fmt::Display>(e: E) -> CacheError {
  CacheError::Backend(format!("Lock poisoned: {}", e))
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every read misses.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
    Ok(None) // Always miss
  }

  fn put(&self, key: &str, payload: &Value, ttl: Duration) -> Result<CacheEntry, CacheError> {
    // Discard, but report what would have been stored
    Ok(CacheEntry {
      key: key.to_string(),
      payload: payload.clone(),
      expires_at: expiry_from_now(ttl)?,
    })
  }

  fn remove(&self, _key: &str) -> Result<(), CacheError> {
    Ok(())
  }
}

/// In-process map storage. Entries die with the process.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let mut entries = self.entries.lock().map_err(poisoned)?;

    match entries.get(key) {
      None => return Ok(None),
      Some(entry) if !entry.is_expired(Utc::now()) => return Ok(Some(entry.clone())),
      Some(_) => {}
    }

    entries.remove(key);
    Ok(None)
  }

  fn put(&self, key: &str, payload: &Value, ttl: Duration) -> Result<CacheEntry, CacheError> {
    let entry = CacheEntry {
      key: key.to_string(),
      payload: payload.clone(),
      expires_at: expiry_from_now(ttl)?,
    };

    self
      .entries
      .lock()
      .map_err(poisoned)?
      .insert(key.to_string(), entry.clone());

    Ok(entry)
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    self.entries.lock().map_err(poisoned)?.remove(key);
    Ok(())
  }
}

/// SQLite-based cache storage. Survives gateway restarts.
///
/// Every statement is a single-row read or write by primary key on a local
/// file, so calls run inline on the calling task. Table scans live in the
/// record store, whose calls go through `spawn_blocking`.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    expires_at TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn backend(context: &str) -> impl Fn(rusqlite::Error) -> CacheError + '_ {
  move |e| CacheError::Backend(format!("{}: {}", context, e))
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Backend(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Backend(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Cache that lives only as long as this value. Used by tests.
  pub fn open_in_memory() -> Result<Self, CacheError> {
    let conn = Connection::open_in_memory().map_err(backend("Failed to open cache database"))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(backend("Failed to run cache migrations"))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let conn = self.conn.lock().map_err(poisoned)?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT payload, expires_at FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(backend("Failed to read cache entry"))?;

    let Some((data, expires_at)) = row else {
      return Ok(None);
    };

    let expires_at = parse_datetime(&expires_at)?;
    if Utc::now() >= expires_at {
      conn
        .execute(
          "DELETE FROM cache_entries WHERE cache_key = ?",
          params![key],
        )
        .map_err(backend("Failed to drop expired entry"))?;
      return Ok(None);
    }

    let payload = serde_json::from_slice(&data)
      .map_err(|e| CacheError::Backend(format!("Failed to deserialize cache entry: {}", e)))?;

    Ok(Some(CacheEntry {
      key: key.to_string(),
      payload,
      expires_at,
    }))
  }

  fn put(&self, key: &str, payload: &Value, ttl: Duration) -> Result<CacheEntry, CacheError> {
    let expires_at = expiry_from_now(ttl)?;
    let data = serde_json::to_vec(payload)
      .map_err(|e| CacheError::Backend(format!("Failed to serialize cache entry: {}", e)))?;

    let conn = self.conn.lock().map_err(poisoned)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, payload, expires_at, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![key, data, expires_at.to_rfc3339()],
      )
      .map_err(backend("Failed to store cache entry"))?;

    Ok(CacheEntry {
      key: key.to_string(),
      payload: payload.clone(),
      expires_at,
    })
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    let conn = self.conn.lock().map_err(poisoned)?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_key = ?",
        params![key],
      )
      .map_err(backend("Failed to delete cache entry"))?;
    Ok(())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| CacheError::Backend(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn exercise(storage: &dyn CacheStorage) {
    assert!(storage.get("tickets").unwrap().is_none());

    let payload = json!({"headers": ["id"], "rows": [["TCK-0001"]]});
    storage
      .put("tickets", &payload, Duration::from_secs(60))
      .unwrap();

    let entry = storage.get("tickets").unwrap().expect("entry should be live");
    assert_eq!(entry.payload, payload);
    assert!(entry.expires_at > Utc::now());

    storage.remove("tickets").unwrap();
    assert!(storage.get("tickets").unwrap().is_none());

    // Idempotent
    storage.remove("tickets").unwrap();
  }

  #[test]
  fn test_memory_storage() {
    exercise(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_zero_ttl_is_never_served() {
    let memory = MemoryStorage::new();
    memory.put("accounts", &json!([]), Duration::ZERO).unwrap();
    assert!(memory.get("accounts").unwrap().is_none());

    let sqlite = SqliteStorage::open_in_memory().unwrap();
    sqlite.put("accounts", &json!([]), Duration::ZERO).unwrap();
    assert!(sqlite.get("accounts").unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_existing() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("tasks", &json!(1), Duration::from_secs(60))
      .unwrap();
    storage
      .put("tasks", &json!(2), Duration::from_secs(60))
      .unwrap();
    assert_eq!(storage.get("tasks").unwrap().unwrap().payload, json!(2));
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage
      .put("tickets", &json!(1), Duration::from_secs(60))
      .unwrap();
    assert!(storage.get("tickets").unwrap().is_none());
  }
}
