//! SQLite-backed record store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use super::{RecordStore, StoreError};
use crate::resources::{self, Collection, Record, Table};

/// Schema for record tables.
const RECORD_SCHEMA: &str = r#"
-- One row per record, stored as serialized JSON
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, record_id)
);

CREATE INDEX IF NOT EXISTS idx_records_position ON records(collection, position);

-- Per-collection id counters; ids are never reused after a delete
CREATE TABLE IF NOT EXISTS id_sequences (
    collection TEXT PRIMARY KEY,
    next_value INTEGER NOT NULL
);
"#;

/// Record store persisted in a single SQLite file.
pub struct SqliteRecordStore {
  conn: Mutex<Connection>,
}

impl SqliteRecordStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Unavailable(format!("Failed to create data directory: {}", e))
      })?;
    }

    let conn = Connection::open(path)?;
    info!(path = %path.display(), "opened record store");
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(RECORD_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {}", e)))
  }
}

fn next_id(tx: &Transaction<'_>, collection: Collection) -> Result<String, StoreError> {
  let current: Option<i64> = tx
    .query_row(
      "SELECT next_value FROM id_sequences WHERE collection = ?",
      params![collection.cache_key()],
      |row| row.get(0),
    )
    .optional()?;
  let value = current.unwrap_or(1);

  tx.execute(
    "INSERT OR REPLACE INTO id_sequences (collection, next_value) VALUES (?, ?)",
    params![collection.cache_key(), value + 1],
  )?;

  Ok(format!("{}-{:04}", collection.id_prefix(), value))
}

fn load(
  tx: &Transaction<'_>,
  collection: Collection,
  id: &str,
) -> Result<Option<Record>, StoreError> {
  let data: Option<Vec<u8>> = tx
    .query_row(
      "SELECT data FROM records WHERE collection = ? AND record_id = ?",
      params![collection.cache_key(), id],
      |row| row.get(0),
    )
    .optional()?;

  data
    .map(|d| serde_json::from_slice(&d).map_err(StoreError::from))
    .transpose()
}

/// Stamp audit columns the collection carries.
fn touch(collection: Collection, record: &mut Record, created: bool) {
  let now = Value::String(Utc::now().to_rfc3339());
  let headers = collection.headers();
  if created && headers.contains(&"created_at") {
    record.set("created_at", now.clone());
  }
  if headers.contains(&"updated_at") {
    record.set("updated_at", now);
  }
}

impl RecordStore for SqliteRecordStore {
  fn read_table(&self, collection: Collection) -> Result<Table, StoreError> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare(
      "SELECT data FROM records
       WHERE collection = ?
       ORDER BY position",
    )?;

    let records = stmt
      .query_map(params![collection.cache_key()], |row| {
        row.get::<_, Vec<u8>>(0)
      })?
      .map(|data| Ok(serde_json::from_slice::<Record>(&data?)?))
      .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(Table::from_records(collection.headers(), &records))
  }

  fn create(
    &self,
    collection: Collection,
    fields: Map<String, Value>,
  ) -> Result<Record, StoreError> {
    resources::validate_new(collection, &fields)?;

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let id = next_id(&tx, collection)?;
    let mut record = Record::new(fields);
    record.set("id", Value::String(id.clone()));
    if record.get("status").is_none() {
      record.set(
        "status",
        Value::String(collection.initial_status().to_string()),
      );
    }
    touch(collection, &mut record, true);

    let position: i64 = tx.query_row(
      "SELECT COALESCE(MAX(position), 0) + 1 FROM records WHERE collection = ?",
      params![collection.cache_key()],
      |row| row.get(0),
    )?;
    tx.execute(
      "INSERT INTO records (collection, record_id, position, data, updated_at)
       VALUES (?, ?, ?, ?, datetime('now'))",
      params![
        collection.cache_key(),
        id,
        position,
        serde_json::to_vec(&record)?
      ],
    )?;
    tx.commit()?;

    info!(%collection, %id, "record created");
    Ok(record)
  }

  fn update(
    &self,
    collection: Collection,
    id: &str,
    patch: Map<String, Value>,
  ) -> Result<Record, StoreError> {
    resources::validate_patch(collection, id, &patch)?;

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let mut record = load(&tx, collection, id)?.ok_or_else(|| StoreError::NotFound {
      collection,
      id: id.to_string(),
    })?;
    record.merge(&patch);
    touch(collection, &mut record, false);

    tx.execute(
      "UPDATE records SET data = ?, updated_at = datetime('now')
       WHERE collection = ? AND record_id = ?",
      params![serde_json::to_vec(&record)?, collection.cache_key(), id],
    )?;
    tx.commit()?;

    info!(%collection, %id, "record updated");
    Ok(record)
  }

  fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM records WHERE collection = ? AND record_id = ?",
      params![collection.cache_key(), id],
    )?;

    if removed == 0 {
      return Err(StoreError::NotFound {
        collection,
        id: id.to_string(),
      });
    }

    info!(%collection, %id, "record deleted");
    Ok(())
  }

  fn set_status(
    &self,
    collection: Collection,
    id: &str,
    status: &str,
  ) -> Result<Record, StoreError> {
    resources::validate_status(collection, status)?;

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(status.to_string()));
    self.update(collection, id, patch)
  }
}
