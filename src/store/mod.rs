//! The record store behind the gateway: the service that produces canonical
//! collection tables and persists writes.

mod sqlite;

pub use sqlite::SqliteRecordStore;

use serde_json::{Map, Value};

use crate::resources::{Collection, Record, Table, ValidationError};

/// Failures of the backing store, passed through to callers unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("{collection} record '{id}' not found")]
  NotFound { collection: Collection, id: String },

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("malformed record data: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("record store unavailable: {0}")]
  Unavailable(String),
}

/// Stateless request/response access to the records of each collection.
///
/// Every call is a full round trip; nothing is held between calls.
pub trait RecordStore: Send + Sync {
  /// Read a whole collection in its tabular form.
  fn read_table(&self, collection: Collection) -> Result<Table, StoreError>;

  /// Insert a record; the store assigns the id.
  fn create(&self, collection: Collection, fields: Map<String, Value>)
    -> Result<Record, StoreError>;

  /// Overlay `patch` onto an existing record.
  fn update(
    &self,
    collection: Collection,
    id: &str,
    patch: Map<String, Value>,
  ) -> Result<Record, StoreError>;

  fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

  fn set_status(&self, collection: Collection, id: &str, status: &str)
    -> Result<Record, StoreError>;
}
