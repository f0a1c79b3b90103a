use std::time::Duration;

use crate::store::StoreError;

/// Failures surfaced by the read-through cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The gate for `key` could not be acquired within the bounded wait.
  #[error("timed out after {timeout:?} waiting for the cache lock on '{key}'")]
  LockTimeout { key: String, timeout: Duration },

  /// The populate function failed; nothing was cached.
  #[error(transparent)]
  Fetch(#[from] StoreError),

  /// The storage or lock backend itself failed.
  #[error("cache backend error: {0}")]
  Backend(String),
}
