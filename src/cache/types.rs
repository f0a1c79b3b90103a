//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A cached payload with its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub payload: Value,
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  /// An entry is expired from its expiry instant onwards.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn hit(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Hit,
    }
  }

  pub fn filled_by_peer(data: T) -> Self {
    Self {
      data,
      source: CacheSource::FilledByPeer,
    }
  }

  pub fn populated(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Populated,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Unexpired entry found without taking the lock
  Hit,
  /// Entry appeared while this caller waited on the lock
  FilledByPeer,
  /// This caller ran the fetch and stored the result
  Populated,
}
