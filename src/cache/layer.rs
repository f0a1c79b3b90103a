//! Cache layer that orchestrates read-through population with the gate.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::CacheError;
use super::lock::NamedMutex;
use super::storage::CacheStorage;
use super::types::{CacheEntry, CacheResult};
use crate::store::StoreError;

/// Read-through cache in front of the record store.
///
/// A cold key is populated by exactly one caller per contention window:
/// concurrent misses queue on the key's gate and find the entry already
/// stored once they get through.
///
/// Each key carries an invalidation generation. A populate only stores its
/// payload if no invalidation landed while its fetch was running, so a read
/// that started before a write cannot re-cache pre-write data.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  gate: Arc<dyn NamedMutex>,
  generations: Mutex<HashMap<String, u64>>,
  /// How long a populated entry stays fresh
  ttl: Duration,
  /// Bounded wait for the gate
  lock_timeout: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage and gate backends.
  pub fn new(storage: Arc<dyn CacheStorage>, gate: Arc<dyn NamedMutex>) -> Self {
    Self {
      storage,
      gate,
      generations: Mutex::new(HashMap::new()),
      ttl: Duration::from_secs(300),
      lock_timeout: Duration::from_secs(30),
    }
  }

  /// Set the time-to-live for populated entries.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Set how long a miss may wait for the population gate.
  pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
    self.lock_timeout = lock_timeout;
    self
  }

  fn generations(&self) -> MutexGuard<'_, HashMap<String, u64>> {
    self.generations.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn generation(&self, key: &str) -> u64 {
    self.generations().get(key).copied().unwrap_or(0)
  }

  /// Storage read that degrades to a miss when the backend misbehaves.
  fn lookup(&self, key: &str) -> Option<CacheEntry> {
    match self.storage.get(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Return the cached payload for `key`, populating it with `fetch` on a miss.
  ///
  /// 1. Unexpired entry: return it without touching the gate
  /// 2. Miss: take the key's gate, waiting at most the lock timeout
  /// 3. Re-check: another caller may have populated while we waited
  /// 4. Still missing: run `fetch`, store with a fresh TTL, return
  ///
  /// The lease is released on every path out, including a failed fetch.
  pub async fn get_or_populate<F, Fut>(
    &self,
    key: &str,
    fetch: F,
  ) -> Result<CacheResult<Value>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, StoreError>>,
  {
    if let Some(entry) = self.lookup(key) {
      debug!(key, "cache hit");
      return Ok(CacheResult::hit(entry.payload));
    }

    let lease = self.gate.acquire(key, self.lock_timeout).await?;
    let outcome = self.populate(key, fetch).await;
    self.gate.release(lease).await;

    outcome
  }

  /// Body of the critical section. Runs with the key's gate held.
  async fn populate<F, Fut>(&self, key: &str, fetch: F) -> Result<CacheResult<Value>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, StoreError>>,
  {
    if let Some(entry) = self.lookup(key) {
      debug!(key, "cache filled while waiting for gate");
      return Ok(CacheResult::filled_by_peer(entry.payload));
    }

    let generation = self.generation(key);
    let payload = fetch().await?;

    {
      // Held across the check and the put so an invalidation cannot slip between them
      let generations = self.generations();
      if generations.get(key).copied().unwrap_or(0) != generation {
        info!(key, "invalidated during fetch, not caching");
      } else if let Err(e) = self.storage.put(key, &payload, self.ttl) {
        // Serve the fresh payload anyway; the next read simply misses again
        warn!(key, error = %e, "failed to store cache entry");
      } else {
        info!(key, ttl_secs = self.ttl.as_secs(), "cache populated");
      }
    }

    Ok(CacheResult::populated(payload))
  }

  /// Drop the entry for `key` so the next read repopulates. Always succeeds.
  /// Bumps the key's generation so an in-flight populate discards its payload.
  pub fn invalidate(&self, key: &str) {
    let mut generations = self.generations();
    *generations.entry(key.to_string()).or_default() += 1;
    match self.storage.remove(key) {
      Ok(()) => info!(key, "cache invalidated"),
      Err(e) => warn!(key, error = %e, "cache invalidation failed"),
    }
  }
}
