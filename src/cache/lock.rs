//! Named, bounded-wait mutual exclusion for cache population.
//!
//! Two backends sit behind [`NamedMutex`]:
//! - [`MemoryMutex`]: one async mutex per key, for a single gateway process
//! - [`SqliteMutex`]: TTL-based lease rows in a shared database file, for
//!   several gateway processes pointed at the same store

use async_trait::async_trait;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::error::CacheError;

/// Proof of holding the gate for one key.
///
/// Hand it back through [`NamedMutex::release`]. Dropping a memory lease
/// also releases it; an abandoned SQLite lease lapses when its TTL runs out.
#[derive(Debug)]
pub struct Lease {
  key: String,
  token: String,
  _guard: Option<OwnedMutexGuard<()>>,
}

impl Lease {
  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn token(&self) -> &str {
    &self.token
  }
}

/// A lock service keyed by name.
#[async_trait]
pub trait NamedMutex: Send + Sync {
  /// Wait up to `timeout` for exclusive hold of `key`.
  async fn acquire(&self, key: &str, timeout: Duration) -> Result<Lease, CacheError>;

  /// Give up a lease. Never fails; backend problems are logged.
  async fn release(&self, lease: Lease);
}

static LEASE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique-enough holder token: hash of key, process, time and a counter.
fn lease_token(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hasher.update(std::process::id().to_le_bytes());
  hasher.update(
    chrono::Utc::now()
      .timestamp_nanos_opt()
      .unwrap_or_default()
      .to_le_bytes(),
  );
  hasher.update(LEASE_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
  hex::encode(&hasher.finalize()[..8])
}

/// In-process gate: one `tokio::sync::Mutex` per key, created on demand.
#[derive(Default)]
pub struct MemoryMutex {
  gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryMutex {
  pub fn new() -> Self {
    Self::default()
  }

  fn gate(&self, key: &str) -> Result<Arc<tokio::sync::Mutex<()>>, CacheError> {
    let mut gates = self
      .gates
      .lock()
      .map_err(|e| CacheError::Backend(format!("Lock poisoned: {}", e)))?;
    Ok(Arc::clone(gates.entry(key.to_string()).or_default()))
  }
}

#[async_trait]
impl NamedMutex for MemoryMutex {
  async fn acquire(&self, key: &str, timeout: Duration) -> Result<Lease, CacheError> {
    let gate = self.gate(key)?;

    match tokio::time::timeout(timeout, gate.lock_owned()).await {
      Ok(guard) => Ok(Lease {
        key: key.to_string(),
        token: lease_token(key),
        _guard: Some(guard),
      }),
      Err(_) => Err(CacheError::LockTimeout {
        key: key.to_string(),
        timeout,
      }),
    }
  }

  async fn release(&self, lease: Lease) {
    debug!(key = %lease.key, "releasing cache gate");
    drop(lease);
  }
}

/// Schema for the lease table.
const LOCK_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_locks (
    lock_key TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);
"#;

/// Lease-row gate shared through a SQLite file.
///
/// A lease expires `lease_ttl` after it was taken, so a crashed holder
/// cannot wedge the key forever. The same bound applies to a live holder:
/// a fetch that runs longer than `lease_ttl` loses exclusivity, and another
/// process may take the lapsed lease and populate the key concurrently.
/// Both then store the authoritative table, so the cost is a duplicate
/// read. Keep `lease_ttl` above the slowest expected fetch.
///
/// Statements run on the blocking pool, never on an async worker.
pub struct SqliteMutex {
  conn: Arc<Mutex<Connection>>,
  lease_ttl: Duration,
  poll_interval: Duration,
}

impl SqliteMutex {
  pub fn open(path: &Path, lease_ttl: Duration) -> Result<Self, CacheError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Backend(format!("Failed to create lock directory: {}", e)))?;
    }
    let conn = Connection::open(path).map_err(|e| {
      CacheError::Backend(format!(
        "Failed to open lock database at {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::with_connection(conn, lease_ttl)
  }

  pub fn open_in_memory(lease_ttl: Duration) -> Result<Self, CacheError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| CacheError::Backend(format!("Failed to open lock database: {}", e)))?;
    Self::with_connection(conn, lease_ttl)
  }

  fn with_connection(conn: Connection, lease_ttl: Duration) -> Result<Self, CacheError> {
    conn
      .execute_batch(LOCK_SCHEMA)
      .map_err(|e| CacheError::Backend(format!("Failed to run lock migrations: {}", e)))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      lease_ttl,
      poll_interval: Duration::from_millis(25),
    })
  }

  /// Set how often a waiting caller retries.
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  /// Run `f` against the connection on the blocking pool.
  async fn blocking<T, F>(&self, f: F) -> Result<T, CacheError>
  where
    F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn
        .lock()
        .map_err(|e| CacheError::Backend(format!("Lock poisoned: {}", e)))?;
      f(&mut conn)
    })
    .await
    .map_err(|e| CacheError::Backend(format!("Lock task failed: {}", e)))?
  }
}

/// One attempt: clear a lapsed lease, then claim the key if free.
fn try_claim(
  conn: &mut Connection,
  key: &str,
  token: &str,
  lease_ttl: Duration,
) -> Result<bool, CacheError> {
  let now_ms = chrono::Utc::now().timestamp_millis();
  let expires_at_ms = now_ms + lease_ttl.as_millis() as i64;

  let tx = conn
    .transaction()
    .map_err(|e| CacheError::Backend(format!("Failed to begin transaction: {}", e)))?;
  tx.execute(
    "DELETE FROM cache_locks WHERE lock_key = ? AND expires_at_ms <= ?",
    params![key, now_ms],
  )
  .map_err(|e| CacheError::Backend(format!("Failed to clear lapsed lease: {}", e)))?;
  let claimed = tx
    .execute(
      "INSERT OR IGNORE INTO cache_locks (lock_key, token, expires_at_ms) VALUES (?, ?, ?)",
      params![key, token, expires_at_ms],
    )
    .map_err(|e| CacheError::Backend(format!("Failed to claim lease: {}", e)))?;
  tx.commit()
    .map_err(|e| CacheError::Backend(format!("Failed to commit transaction: {}", e)))?;

  Ok(claimed == 1)
}

fn delete_lease(conn: &mut Connection, key: &str, token: &str) -> Result<(), CacheError> {
  conn
    .execute(
      "DELETE FROM cache_locks WHERE lock_key = ? AND token = ?",
      params![key, token],
    )
    .map_err(|e| CacheError::Backend(format!("Failed to release lease: {}", e)))?;
  Ok(())
}

#[async_trait]
impl NamedMutex for SqliteMutex {
  async fn acquire(&self, key: &str, timeout: Duration) -> Result<Lease, CacheError> {
    let token = lease_token(key);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
      let (claim_key, claim_token, ttl) = (key.to_string(), token.clone(), self.lease_ttl);
      let claimed = self
        .blocking(move |conn| try_claim(conn, &claim_key, &claim_token, ttl))
        .await?;
      if claimed {
        return Ok(Lease {
          key: key.to_string(),
          token,
          _guard: None,
        });
      }

      let now = tokio::time::Instant::now();
      if now >= deadline {
        return Err(CacheError::LockTimeout {
          key: key.to_string(),
          timeout,
        });
      }
      tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
    }
  }

  async fn release(&self, lease: Lease) {
    let (key, token) = (lease.key.clone(), lease.token.clone());
    if let Err(e) = self
      .blocking(move |conn| delete_lease(conn, &key, &token))
      .await
    {
      warn!(key = %lease.key, error = %e, "failed to release lease, it will lapse on its TTL");
    }
  }
}
