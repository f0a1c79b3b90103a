//! Read-through caching for the gateway.
//!
//! This module provides a stampede-safe cache in front of the record store:
//! - Per-entry TTL over a pluggable storage backend (memory, SQLite, or none)
//! - A named, bounded-wait gate so one caller populates a cold key
//! - Explicit invalidation, driven by successful writes

mod error;
mod layer;
mod lock;
mod storage;
mod types;

pub use error::CacheError;
pub use layer::CacheLayer;
pub use lock::{Lease, MemoryMutex, NamedMutex, SqliteMutex};
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use types::{CacheEntry, CacheResult, CacheSource};
