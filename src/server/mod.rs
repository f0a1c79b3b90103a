//! HTTP gateway: the action endpoint in front of the record store.

mod auth;
mod handlers;

pub use auth::{digest_code, AuthError, Authenticator};

use axum::routing::get;
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::{
  CacheLayer, CacheStorage, MemoryMutex, MemoryStorage, NamedMutex, NoopStorage, SqliteMutex,
  SqliteStorage,
};
use crate::config::{CacheBackend, Config, LockBackend};
use crate::store::{RecordStore, SqliteRecordStore};

/// Shared services handed to every handler.
#[derive(Clone)]
pub struct AppState {
  pub cache: Arc<CacheLayer>,
  pub store: Arc<dyn RecordStore>,
  pub auth: Arc<Authenticator>,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(handlers::read).post(handlers::write))
    .route("/exec", get(handlers::read).post(handlers::write))
    .route("/health", get(handlers::health))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Wire up store, cache and gate from configuration.
pub fn build_state(config: &Config) -> Result<AppState> {
  let database = config.database_path()?;
  let cache_file = database.with_file_name("cache.db");
  let cache_config = &config.server.cache;

  let store = SqliteRecordStore::open(&database)
    .map_err(|e| eyre!("Failed to open record store {}: {}", database.display(), e))?;

  let storage: Arc<dyn CacheStorage> = match cache_config.backend {
    CacheBackend::Memory => Arc::new(MemoryStorage::new()),
    CacheBackend::Sqlite => Arc::new(
      SqliteStorage::open(&cache_file).map_err(|e| eyre!("Failed to open cache: {}", e))?,
    ),
    CacheBackend::None => Arc::new(NoopStorage),
  };

  // Leases outlive the bounded wait; a crashed holder's lease still lapses.
  // A fetch slower than the lease loses exclusivity, see `SqliteMutex`.
  let lease_ttl = (cache_config.lock_timeout() * 2).max(Duration::from_secs(1));
  let gate: Arc<dyn NamedMutex> = match cache_config.lock {
    LockBackend::Memory => Arc::new(MemoryMutex::new()),
    LockBackend::Sqlite => Arc::new(
      SqliteMutex::open(&cache_file, lease_ttl)
        .map_err(|e| eyre!("Failed to open lock table: {}", e))?,
    ),
  };

  let cache = CacheLayer::new(storage, gate)
    .with_ttl(cache_config.ttl())
    .with_lock_timeout(cache_config.lock_timeout());

  info!(
    database = %database.display(),
    cache = ?cache_config.backend,
    lock = ?cache_config.lock,
    users = config.server.users.len(),
    "gateway state ready"
  );

  Ok(AppState {
    cache: Arc::new(cache),
    store: Arc::new(store),
    auth: Arc::new(Authenticator::new(config.server.users.clone())),
  })
}

/// Run the gateway until Ctrl-C.
pub async fn serve(config: &Config, bind: &str) -> Result<()> {
  let state = build_state(config)?;

  let listener = TcpListener::bind(bind)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", bind, e))?;
  info!(address = %bind, "gateway listening");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("shutting down");
    })
    .await
    .map_err(|e| eyre!("Gateway stopped: {}", e))
}
