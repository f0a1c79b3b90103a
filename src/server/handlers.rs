//! Request handlers for the single action endpoint.
//!
//! Every response is HTTP 200 with an [`Envelope`]; failures are reported
//! in the envelope, never through the status code.

use axum::extract::{Query, State};
use axum::Json;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::AppState;
use crate::api::{Envelope, Mutation, ReadQuery, WriteRequest};
use crate::resources::{Collection, MutationKind, Record};
use crate::store::{RecordStore, StoreError};

type Reply = Json<Envelope<Value>>;

fn fail(message: impl Into<String>) -> Reply {
  let message = message.into();
  warn!(%message, "request failed");
  Json(Envelope::error(message))
}

/// GET /health
pub async fn health() -> &'static str {
  "ok"
}

/// GET / and GET /exec: reads and login.
pub async fn read(State(state): State<AppState>, Query(query): Query<ReadQuery>) -> Reply {
  let Some(action) = query.action.as_deref().filter(|a| !a.is_empty()) else {
    return fail("action is required");
  };

  if action == "login" {
    let code = query.code.as_deref().unwrap_or_default();
    return match state.auth.login(code, query.role.as_deref()) {
      Ok(profile) => match serde_json::to_value(profile) {
        Ok(data) => Json(Envelope::data(data)),
        Err(e) => fail(format!("Failed to encode profile: {}", e)),
      },
      Err(e) => fail(e.to_string()),
    };
  }

  let Some(collection) = Collection::from_read_action(action) else {
    return fail(format!("Unknown action: {}", action));
  };

  let store = Arc::clone(&state.store);
  let result = state
    .cache
    .get_or_populate(collection.cache_key(), || fetch_table(store, collection))
    .await;

  match result {
    Ok(result) => {
      debug!(%collection, source = ?result.source, "served read");
      Json(Envelope::data(result.data))
    }
    Err(e) => fail(e.to_string()),
  }
}

/// Read a collection from the store off the async runtime.
async fn fetch_table(store: Arc<dyn RecordStore>, collection: Collection) -> Result<Value, StoreError> {
  let table = blocking(move || store.read_table(collection)).await?;
  Ok(serde_json::to_value(table)?)
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
  F: FnOnce() -> Result<T, StoreError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
}

/// POST / and POST /exec: writes.
///
/// The body is taken as text so a malformed request still gets an envelope.
pub async fn write(State(state): State<AppState>, body: String) -> Reply {
  let request: WriteRequest = match serde_json::from_str(&body) {
    Ok(request) => request,
    Err(e) => return fail(format!("Invalid request body: {}", e)),
  };

  let mutation = match Mutation::from_request(request) {
    Ok(mutation) => mutation,
    Err(message) => return fail(message),
  };

  let collection = mutation.collection;
  let kind = mutation.kind;
  let store = Arc::clone(&state.store);

  match blocking(move || apply(store.as_ref(), mutation)).await {
    Ok(record) => {
      // Only a confirmed write makes the cached table stale
      state.cache.invalidate(collection.cache_key());
      let message = confirmation(kind, collection);
      let envelope = match record.map(serde_json::to_value).transpose() {
        Ok(data) => Envelope::Success {
          data,
          message: Some(message),
        },
        Err(e) => return fail(format!("Failed to encode record: {}", e)),
      };
      Json(envelope)
    }
    Err(e) => fail(e.to_string()),
  }
}

fn apply(store: &dyn RecordStore, mutation: Mutation) -> Result<Option<Record>, StoreError> {
  let Mutation {
    kind,
    collection,
    target_id,
    payload,
  } = mutation;
  let id = target_id.unwrap_or_default();

  match kind {
    MutationKind::Create => store.create(collection, payload).map(Some),
    MutationKind::Update => store.update(collection, &id, payload).map(Some),
    MutationKind::Delete => store.delete(collection, &id).map(|()| None),
    MutationKind::StatusChange => {
      let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
      store.set_status(collection, &id, status).map(Some)
    }
  }
}

fn confirmation(kind: MutationKind, collection: Collection) -> String {
  let noun = collection.noun();
  match kind {
    MutationKind::Create => format!("{} created", noun),
    MutationKind::Update => format!("{} updated", noun),
    MutationKind::Delete => format!("{} deleted", noun),
    MutationKind::StatusChange => format!("{} status updated", noun),
  }
}
