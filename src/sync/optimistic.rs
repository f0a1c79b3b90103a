//! Optimistic editing of one collection.
//!
//! Every write is a small transaction over the displayed records:
//! [`begin`](OptimisticCollection::begin) takes a snapshot,
//! [`apply_speculative`](OptimisticCollection::apply_speculative) shows the
//! expected outcome, and the write then ends in
//! [`commit`](OptimisticCollection::commit) (authoritative refetch) or
//! [`rollback`](OptimisticCollection::rollback) (snapshot restored).
//!
//! Overlapping writes to the same record are not serialized. If an earlier
//! write fails after a later one has applied its edit, the rollback also
//! removes the later edit until that write's own refetch lands.

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::coordinator::SyncCoordinator;
use crate::api::{Mutation, RecordService};
use crate::resources::{self, Collection, Record, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
  Loading,
  Ready,
  /// Initial load failed; the view offers a retry
  Failed(String),
}

/// What the UI renders for one collection.
#[derive(Debug, Clone)]
pub struct CollectionView {
  pub records: Vec<Record>,
  pub load: LoadState,
  /// Set when a refetch after a confirmed write failed
  pub refresh_error: Option<String>,
  /// Bumped on every change to `records`
  pub version: u64,
}

/// Display state captured before a speculative edit.
#[derive(Debug, Clone)]
pub struct Snapshot {
  records: Vec<Record>,
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
  /// Caught before submission; nothing was sent or displayed
  #[error(transparent)]
  Invalid(#[from] ValidationError),

  /// The gateway or network refused the write; the display was restored
  #[error("{0}")]
  Rejected(color_eyre::Report),
}

#[derive(Clone)]
pub struct OptimisticCollection {
  collection: Collection,
  view: Arc<Mutex<CollectionView>>,
  service: Arc<dyn RecordService>,
  sync: SyncCoordinator,
}

impl OptimisticCollection {
  pub fn new(collection: Collection, service: Arc<dyn RecordService>, sync: SyncCoordinator) -> Self {
    Self {
      collection,
      view: Arc::new(Mutex::new(CollectionView {
        records: Vec::new(),
        load: LoadState::Loading,
        refresh_error: None,
        version: 0,
      })),
      service,
      sync,
    }
  }

  pub fn collection(&self) -> Collection {
    self.collection
  }

  fn lock(&self) -> MutexGuard<'_, CollectionView> {
    self.view.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Copy of the current display state.
  pub fn view(&self) -> CollectionView {
    self.lock().clone()
  }

  pub fn records(&self) -> Vec<Record> {
    self.lock().records.clone()
  }

  fn replace(&self, records: Vec<Record>) {
    let mut view = self.lock();
    view.records = records;
    view.load = LoadState::Ready;
    view.refresh_error = None;
    view.version += 1;
  }

  /// Initial load and manual reload. Replaces the display on success.
  pub async fn load(&self) -> color_eyre::Result<()> {
    {
      let mut view = self.lock();
      if view.load != LoadState::Ready {
        view.load = LoadState::Loading;
      }
    }

    match self.service.fetch(self.collection).await {
      Ok(records) => {
        debug!(collection = %self.collection, count = records.len(), "loaded");
        self.replace(records);
        Ok(())
      }
      Err(e) => {
        warn!(collection = %self.collection, error = %e, "load failed");
        let mut view = self.lock();
        if view.load == LoadState::Ready {
          view.refresh_error = Some(format!("Refresh failed: {}", e));
        } else {
          view.load = LoadState::Failed(e.to_string());
        }
        Err(e)
      }
    }
  }

  pub fn begin(&self) -> Snapshot {
    Snapshot {
      records: self.lock().records.clone(),
    }
  }

  pub fn apply_speculative(&self, edit: impl FnOnce(&mut Vec<Record>)) {
    let mut view = self.lock();
    edit(&mut view.records);
    view.version += 1;
  }

  /// Replace the display with the authoritative collection. A failed
  /// refetch keeps what is shown and records the failure.
  pub async fn commit(&self) {
    match self.service.fetch(self.collection).await {
      Ok(records) => self.replace(records),
      Err(e) => {
        warn!(collection = %self.collection, error = %e, "refetch after write failed");
        self.lock().refresh_error = Some(format!("Refresh failed: {}", e));
      }
    }
  }

  pub fn rollback(&self, snapshot: Snapshot) {
    let mut view = self.lock();
    view.records = snapshot.records;
    view.version += 1;
  }

  /// Snapshot, edit, submit through the coordinator, then commit or roll back.
  async fn speculate(
    &self,
    mutation: Mutation,
    edit: impl FnOnce(&mut Vec<Record>),
  ) -> Result<(), MutationError> {
    let snapshot = self.begin();
    self.apply_speculative(edit);

    let service = Arc::clone(&self.service);
    let outcome = self
      .sync
      .run(async move { service.mutate(&mutation).await })
      .await;

    match outcome {
      Ok(()) => {
        self.commit().await;
        Ok(())
      }
      Err(e) => {
        self.rollback(snapshot);
        Err(MutationError::Rejected(e))
      }
    }
  }

  /// Merge `patch` into the record with `id`.
  pub async fn update(&self, id: &str, patch: Map<String, Value>) -> Result<(), MutationError> {
    resources::validate_patch(self.collection, id, &patch)?;

    let mutation = Mutation::update(self.collection, id, patch.clone());
    let id = id.to_string();
    self
      .speculate(mutation, move |records| merge_into(records, &id, &patch))
      .await
  }

  pub async fn set_status(&self, id: &str, status: &str) -> Result<(), MutationError> {
    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(status.to_string()));
    resources::validate_patch(self.collection, id, &patch)?;

    let mutation = Mutation::status_change(self.collection, id, status);
    let id = id.to_string();
    self
      .speculate(mutation, move |records| merge_into(records, &id, &patch))
      .await
  }

  pub async fn delete(&self, id: &str) -> Result<(), MutationError> {
    if id.trim().is_empty() {
      return Err(ValidationError::MissingId.into());
    }

    let mutation = Mutation::delete(self.collection, id);
    let id = id.to_string();
    self
      .speculate(mutation, move |records| {
        records.retain(|r| r.id() != Some(id.as_str()))
      })
      .await
  }

  /// New records only appear once the store has assigned their id, so a
  /// create has no speculative step and nothing to revert.
  pub async fn create(&self, fields: Map<String, Value>) -> Result<(), MutationError> {
    resources::validate_new(self.collection, &fields)?;

    let mutation = Mutation::create(self.collection, fields);
    let service = Arc::clone(&self.service);
    self
      .sync
      .run(async move { service.mutate(&mutation).await })
      .await
      .map_err(MutationError::Rejected)?;

    self.commit().await;
    Ok(())
  }
}

fn merge_into(records: &mut [Record], id: &str, patch: &Map<String, Value>) {
  if let Some(record) = records.iter_mut().find(|r| r.id() == Some(id)) {
    record.merge(patch);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resources::MutationKind;
  use crate::sync::coordinator::SyncStatus;
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::time::Duration;
  use tokio::sync::oneshot;

  /// In-memory stand-in for the gateway. Writes either wait on a queued
  /// gate or settle by the `fail_writes` flag.
  #[derive(Default)]
  struct MockService {
    records: Mutex<Vec<Record>>,
    fail_fetch: AtomicBool,
    fail_writes: AtomicBool,
    gates: Mutex<VecDeque<oneshot::Receiver<bool>>>,
    received: Mutex<Vec<Mutation>>,
  }

  impl MockService {
    fn with_records(records: Vec<Value>) -> Arc<Self> {
      let service = Self::default();
      *service.records.lock().unwrap() = records
        .into_iter()
        .map(|r| serde_json::from_value(r).unwrap())
        .collect();
      Arc::new(service)
    }

    /// Hold the next write until the returned sender says how it ends.
    fn gate_next(&self) -> oneshot::Sender<bool> {
      let (tx, rx) = oneshot::channel();
      self.gates.lock().unwrap().push_back(rx);
      tx
    }

    fn received(&self) -> usize {
      self.received.lock().unwrap().len()
    }

    fn apply(&self, mutation: &Mutation) {
      let mut records = self.records.lock().unwrap();
      let id = mutation.target_id.as_deref();
      match mutation.kind {
        MutationKind::Create => {
          let mut record = Record::new(mutation.payload.clone());
          record.set("id", json!(format!("NEW-{}", records.len() + 1)));
          records.push(record);
        }
        MutationKind::Delete => records.retain(|r| r.id() != id),
        MutationKind::Update | MutationKind::StatusChange => {
          if let Some(record) = records.iter_mut().find(|r| r.id() == id) {
            record.merge(&mutation.payload);
          }
        }
      }
    }
  }

  #[async_trait]
  impl RecordService for MockService {
    async fn fetch(&self, _collection: Collection) -> color_eyre::Result<Vec<Record>> {
      if self.fail_fetch.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }
      Ok(self.records.lock().unwrap().clone())
    }

    async fn mutate(&self, mutation: &Mutation) -> color_eyre::Result<()> {
      self.received.lock().unwrap().push(mutation.clone());
      let gate = self.gates.lock().unwrap().pop_front();
      let ok = match gate {
        Some(rx) => rx.await.unwrap_or(false),
        None => !self.fail_writes.load(Ordering::SeqCst),
      };
      if !ok {
        return Err(eyre!("record is locked"));
      }
      self.apply(mutation);
      Ok(())
    }
  }

  async fn loaded(collection: Collection, service: Arc<MockService>) -> OptimisticCollection {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    let records = OptimisticCollection::new(collection, service, sync);
    records.load().await.unwrap();
    records
  }

  async fn wait_for_writes(service: &MockService, count: usize) {
    while service.received() < count {
      tokio::task::yield_now().await;
    }
  }

  fn ticket(id: &str, status: &str) -> Value {
    json!({"id": id, "title": "Printer jam", "priority": "Low", "status": status})
  }

  #[tokio::test]
  async fn test_failed_status_change_restores_exact_snapshot() {
    let service = MockService::with_records(vec![ticket("TCK-0001", "New"), ticket("TCK-0002", "Waiting")]);
    let tickets = loaded(Collection::Tickets, service.clone()).await;
    let before = serde_json::to_vec(&tickets.records()).unwrap();

    let gate = service.gate_next();
    let task = {
      let tickets = tickets.clone();
      tokio::spawn(async move { tickets.set_status("TCK-0001", "In Progress").await })
    };
    wait_for_writes(&service, 1).await;

    // Speculative edit is visible while the write is in flight
    assert_eq!(tickets.records()[0].text("status"), "In Progress");
    assert_eq!(tickets.sync.state().status, SyncStatus::Syncing);

    gate.send(false).unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, MutationError::Rejected(_)));

    let after = serde_json::to_vec(&tickets.records()).unwrap();
    assert_eq!(before, after);
    assert_eq!(
      tickets.sync.state().message.as_deref(),
      Some("Sync failed: record is locked")
    );
  }

  #[tokio::test]
  async fn test_delete_stays_applied_when_refetch_fails() {
    let service = MockService::with_records(vec![ticket("41", "New"), ticket("42", "New")]);
    let tickets = loaded(Collection::Tickets, service.clone()).await;

    service.fail_fetch.store(true, Ordering::SeqCst);
    tickets.delete("42").await.unwrap();

    let view = tickets.view();
    assert!(view.records.iter().all(|r| r.id() != Some("42")));
    assert_eq!(view.records.len(), 1);
    assert_eq!(
      view.refresh_error.as_deref(),
      Some("Refresh failed: network unreachable")
    );
    assert_eq!(tickets.sync.state().status, SyncStatus::Success);
  }

  #[tokio::test]
  async fn test_successful_update_takes_server_state() {
    let service = MockService::with_records(vec![ticket("TCK-0001", "New")]);
    let tickets = loaded(Collection::Tickets, service.clone()).await;

    let patch = json!({"priority": "High", "assignee": "sam"});
    tickets
      .update("TCK-0001", patch.as_object().cloned().unwrap())
      .await
      .unwrap();

    let records = tickets.records();
    assert_eq!(records[0].text("priority"), "High");
    assert_eq!(records[0].text("assignee"), "sam");
    assert_eq!(tickets.view().refresh_error, None);
  }

  #[tokio::test]
  async fn test_create_appears_only_after_refetch() {
    let service = MockService::with_records(vec![]);
    let accounts = loaded(Collection::Accounts, service.clone()).await;

    let gate = service.gate_next();
    let task = {
      let accounts = accounts.clone();
      let fields = json!({"name": "Initech"}).as_object().cloned().unwrap();
      tokio::spawn(async move { accounts.create(fields).await })
    };
    wait_for_writes(&service, 1).await;
    assert!(accounts.records().is_empty());

    gate.send(true).unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(accounts.records().len(), 1);
    assert_eq!(accounts.records()[0].text("name"), "Initech");
  }

  #[tokio::test]
  async fn test_failed_create_changes_nothing() {
    let service = MockService::with_records(vec![json!({"id": "ACC-0001", "name": "Globex"})]);
    let accounts = loaded(Collection::Accounts, service.clone()).await;
    let version = accounts.view().version;

    service.fail_writes.store(true, Ordering::SeqCst);
    let fields = json!({"name": "Initech"}).as_object().cloned().unwrap();
    assert!(accounts.create(fields).await.is_err());

    assert_eq!(accounts.records().len(), 1);
    assert_eq!(accounts.view().version, version);
  }

  #[tokio::test]
  async fn test_invalid_input_never_reaches_coordinator() {
    let service = MockService::with_records(vec![ticket("TCK-0001", "New")]);
    let tickets = loaded(Collection::Tickets, service.clone()).await;
    let version = tickets.view().version;

    let err = tickets.set_status("TCK-0001", "Escalated").await.unwrap_err();
    assert!(matches!(err, MutationError::Invalid(ValidationError::UnknownStatus { .. })));
    assert!(matches!(
      tickets.delete("  ").await,
      Err(MutationError::Invalid(ValidationError::MissingId))
    ));
    let fields = json!({"title": "No account"}).as_object().cloned().unwrap();
    assert!(matches!(
      tickets.create(fields).await,
      Err(MutationError::Invalid(_))
    ));

    assert_eq!(service.received(), 0);
    assert_eq!(tickets.sync.state().status, SyncStatus::Idle);
    assert_eq!(tickets.view().version, version);
  }

  #[tokio::test]
  async fn test_failed_initial_load_offers_retry() {
    let service = MockService::with_records(vec![ticket("TCK-0001", "New")]);
    service.fail_fetch.store(true, Ordering::SeqCst);
    let tickets = OptimisticCollection::new(
      Collection::Tickets,
      service.clone(),
      SyncCoordinator::new(Duration::from_secs(4)),
    );

    assert!(tickets.load().await.is_err());
    assert_eq!(
      tickets.view().load,
      LoadState::Failed("network unreachable".into())
    );

    service.fail_fetch.store(false, Ordering::SeqCst);
    tickets.load().await.unwrap();
    assert_eq!(tickets.view().load, LoadState::Ready);
    assert_eq!(tickets.records().len(), 1);
  }

  /// Overlapping writes to one record: the earlier write's rollback wipes
  /// the later write's edit until the later refetch lands.
  #[tokio::test]
  async fn test_overlapping_writes_on_one_record_clobber_then_reconcile() {
    let service = MockService::with_records(vec![ticket("TCK-0001", "New")]);
    let tickets = loaded(Collection::Tickets, service.clone()).await;

    let gate_a = service.gate_next();
    let gate_b = service.gate_next();

    let a = {
      let tickets = tickets.clone();
      tokio::spawn(async move { tickets.set_status("TCK-0001", "In Progress").await })
    };
    wait_for_writes(&service, 1).await;

    let b = {
      let tickets = tickets.clone();
      let patch = json!({"priority": "High"}).as_object().cloned().unwrap();
      tokio::spawn(async move { tickets.update("TCK-0001", patch).await })
    };
    wait_for_writes(&service, 2).await;
    assert_eq!(tickets.records()[0].text("priority"), "High");
    assert_eq!(tickets.records()[0].text("status"), "In Progress");

    gate_a.send(false).unwrap();
    assert!(a.await.unwrap().is_err());
    // Rollback to A's snapshot also removed B's edit
    assert_eq!(tickets.records()[0].text("priority"), "Low");
    assert_eq!(tickets.records()[0].text("status"), "New");

    gate_b.send(true).unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(tickets.records()[0].text("priority"), "High");
    assert_eq!(tickets.records()[0].text("status"), "New");
    assert_eq!(tickets.sync.state().status, SyncStatus::Error);
  }
}
