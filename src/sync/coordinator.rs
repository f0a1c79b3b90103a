//! Session-wide accounting of in-flight writes and the status line they
//! drive.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  Idle,
  Syncing,
  Success,
  Error,
}

/// What the sync indicator shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
  pub status: SyncStatus,
  /// Writes issued but not yet settled
  pub pending: usize,
  pub message: Option<String>,
}

impl SyncState {
  fn idle() -> Self {
    Self {
      status: SyncStatus::Idle,
      pending: 0,
      message: None,
    }
  }

  fn syncing(pending: usize) -> Self {
    let message = if pending == 1 {
      "Saving 1 change...".to_string()
    } else {
      format!("Saving {} changes...", pending)
    };
    Self {
      status: SyncStatus::Syncing,
      pending,
      message: Some(message),
    }
  }

  fn failed(pending: usize, reason: &str) -> Self {
    Self {
      status: SyncStatus::Error,
      pending,
      message: Some(format!("Sync failed: {}", reason)),
    }
  }

  fn saved() -> Self {
    Self {
      status: SyncStatus::Success,
      pending: 0,
      message: Some("All changes saved".to_string()),
    }
  }
}

struct Inner {
  pending: usize,
  /// First failure seen since the counter last left zero
  batch_error: Option<String>,
  revert: Option<JoinHandle<()>>,
  /// Bumped on every new write so a stale revert timer stays quiet
  generation: u64,
}

/// Counts in-flight writes and publishes the aggregate status.
///
/// One per session. Clones share state.
#[derive(Clone)]
pub struct SyncCoordinator {
  inner: Arc<Mutex<Inner>>,
  tx: Arc<watch::Sender<SyncState>>,
  revert_delay: Duration,
}

impl SyncCoordinator {
  pub fn new(revert_delay: Duration) -> Self {
    let (tx, _) = watch::channel(SyncState::idle());
    Self {
      inner: Arc::new(Mutex::new(Inner {
        pending: 0,
        batch_error: None,
        revert: None,
        generation: 0,
      })),
      tx: Arc::new(tx),
      revert_delay,
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncState> {
    self.tx.subscribe()
  }

  pub fn state(&self) -> SyncState {
    self.tx.borrow().clone()
  }

  pub fn pending(&self) -> usize {
    self.lock().pending
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Track `action` as one pending write.
  ///
  /// The counter moves as soon as this is called, before the returned
  /// future is first polled. The action's own result is handed back
  /// unchanged. Dropping the future early settles it as a failure.
  pub fn run<T, E, Fut>(&self, action: Fut) -> impl Future<Output = Result<T, E>>
  where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
  {
    let mut ticket = self.begin();
    async move {
      let result = action.await;
      ticket.settle(result.as_ref().err().map(ToString::to_string));
      result
    }
  }

  fn begin(&self) -> PendingTicket {
    let mut inner = self.lock();
    if let Some(timer) = inner.revert.take() {
      timer.abort();
    }
    inner.generation += 1;
    if inner.pending == 0 {
      inner.batch_error = None;
    }
    inner.pending += 1;

    debug!(pending = inner.pending, "write started");
    self.tx.send_replace(SyncState::syncing(inner.pending));

    PendingTicket {
      coordinator: self.clone(),
      settled: false,
    }
  }

  fn finish(&self, failure: Option<String>) {
    let mut inner = self.lock();
    inner.pending = inner.pending.saturating_sub(1);
    let pending = inner.pending;

    let state = match failure {
      Some(reason) => {
        warn!(%reason, pending, "write failed");
        let state = SyncState::failed(pending, &reason);
        if inner.batch_error.is_none() {
          inner.batch_error = Some(reason);
        }
        state
      }
      None if pending > 0 => SyncState::syncing(pending),
      None => match &inner.batch_error {
        Some(reason) => SyncState::failed(0, reason),
        None => SyncState::saved(),
      },
    };

    if pending == 0 {
      self.arm_revert(&mut inner);
    }
    self.tx.send_replace(state);
  }

  /// Schedule the return to `Idle` after a terminal status.
  fn arm_revert(&self, inner: &mut Inner) {
    if let Some(timer) = inner.revert.take() {
      timer.abort();
    }
    // Outside a runtime the terminal status simply stays up
    let Ok(runtime) = Handle::try_current() else {
      return;
    };

    let generation = inner.generation;
    let shared = Arc::clone(&self.inner);
    let tx = Arc::clone(&self.tx);
    let delay = self.revert_delay;

    inner.revert = Some(runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      let inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
      if inner.generation == generation && inner.pending == 0 {
        tx.send_replace(SyncState::idle());
      }
    }));
  }
}

/// One issued write. Settles exactly once, on completion or on drop.
struct PendingTicket {
  coordinator: SyncCoordinator,
  settled: bool,
}

impl PendingTicket {
  fn settle(&mut self, failure: Option<String>) {
    if !self.settled {
      self.settled = true;
      self.coordinator.finish(failure);
    }
  }
}

impl Drop for PendingTicket {
  fn drop(&mut self) {
    self.settle(Some("interrupted".to_string()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::oneshot;

  fn succeed_on(rx: oneshot::Receiver<()>) -> impl Future<Output = Result<(), String>> {
    async move { rx.await.map_err(|_| "sender dropped".to_string()) }
  }

  fn fail_on(rx: oneshot::Receiver<()>) -> impl Future<Output = Result<(), String>> {
    async move {
      let _ = rx.await;
      Err("server said no".to_string())
    }
  }

  #[tokio::test]
  async fn test_overlapping_writes_count_down() {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    let (tx_a, rx_a) = oneshot::channel();
    let (tx_b, rx_b) = oneshot::channel();

    let a = tokio::spawn(sync.run(succeed_on(rx_a)));
    assert_eq!(sync.state(), SyncState::syncing(1));
    assert_eq!(sync.state().message.as_deref(), Some("Saving 1 change..."));

    let b = tokio::spawn(sync.run(succeed_on(rx_b)));
    assert_eq!(sync.state().message.as_deref(), Some("Saving 2 changes..."));
    assert_eq!(sync.pending(), 2);

    tx_a.send(()).unwrap();
    a.await.unwrap().unwrap();
    assert_eq!(sync.state(), SyncState::syncing(1));

    tx_b.send(()).unwrap();
    b.await.unwrap().unwrap();
    let state = sync.state();
    assert_eq!(state.status, SyncStatus::Success);
    assert_eq!(state.message.as_deref(), Some("All changes saved"));
    assert_eq!(sync.pending(), 0);
  }

  #[tokio::test]
  async fn test_terminal_status_is_error_iff_any_write_failed() {
    for (total, failing) in [(3, 0), (3, 1), (3, 3), (5, 2)] {
      let sync = SyncCoordinator::new(Duration::from_secs(4));
      let mut senders = Vec::new();
      let mut handles = Vec::new();

      for i in 0..total {
        let (tx, rx) = oneshot::channel();
        // Failures are issued first so a success always settles last
        let handle = if i < failing {
          tokio::spawn(sync.run(fail_on(rx)))
        } else {
          tokio::spawn(sync.run(succeed_on(rx)))
        };
        senders.push(tx);
        handles.push(handle);
      }
      assert_eq!(sync.pending(), total);

      for (tx, handle) in senders.into_iter().zip(handles) {
        tx.send(()).unwrap();
        let _ = handle.await.unwrap();
      }

      let state = sync.state();
      assert_eq!(sync.pending(), 0);
      assert_eq!(state.pending, 0);
      assert_eq!(
        state.status == SyncStatus::Error,
        failing > 0,
        "{} writes, {} failing",
        total,
        failing
      );
    }
  }

  #[tokio::test]
  async fn test_failure_message_and_error_passthrough() {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    let (tx, rx) = oneshot::channel();
    let pending = sync.run(fail_on(rx));
    tx.send(()).unwrap();

    assert_eq!(pending.await, Err("server said no".to_string()));
    assert_eq!(
      sync.state().message.as_deref(),
      Some("Sync failed: server said no")
    );
  }

  #[tokio::test]
  async fn test_dropped_write_settles_as_interrupted() {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    let pending = sync.run(async { Ok::<(), String>(()) });
    assert_eq!(sync.pending(), 1);

    drop(pending);
    assert_eq!(sync.pending(), 0);
    assert_eq!(
      sync.state().message.as_deref(),
      Some("Sync failed: interrupted")
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_status_reverts_to_idle() {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    sync.run(async { Ok::<(), String>(()) }).await.unwrap();
    assert_eq!(sync.state().status, SyncStatus::Success);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sync.state().status, SyncStatus::Success);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sync.state(), SyncState::idle());
  }

  #[tokio::test(start_paused = true)]
  async fn test_new_write_cancels_pending_revert() {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    sync.run(async { Ok::<(), String>(()) }).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let (tx, rx) = oneshot::channel();
    let second = tokio::spawn(sync.run(succeed_on(rx)));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sync.state().status, SyncStatus::Syncing);

    tx.send(()).unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(sync.state().status, SyncStatus::Success);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sync.state().status, SyncStatus::Idle);
  }

  #[tokio::test]
  async fn test_subscribers_see_latest_state() {
    let sync = SyncCoordinator::new(Duration::from_secs(4));
    let mut rx = sync.subscribe();
    sync.run(async { Err::<(), _>("offline") }).await.unwrap_err();

    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().status, SyncStatus::Error);
  }
}
