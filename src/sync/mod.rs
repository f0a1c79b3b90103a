//! Client-side write coordination: optimistic collections sharing one
//! sync coordinator.

mod coordinator;
mod optimistic;

pub use coordinator::{SyncCoordinator, SyncState, SyncStatus};
pub use optimistic::{CollectionView, LoadState, MutationError, OptimisticCollection};

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::api::RecordService;
use crate::resources::Collection;

/// All five collections of a session and the coordinator they report to.
#[derive(Clone)]
pub struct Dashboard {
  sync: SyncCoordinator,
  collections: Vec<OptimisticCollection>,
}

impl Dashboard {
  pub fn new(service: Arc<dyn RecordService>, revert_delay: Duration) -> Self {
    let sync = SyncCoordinator::new(revert_delay);
    let collections = Collection::ALL
      .into_iter()
      .map(|c| OptimisticCollection::new(c, Arc::clone(&service), sync.clone()))
      .collect();
    Self { sync, collections }
  }

  pub fn sync(&self) -> &SyncCoordinator {
    &self.sync
  }

  pub fn collection(&self, collection: Collection) -> &OptimisticCollection {
    &self.collections[collection.index()]
  }

  /// Load every collection concurrently. Failures are kept per collection.
  pub async fn load_all(&self) {
    join_all(self.collections.iter().map(|c| c.load())).await;
  }
}
