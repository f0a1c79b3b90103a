//! Wire contract between the terminal client and the gateway.

mod client;
mod wire;

pub use client::DashboardClient;
pub use wire::{Envelope, Mutation, ReadQuery, UserProfile, WriteRequest};

use async_trait::async_trait;
use color_eyre::Result;

use crate::resources::{Collection, Record};

/// Remote operations the optimistic layer drives.
#[async_trait]
pub trait RecordService: Send + Sync {
  /// Authoritative snapshot of a collection, header row already stripped.
  async fn fetch(&self, collection: Collection) -> Result<Vec<Record>>;

  /// Submit one write. Resolves once the store confirmed it.
  async fn mutate(&self, mutation: &Mutation) -> Result<()>;
}
