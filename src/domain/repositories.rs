//! Repository Pattern: persistence abstractions the application layer
//! depends on, implemented concretely by `infrastructure::persistence`.
//!
//! # Examples
//!
//! ```ignore
//! let repo: std::sync::Arc<dyn SnapshotRepository> = make_repository();
//! repo.save_current(&snapshot).await?;
//! let recovered = repo.load_current().await?;
//! ```

use async_trait::async_trait;
use anyhow::Result;

use crate::domain::snapshot::Snapshot;

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Overwrites the current-state file atomically, rotating the prior
    /// current-state into the one-generation backup first.
    async fn save_current(&self, snapshot: &Snapshot) -> Result<()>;

    async fn load_current(&self) -> Result<Option<Snapshot>>;

    async fn load_backup(&self) -> Result<Option<Snapshot>>;

    /// Writes a dated snapshot into the snapshot directory.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>>;

    /// Deletes snapshots beyond `max_count` or older than `retention_days`.
    async fn prune(&self, max_count: usize, retention_days: i64) -> Result<()>;
}
