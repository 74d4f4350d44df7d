//! State Recovery: periodic and on-shutdown snapshots, with the
//! current -> backup -> latest-snapshot -> none recovery order at startup.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::domain::repositories::SnapshotRepository;
use crate::domain::snapshot::Snapshot;

const MAX_RUNNING_SNAPSHOT_AGE_HOURS: i64 = 1;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub snapshot_interval_secs: u64,
    pub max_snapshots: usize,
    pub retention_days: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 60,
            max_snapshots: 100,
            retention_days: 7,
        }
    }
}

pub struct RecoveryService {
    repository: Arc<dyn SnapshotRepository>,
    config: RecoveryConfig,
}

impl RecoveryService {
    pub fn new(repository: Arc<dyn SnapshotRepository>, config: RecoveryConfig) -> Self {
        Self { repository, config }
    }

    pub fn snapshot_interval_secs(&self) -> u64 {
        self.config.snapshot_interval_secs
    }

    /// Saves a periodic snapshot (triggered on interval, orderly stop,
    /// emergency stop, or explicit operator request) and prunes old ones.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.repository.save_current(snapshot).await?;
        self.repository.save_snapshot(snapshot).await?;
        self.repository
            .prune(self.config.max_snapshots, self.config.retention_days)
            .await
    }

    /// Recovery order: current -> backup -> latest valid snapshot -> none.
    /// Rejects snapshots older than retention, or with status `Running` and
    /// age > 1h (stale).
    pub async fn recover(&self) -> Result<Option<Snapshot>> {
        let retention = Duration::days(self.config.retention_days);
        let max_running_age = Duration::hours(MAX_RUNNING_SNAPSHOT_AGE_HOURS);
        let now = Utc::now();

        for (label, candidate) in [
            ("current", self.repository.load_current().await?),
            ("backup", self.repository.load_backup().await?),
            ("latest snapshot", self.repository.load_latest_snapshot().await?),
        ] {
            if let Some(snapshot) = candidate {
                if snapshot.is_stale(now, max_running_age, retention) {
                    warn!(source = label, "rejecting stale snapshot during recovery");
                    continue;
                }
                info!(source = label, session_id = %snapshot.session.id, "recovered session state");
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }
}
