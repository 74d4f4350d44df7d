//! `FileSnapshotRepository`: the current-state/backup/snapshot-directory
//! scheme of §4.9, with atomic temp-file-then-rename writes and retention
//! pruning by count and age.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use crate::domain::repositories::SnapshotRepository;
use crate::domain::snapshot::Snapshot;

const CURRENT_FILE: &str = "current_state.json";
const BACKUP_FILE: &str = "backup_state.json";
const SNAPSHOTS_DIR: &str = "snapshots";

pub struct FileSnapshotRepository {
    state_dir: PathBuf,
}

impl FileSnapshotRepository {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir).await?;
        fs::create_dir_all(self.state_dir.join(SNAPSHOTS_DIR)).await?;
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("writing temp file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
        Ok(())
    }

    async fn read_json(&self, path: &Path) -> Result<Option<Snapshot>> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotRepository for FileSnapshotRepository {
    async fn save_current(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_dirs().await?;
        let current_path = self.state_dir.join(CURRENT_FILE);
        let backup_path = self.state_dir.join(BACKUP_FILE);

        if fs::metadata(&current_path).await.is_ok() {
            fs::copy(&current_path, &backup_path)
                .await
                .context("rotating current state into backup")?;
        }

        let contents = serde_json::to_string_pretty(snapshot)?;
        self.write_atomic(&current_path, &contents).await
    }

    async fn load_current(&self) -> Result<Option<Snapshot>> {
        self.read_json(&self.state_dir.join(CURRENT_FILE)).await
    }

    async fn load_backup(&self) -> Result<Option<Snapshot>> {
        self.read_json(&self.state_dir.join(BACKUP_FILE)).await
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_dirs().await?;
        let filename = format!("snapshot_{}.json", snapshot.timestamp.format("%Y%m%d_%H%M%S"));
        let path = self.state_dir.join(SNAPSHOTS_DIR).join(filename);
        let contents = serde_json::to_string_pretty(snapshot)?;
        self.write_atomic(&path, &contents).await
    }

    async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let dir = self.state_dir.join(SNAPSHOTS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(entry.path());
            }
        }
        paths.sort();
        match paths.pop() {
            Some(path) => self.read_json(&path).await,
            None => Ok(None),
        }
    }

    async fn prune(&self, max_count: usize, retention_days: i64) -> Result<()> {
        let dir = self.state_dir.join(SNAPSHOTS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let excess = paths.len().saturating_sub(max_count);
        for (i, path) in paths.iter().enumerate() {
            let too_old = match self.read_json(path).await {
                Ok(Some(snapshot)) => snapshot.timestamp < cutoff,
                _ => false,
            };
            if i < excess || too_old {
                let _ = fs::remove_file(path).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::{RiskLevel, RiskSummary};
    use crate::domain::session::TradingSession;
    use crate::domain::snapshot::SnapshotMetadata;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            timestamp: Utc::now(),
            session: TradingSession::new(Uuid::new_v4()),
            active_orders: vec![],
            active_positions: vec![],
            monitored_symbols: HashSet::new(),
            portfolio_id: Uuid::new_v4(),
            risk_metrics: RiskSummary {
                exposure_percent: Default::default(),
                daily_loss_percent: Default::default(),
                drawdown_percent: Default::default(),
                risk_level: RiskLevel::Low,
                active_thresholds: vec![],
            },
            metadata: SnapshotMetadata::default(),
        }
    }

    #[tokio::test]
    async fn save_then_load_current_round_trips() {
        let dir = tempdir();
        let repo = FileSnapshotRepository::new(&dir);
        let snapshot = sample_snapshot();
        repo.save_current(&snapshot).await.unwrap();

        let recovered = repo.load_current().await.unwrap().unwrap();
        assert_eq!(recovered.portfolio_id, snapshot.portfolio_id);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn second_save_rotates_first_into_backup() {
        let dir = tempdir();
        let repo = FileSnapshotRepository::new(&dir);
        repo.save_current(&sample_snapshot()).await.unwrap();
        repo.save_current(&sample_snapshot()).await.unwrap();

        assert!(repo.load_backup().await.unwrap().is_some());
        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn snapshot_round_trip_through_directory() {
        let dir = tempdir();
        let repo = FileSnapshotRepository::new(&dir);
        repo.save_snapshot(&sample_snapshot()).await.unwrap();

        let latest = repo.load_latest_snapshot().await.unwrap();
        assert!(latest.is_some());
        let _ = fs::remove_dir_all(&dir).await;
    }

    fn tempdir() -> PathBuf {
        std::env::temp_dir().join(format!("trading-core-test-{}", Uuid::new_v4()))
    }
}
