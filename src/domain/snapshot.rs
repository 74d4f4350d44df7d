//! Point-in-time serialized record of session + active orders + positions,
//! used for crash recovery (§4.9).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::Order;
use crate::domain::position::Position;
use crate::domain::risk::RiskSummary;
use crate::domain::session::TradingSession;
use crate::domain::types::Symbol;

/// Bumped whenever the on-disk shape of [`Snapshot`] changes incompatibly.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub schema_version: u32,
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub session: TradingSession,
    pub active_orders: Vec<Order>,
    pub active_positions: Vec<Position>,
    pub monitored_symbols: HashSet<Symbol>,
    pub portfolio_id: Uuid,
    pub risk_metrics: RiskSummary,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// A snapshot is stale if its status is `Running` and it is older than
    /// `max_age`, or if it is older than `retention`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_running_age: chrono::Duration, retention: chrono::Duration) -> bool {
        use crate::domain::session::SessionStatus;
        let age = now - self.timestamp;
        if age > retention {
            return true;
        }
        self.session.status == SessionStatus::Running && age > max_running_age
    }
}
