//! Trading Session: exactly one active session at a time, moving through
//! the status machine of §4.1. `Locked` is sticky — it cannot be left by
//! any path other than the explicit `unlock` operation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Stopping,
    Locked,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSession {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub running_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub error_message: Option<String>,
}

impl TradingSession {
    pub fn new(portfolio_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            status: SessionStatus::Stopped,
            started_at: None,
            stopped_at: None,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            running_pnl: dec!(0),
            max_drawdown: dec!(0),
            error_message: None,
        }
    }

    /// Validates and performs a status transition, per the machine in §4.1.
    pub fn transition_to(&mut self, target: SessionStatus) -> Result<(), CoreError> {
        if !self.can_transition_to(target) {
            return Err(CoreError::conflict(format!(
                "cannot transition session from {} to {target}",
                self.status
            )));
        }
        self.status = target;
        Ok(())
    }

    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        // Locked is sticky: only `unlock` (modelled as Locked -> Stopped) may leave it.
        if self.status == Locked {
            return target == Stopped;
        }
        match (self.status, target) {
            (Stopped, Starting) => true,
            (Starting, Running) => true,
            (Starting, Error) => true,
            (Running, Pausing) => true,
            (Pausing, Paused) => true,
            (Paused, Running) => true,
            (_, Stopping) => true,
            (Stopping, Stopped) => true,
            (Running, Locked) => true,
            (_, Error) => true,
            _ => false,
        }
    }

    pub fn record_trade(&mut self, pnl: Decimal) {
        self.total_trades += 1;
        if pnl > dec!(0) {
            self.winning_trades += 1;
        } else if pnl < dec!(0) {
            self.losing_trades += 1;
        }
        self.running_pnl += pnl;
    }

    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            return dec!(0);
        }
        Decimal::from(self.winning_trades) / Decimal::from(self.total_trades)
    }

    pub fn is_locked(&self) -> bool {
        self.status == SessionStatus::Locked
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }
}
