//! Risk Validator output types: the `(action, reason, adjustments?)` triple
//! and the operator-facing summary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Adjustments {
    pub leverage: Option<u32>,
    pub quantity: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskAction {
    Allow,
    Adjust(Adjustments),
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub action: RiskAction,
    pub reason: String,
}

impl RiskDecision {
    pub fn allow() -> Self {
        Self {
            action: RiskAction::Allow,
            reason: "allowed".to_string(),
        }
    }

    pub fn adjust(adjustments: Adjustments, reason: impl Into<String>) -> Self {
        Self {
            action: RiskAction::Adjust(adjustments),
            reason: reason.into(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: RiskAction::Block,
            reason: reason.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.action, RiskAction::Block)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Risk level is the max of the three ratios, bucketed at 40/70/90.
    pub fn from_ratio_percent(ratio_percent: Decimal) -> Self {
        if ratio_percent >= Decimal::from(90) {
            RiskLevel::Critical
        } else if ratio_percent >= Decimal::from(70) {
            RiskLevel::High
        } else if ratio_percent >= Decimal::from(40) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSummary {
    pub exposure_percent: Decimal,
    pub daily_loss_percent: Decimal,
    pub drawdown_percent: Decimal,
    pub risk_level: RiskLevel,
    pub active_thresholds: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_buckets() {
        assert_eq!(RiskLevel::from_ratio_percent(Decimal::from(10)), RiskLevel::Low);
        assert_eq!(RiskLevel::from_ratio_percent(Decimal::from(40)), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_ratio_percent(Decimal::from(70)), RiskLevel::High);
        assert_eq!(RiskLevel::from_ratio_percent(Decimal::from(95)), RiskLevel::Critical);
    }
}
