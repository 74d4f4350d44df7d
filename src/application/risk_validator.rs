//! Pre-trade Risk Validator: eight ordered checks against a proposed order
//! and a portfolio snapshot, producing Allow / Adjust / Block. Grounded on
//! `original_source/.../pretrade_risk_validator.py::validate_order` for
//! check order and thresholds, and the teacher's `risk_manager.rs` for the
//! validator-pipeline shape.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::risk::{Adjustments, RiskAction, RiskDecision, RiskLevel, RiskSummary};
use crate::domain::types::{OrderSide, Symbol};

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_leverage: u32,
    pub max_position_size_usdt: Decimal,
    pub daily_loss_limit_usdt: Decimal,
    pub max_positions: usize,
    pub max_drawdown_percent: Decimal,
    pub max_concentration_percent: Decimal,
    /// Groups of symbols treated as correlated (§3 "Correlation groups").
    pub correlation_groups: Vec<Vec<Symbol>>,
    pub max_correlated_positions: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: 10,
            max_position_size_usdt: Decimal::from(10_000),
            daily_loss_limit_usdt: Decimal::from(500),
            max_positions: 10,
            max_drawdown_percent: Decimal::from(20),
            max_concentration_percent: dec!(30),
            correlation_groups: vec![vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
            ]],
            max_correlated_positions: 2,
        }
    }
}

/// A snapshot of portfolio state the validator checks against; the
/// validator itself holds no portfolio state and is a pure function of its
/// inputs (§8 "Risk validator is a pure function of...").
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub available: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub daily_pnl: Decimal,
    /// Current market-value exposure per open symbol.
    pub exposure_by_symbol: HashMap<Symbol, Decimal>,
}

#[derive(Debug, Clone)]
pub struct OrderProposal {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub leverage: u32,
}

/// The validator's decision plus the (possibly adjusted) parameters the
/// caller should actually submit.
#[derive(Debug, Clone)]
pub struct RiskOutcome {
    pub decision: RiskDecision,
    pub quantity: Decimal,
    pub leverage: u32,
}

pub struct RiskValidator {
    config: RiskConfig,
}

impl RiskValidator {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Runs the eight checks in order. Adjust opportunities (leverage,
    /// margin) are applied in place and checking continues with the
    /// adjusted values; the first Block wins.
    pub fn validate(&self, proposal: &OrderProposal, portfolio: &PortfolioSnapshot) -> RiskOutcome {
        let mut quantity = proposal.quantity;
        let mut leverage = proposal.leverage;
        let mut adjustments = Adjustments::default();
        let mut adjusted = false;

        // 1. Leverage ceiling
        if leverage > self.config.max_leverage {
            leverage = self.config.max_leverage;
            adjustments.leverage = Some(leverage);
            adjusted = true;
        }

        let position_value = quantity * proposal.price;

        // 2. Position-size ceiling
        if position_value > self.config.max_position_size_usdt {
            return self.blocked("position value exceeds maximum position size", quantity, leverage);
        }

        // 3. Daily loss limit (closed interval: exactly at the limit blocks)
        if portfolio.daily_pnl.abs() >= self.config.daily_loss_limit_usdt {
            return self.blocked("daily loss limit reached", quantity, leverage);
        }

        // 4. Max positions
        let already_open = portfolio.exposure_by_symbol.contains_key(&proposal.symbol);
        if !already_open && portfolio.exposure_by_symbol.len() >= self.config.max_positions {
            return self.blocked("maximum open position count reached", quantity, leverage);
        }

        // 5. Margin feasibility
        let required_margin = position_value / Decimal::from(leverage.max(1));
        if required_margin > portfolio.available {
            let feasible_value = portfolio.available * Decimal::from(leverage.max(1)) * dec!(0.95);
            let feasible_qty = if proposal.price.is_zero() {
                dec!(0)
            } else {
                feasible_value / proposal.price
            };
            if feasible_qty < proposal.quantity * dec!(0.10) {
                return self.blocked("insufficient margin even after adjustment", quantity, leverage);
            }
            quantity = feasible_qty;
            adjustments.quantity = Some(quantity);
            adjusted = true;
        }

        // 6. Concentration: per-symbol exposure <= 30% of equity
        let position_value = quantity * proposal.price;
        let existing_exposure = portfolio
            .exposure_by_symbol
            .get(&proposal.symbol)
            .copied()
            .unwrap_or(dec!(0));
        let projected_exposure = existing_exposure + position_value;
        if !portfolio.equity.is_zero() {
            let concentration_percent = (projected_exposure / portfolio.equity) * Decimal::from(100);
            if concentration_percent > self.config.max_concentration_percent {
                return self.blocked("symbol concentration exceeds maximum", quantity, leverage);
            }
        }

        // 7. Correlation: more than N positions open within one declared group
        if let Some(group) = self
            .config
            .correlation_groups
            .iter()
            .find(|group| group.contains(&proposal.symbol))
        {
            let open_in_group = group
                .iter()
                .filter(|symbol| portfolio.exposure_by_symbol.contains_key(*symbol))
                .count();
            let would_be_new = if already_open { 0 } else { 1 };
            if open_in_group + would_be_new > self.config.max_correlated_positions {
                return self.blocked("correlated-group position limit reached", quantity, leverage);
            }
        }

        // 8. Drawdown
        if !portfolio.peak_equity.is_zero() {
            let drawdown_percent =
                ((portfolio.peak_equity - portfolio.equity) / portfolio.peak_equity) * Decimal::from(100);
            if drawdown_percent > self.config.max_drawdown_percent {
                return self.blocked("maximum drawdown exceeded", quantity, leverage);
            }
        }

        let decision = if adjusted {
            RiskDecision::adjust(adjustments, "leverage and/or quantity adjusted to configured limits")
        } else {
            RiskDecision::allow()
        };
        RiskOutcome {
            decision,
            quantity,
            leverage,
        }
    }

    fn blocked(&self, reason: &str, quantity: Decimal, leverage: u32) -> RiskOutcome {
        RiskOutcome {
            decision: RiskDecision::block(reason),
            quantity,
            leverage,
        }
    }

    /// `{exposure %, daily-loss %, drawdown %, risk level, active thresholds}`
    /// for the external `getRiskSummary` operation.
    pub fn summary(&self, portfolio: &PortfolioSnapshot) -> RiskSummary {
        let total_exposure: Decimal = portfolio.exposure_by_symbol.values().copied().sum();
        let exposure_percent = if portfolio.equity.is_zero() {
            dec!(0)
        } else {
            (total_exposure / portfolio.equity) * Decimal::from(100)
        };
        let daily_loss_percent = if self.config.daily_loss_limit_usdt.is_zero() {
            dec!(0)
        } else {
            (portfolio.daily_pnl.abs() / self.config.daily_loss_limit_usdt) * Decimal::from(100)
        };
        let drawdown_percent = if portfolio.peak_equity.is_zero() {
            dec!(0)
        } else {
            ((portfolio.peak_equity - portfolio.equity) / portfolio.peak_equity) * Decimal::from(100)
        };

        let mut active_thresholds = Vec::new();
        if exposure_percent > self.config.max_concentration_percent {
            active_thresholds.push("concentration".to_string());
        }
        if daily_loss_percent >= Decimal::from(90) {
            active_thresholds.push("daily_loss".to_string());
        }
        if drawdown_percent > self.config.max_drawdown_percent {
            active_thresholds.push("drawdown".to_string());
        }

        let risk_level = RiskLevel::from_ratio_percent(
            exposure_percent.max(daily_loss_percent).max(drawdown_percent),
        );

        RiskSummary {
            exposure_percent,
            daily_loss_percent,
            drawdown_percent,
            risk_level,
            active_thresholds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio() -> PortfolioSnapshot {
        PortfolioSnapshot {
            available: Decimal::from(10_000),
            equity: Decimal::from(10_000),
            peak_equity: Decimal::from(10_000),
            daily_pnl: dec!(0),
            exposure_by_symbol: HashMap::new(),
        }
    }

    fn validator() -> RiskValidator {
        RiskValidator::new(RiskConfig::default())
    }

    #[test]
    fn happy_path_allows_small_limit_order() {
        let proposal = OrderProposal {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.001),
            price: Decimal::from(50_000),
            leverage: 5,
        };
        let outcome = validator().validate(&proposal, &portfolio());
        assert!(matches!(outcome.decision.action, RiskAction::Allow));
    }

    #[test]
    fn oversize_order_is_blocked() {
        let proposal = OrderProposal {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(1.0),
            price: Decimal::from(50_000),
            leverage: 5,
        };
        let outcome = validator().validate(&proposal, &portfolio());
        assert!(outcome.decision.is_blocked());
        assert!(outcome.decision.reason.to_lowercase().contains("exceeds maximum"));
    }

    #[test]
    fn leverage_above_max_is_adjusted_down() {
        let proposal = OrderProposal {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: Decimal::from(5_000),
            leverage: 20,
        };
        let outcome = validator().validate(&proposal, &portfolio());
        assert_eq!(outcome.leverage, 10);
        match outcome.decision.action {
            RiskAction::Adjust(Adjustments { leverage, .. }) => assert_eq!(leverage, Some(10)),
            other => panic!("expected Adjust, got {other:?}"),
        }
    }

    #[test]
    fn daily_loss_at_exactly_the_limit_blocks() {
        let mut snapshot = portfolio();
        snapshot.daily_pnl = -Decimal::from(500);
        let proposal = OrderProposal {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.001),
            price: Decimal::from(50_000),
            leverage: 5,
        };
        let outcome = validator().validate(&proposal, &snapshot);
        assert!(outcome.decision.is_blocked());
    }

    #[test]
    fn concentration_at_exactly_thirty_percent_is_allowed() {
        let mut snapshot = portfolio();
        snapshot.equity = Decimal::from(10_000);
        let proposal = OrderProposal {
            symbol: "ETHUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.6),
            price: Decimal::from(5_000), // 3000 = exactly 30% of 10000
            leverage: 1,
        };
        let outcome = validator().validate(&proposal, &snapshot);
        assert!(!outcome.decision.is_blocked());
    }

    #[test]
    fn correlation_group_blocks_a_third_position() {
        let mut snapshot = portfolio();
        snapshot.exposure_by_symbol.insert("BTCUSDT".to_string(), dec!(100));
        snapshot.exposure_by_symbol.insert("ETHUSDT".to_string(), dec!(100));
        let proposal = OrderProposal {
            symbol: "BNBUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: Decimal::from(300),
            leverage: 1,
        };
        let outcome = validator().validate(&proposal, &snapshot);
        assert!(outcome.decision.is_blocked());
    }
}
