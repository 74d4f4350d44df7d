//! Signal → Order Adaptation: turns a strategy [`Signal`] into a concrete
//! order request (steps 1-7 of the decision procedure; steps 8-9 — risk
//! validation and broker placement — are performed by the orchestrator in
//! `application::session_service`, which owns the Risk Validator and Broker
//! Port). Grounded on
//! `original_source/.../live_trading_service.py::_handle_signal` and
//! `_create_order_from_signal`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::application::sizing::PositionSizer;
use crate::domain::signal::{Signal, SignalType};
use crate::domain::types::{OrderSide, OrderType, PositionSide, Symbol};

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub confidence_threshold: f64,
    pub strength_threshold: f64,
    pub default_order_type: OrderType,
    pub limit_order_offset_percent: Decimal,
    pub stop_loss_percent: Decimal,
    pub take_profit_percent: Decimal,
    pub max_position_size_usdt: Decimal,
    pub default_leverage: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.55,
            strength_threshold: 0.3,
            default_order_type: OrderType::Limit,
            limit_order_offset_percent: dec!(0.001),
            stop_loss_percent: dec!(0.02),
            take_profit_percent: dec!(0.04),
            max_position_size_usdt: Decimal::from(10_000),
            default_leverage: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SignalMapping {
    side: OrderSide,
    position_side: PositionSide,
    reduce_only: bool,
    size_multiplier: Decimal,
}

fn lookup_mapping(signal_type: SignalType) -> Option<SignalMapping> {
    use SignalType::*;
    match signal_type {
        StrongBuy => Some(SignalMapping {
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            reduce_only: false,
            size_multiplier: dec!(1.5),
        }),
        Buy => Some(SignalMapping {
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            reduce_only: false,
            size_multiplier: dec!(1.0),
        }),
        Sell => Some(SignalMapping {
            side: OrderSide::Sell,
            position_side: PositionSide::Short,
            reduce_only: false,
            size_multiplier: dec!(1.0),
        }),
        StrongSell => Some(SignalMapping {
            side: OrderSide::Sell,
            position_side: PositionSide::Short,
            reduce_only: false,
            size_multiplier: dec!(1.5),
        }),
        CloseLong => Some(SignalMapping {
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            reduce_only: true,
            size_multiplier: dec!(1.0),
        }),
        CloseShort => Some(SignalMapping {
            side: OrderSide::Buy,
            position_side: PositionSide::Short,
            reduce_only: true,
            size_multiplier: dec!(1.0),
        }),
        Hold => None,
    }
}

#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub reduce_only: bool,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    SessionNotRunningOrAutoExecuteDisabled,
    BelowConfidenceOrStrengthThreshold,
    NoActionMapping,
    MissingCurrentPrice,
    ZeroSizedAfterClamp,
}

#[derive(Debug, Clone)]
pub enum AdaptedSignal {
    Order(OrderIntent),
    Dropped(DropReason),
}

pub struct SignalAdapter {
    config: AdapterConfig,
    sizer: PositionSizer,
}

impl SignalAdapter {
    pub fn new(config: AdapterConfig, sizer: PositionSizer) -> Self {
        Self { config, sizer }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn adapt(
        &self,
        signal: &Signal,
        session_running: bool,
        auto_execute_enabled: bool,
        available: Decimal,
    ) -> AdaptedSignal {
        // 1. Drop if session not Running or auto-execute disabled.
        if !session_running || !auto_execute_enabled {
            return AdaptedSignal::Dropped(DropReason::SessionNotRunningOrAutoExecuteDisabled);
        }

        // 2. Drop if confidence or strength below threshold.
        if signal.confidence < self.config.confidence_threshold
            || signal.strength < self.config.strength_threshold
        {
            return AdaptedSignal::Dropped(DropReason::BelowConfidenceOrStrengthThreshold);
        }

        // 3. Look up the signal-type mapping.
        let Some(mapping) = lookup_mapping(signal.signal_type) else {
            return AdaptedSignal::Dropped(DropReason::NoActionMapping);
        };

        let Some(current_price) = signal.current_price() else {
            return AdaptedSignal::Dropped(DropReason::MissingCurrentPrice);
        };

        // 5. Compute position size.
        let confidence = Decimal::try_from(signal.confidence).unwrap_or(dec!(0));
        let strength = Decimal::try_from(signal.strength).unwrap_or(dec!(0));
        let quantity = self.sizer.size_order(
            available,
            confidence,
            strength,
            mapping.size_multiplier,
            self.config.max_position_size_usdt,
            current_price,
            self.config.default_leverage,
        );
        if quantity.is_zero() {
            return AdaptedSignal::Dropped(DropReason::ZeroSizedAfterClamp);
        }

        // 6. Order type and price.
        let (order_type, limit_price) = match self.config.default_order_type {
            OrderType::Limit => {
                let offset = self.config.limit_order_offset_percent;
                let price = match mapping.side {
                    OrderSide::Buy => current_price * (Decimal::ONE + offset),
                    OrderSide::Sell => current_price * (Decimal::ONE - offset),
                };
                (OrderType::Limit, Some(price))
            }
            other => (other, None),
        };
        let entry_price = limit_price.unwrap_or(current_price);

        // 7. Stop-loss / take-profit around the entry.
        let (stop_loss, take_profit) = match mapping.side {
            OrderSide::Buy => (
                entry_price * (Decimal::ONE - self.config.stop_loss_percent),
                entry_price * (Decimal::ONE + self.config.take_profit_percent),
            ),
            OrderSide::Sell => (
                entry_price * (Decimal::ONE + self.config.stop_loss_percent),
                entry_price * (Decimal::ONE - self.config.take_profit_percent),
            ),
        };

        AdaptedSignal::Order(OrderIntent {
            symbol: signal.symbol.clone(),
            side: mapping.side,
            position_side: mapping.position_side,
            reduce_only: mapping.reduce_only,
            quantity,
            order_type,
            limit_price,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            leverage: self.config.default_leverage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sizing::SizingConfig;
    use std::collections::HashMap;

    fn sample_signal(signal_type: SignalType, confidence: f64, strength: f64) -> Signal {
        let mut parameters = HashMap::new();
        parameters.insert("price".to_string(), Decimal::from(50_000));
        Signal {
            strategy_id: "momentum-1".into(),
            symbol: "BTCUSDT".into(),
            signal_type,
            strength,
            confidence,
            parameters,
            timestamp: chrono::Utc::now(),
        }
    }

    fn adapter() -> SignalAdapter {
        SignalAdapter::new(AdapterConfig::default(), PositionSizer::new(SizingConfig::default()))
    }

    #[test]
    fn drops_when_session_not_running() {
        let signal = sample_signal(SignalType::Buy, 0.9, 0.9);
        let outcome = adapter().adapt(&signal, false, true, Decimal::from(10_000));
        assert!(matches!(
            outcome,
            AdaptedSignal::Dropped(DropReason::SessionNotRunningOrAutoExecuteDisabled)
        ));
    }

    #[test]
    fn drops_below_confidence_threshold() {
        let signal = sample_signal(SignalType::Buy, 0.1, 0.9);
        let outcome = adapter().adapt(&signal, true, true, Decimal::from(10_000));
        assert!(matches!(
            outcome,
            AdaptedSignal::Dropped(DropReason::BelowConfidenceOrStrengthThreshold)
        ));
    }

    #[test]
    fn hold_signal_drops_with_no_action_mapping() {
        let signal = sample_signal(SignalType::Hold, 0.9, 0.9);
        let outcome = adapter().adapt(&signal, true, true, Decimal::from(10_000));
        assert!(matches!(outcome, AdaptedSignal::Dropped(DropReason::NoActionMapping)));
    }

    #[test]
    fn buy_signal_produces_limit_order_above_current_price() {
        let signal = sample_signal(SignalType::Buy, 0.9, 0.9);
        let outcome = adapter().adapt(&signal, true, true, Decimal::from(10_000));
        match outcome {
            AdaptedSignal::Order(intent) => {
                assert_eq!(intent.side, OrderSide::Buy);
                assert!(intent.limit_price.unwrap() > Decimal::from(50_000));
                assert!(intent.stop_loss.unwrap() < intent.limit_price.unwrap());
                assert!(intent.take_profit.unwrap() > intent.limit_price.unwrap());
            }
            other => panic!("expected an order, got {other:?}"),
        }
    }

    #[test]
    fn close_long_signal_is_reduce_only_sell() {
        let signal = sample_signal(SignalType::CloseLong, 0.9, 0.9);
        let outcome = adapter().adapt(&signal, true, true, Decimal::from(10_000));
        match outcome {
            AdaptedSignal::Order(intent) => {
                assert_eq!(intent.side, OrderSide::Sell);
                assert!(intent.reduce_only);
            }
            other => panic!("expected an order, got {other:?}"),
        }
    }
}
