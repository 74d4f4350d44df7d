//! The Order Aggregate: a single order's state machine, invariants, and
//! emitted events. Events are owned by the order until [`Order::pull_events`]
//! is called, mirroring the source's `_events`/`pull_events()` pattern.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::OrderError;
use crate::domain::events::TradingEvent;
use crate::domain::types::{OrderSide, OrderType, Symbol, TimeInForce};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    CancelledConfirmed,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::CancelledConfirmed | OrderStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub broker_order_id: Option<String>,
    pub portfolio_id: Uuid,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub leverage: u32,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Decimal,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub broker_confirmed_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pending_events: Vec<TradingEvent>,
}

#[allow(clippy::too_many_arguments)]
impl Order {
    /// Factory: the `(new) -[submit]-> Pending` transition. Emits `OrderPlaced`.
    pub fn new(
        portfolio_id: Uuid,
        symbol: Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
        time_in_force: TimeInForce,
        reduce_only: bool,
        leverage: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        let mut order = Self {
            id,
            broker_order_id: None,
            portfolio_id,
            symbol,
            side,
            order_type,
            quantity,
            limit_price,
            stop_price,
            time_in_force,
            reduce_only,
            leverage,
            status: OrderStatus::Pending,
            filled_quantity: dec!(0),
            average_fill_price: dec!(0),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
            cancelled_at: None,
            broker_confirmed_at: None,
            pending_events: Vec::new(),
        };
        order.pending_events.push(TradingEvent::OrderPlaced {
            order_id: id,
            broker_order_id: None,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            order_type: order.order_type,
            timestamp: now,
        });
        order
    }

    pub fn set_broker_order_id(&mut self, broker_order_id: String) {
        self.broker_order_id = Some(broker_order_id);
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A full fill: `Pending | Pending(partial) -[fill]-> Filled`.
    pub fn fill(
        &mut self,
        fill_qty: Decimal,
        fill_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                let total_filled = self.filled_quantity + fill_qty;
                if total_filled > self.quantity {
                    return Err(OrderError::OverFill {
                        fill_qty: total_filled,
                        order_qty: self.quantity,
                    });
                }
                self.average_fill_price = weighted_average(
                    self.filled_quantity,
                    self.average_fill_price,
                    fill_qty,
                    fill_price,
                );
                self.filled_quantity = total_filled;
                self.status = OrderStatus::Filled;
                self.filled_at = Some(now);
                self.updated_at = now;
                self.pending_events.push(TradingEvent::OrderFilled {
                    order_id: self.id,
                    symbol: self.symbol.clone(),
                    quantity: self.filled_quantity,
                    fill_price: self.average_fill_price,
                    timestamp: now,
                });
                Ok(())
            }
            other => Err(OrderError::InvalidTransition {
                from: other.to_string(),
                event: "fill",
            }),
        }
    }

    /// `Pending | Pending(partial) -[partial-fill]-> Pending(partial)`. A
    /// partial fill never leaves `Pending`; only a full `fill` does.
    pub fn partial_fill(
        &mut self,
        fill_qty: Decimal,
        fill_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                let total_filled = self.filled_quantity + fill_qty;
                if total_filled > self.quantity {
                    return Err(OrderError::OverFill {
                        fill_qty: total_filled,
                        order_qty: self.quantity,
                    });
                }
                self.average_fill_price = weighted_average(
                    self.filled_quantity,
                    self.average_fill_price,
                    fill_qty,
                    fill_price,
                );
                self.filled_quantity = total_filled;
                self.status = OrderStatus::PartiallyFilled;
                self.updated_at = now;
                self.pending_events.push(TradingEvent::OrderPartiallyFilled {
                    order_id: self.id,
                    symbol: self.symbol.clone(),
                    filled_qty: self.filled_quantity,
                    remaining_qty: self.quantity - self.filled_quantity,
                    fill_price,
                    timestamp: now,
                });
                Ok(())
            }
            other => Err(OrderError::InvalidTransition {
                from: other.to_string(),
                event: "partial-fill",
            }),
        }
    }

    /// `Pending | Pending(partial) -[cancel]-> Cancelled`. Idempotent on an
    /// already-`Cancelled` order: no state change, no new event.
    pub fn cancel(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = Some(reason.clone());
                self.cancelled_at = Some(now);
                self.updated_at = now;
                self.pending_events.push(TradingEvent::OrderCancelled {
                    order_id: self.id,
                    reason,
                    timestamp: now,
                });
                Ok(())
            }
            OrderStatus::Cancelled => Ok(()),
            other => Err(OrderError::InvalidTransition {
                from: other.to_string(),
                event: "cancel",
            }),
        }
    }

    /// `Cancelled -[broker-confirm-cancel]-> CancelledConfirmed`.
    pub fn confirm_cancellation(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Cancelled => {
                self.status = OrderStatus::CancelledConfirmed;
                self.broker_confirmed_at = Some(now);
                self.updated_at = now;
                self.pending_events.push(TradingEvent::OrderFullyCancelled {
                    order_id: self.id,
                    timestamp: now,
                });
                Ok(())
            }
            other => Err(OrderError::InvalidTransition {
                from: other.to_string(),
                event: "broker-confirm-cancel",
            }),
        }
    }

    /// `Pending -[reject]-> Rejected`.
    pub fn reject(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending => {
                self.status = OrderStatus::Rejected;
                self.cancellation_reason = Some(reason.clone());
                self.updated_at = now;
                self.pending_events.push(TradingEvent::OrderRejected {
                    order_id: self.id,
                    reason,
                    timestamp: now,
                });
                Ok(())
            }
            other => Err(OrderError::InvalidTransition {
                from: other.to_string(),
                event: "reject",
            }),
        }
    }

    /// Drains and returns events accumulated since the last pull.
    pub fn pull_events(&mut self) -> Vec<TradingEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Remaining quantity the order requests beyond what has filled.
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }
}

fn weighted_average(
    prior_qty: Decimal,
    prior_avg: Decimal,
    new_qty: Decimal,
    new_price: Decimal,
) -> Decimal {
    let total = prior_qty + new_qty;
    if total.is_zero() {
        return new_price;
    }
    (prior_qty * prior_avg + new_qty * new_price) / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            "BTCUSDT".into(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1.0),
            Some(dec!(50000)),
            None,
            TimeInForce::Gtc,
            false,
            5,
            Utc::now(),
        )
    }

    #[test]
    fn new_order_is_pending_and_emits_order_placed() {
        let mut order = new_order();
        let events = order.pull_events();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TradingEvent::OrderPlaced { .. }));
    }

    #[test]
    fn full_fill_transitions_to_filled() {
        let mut order = new_order();
        order.pull_events();
        order.fill(dec!(1.0), dec!(50010), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(1.0));
        let events = order.pull_events();
        assert!(matches!(events[0], TradingEvent::OrderFilled { .. }));
    }

    #[test]
    fn partial_fill_stays_pending_partial() {
        let mut order = new_order();
        order.pull_events();
        order.partial_fill(dec!(0.4), dec!(50010), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_quantity(), dec!(0.6));
    }

    #[test]
    fn partial_then_full_fill_produces_filled() {
        let mut order = new_order();
        order.pull_events();
        order.partial_fill(dec!(0.4), dec!(50000), Utc::now()).unwrap();
        order.fill(dec!(0.6), dec!(50020), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(1.0));
    }

    #[test]
    fn cancel_on_cancelled_is_idempotent_no_new_event() {
        let mut order = new_order();
        order.pull_events();
        order.cancel("user requested".into(), Utc::now()).unwrap();
        order.pull_events();
        order.cancel("user requested again".into(), Utc::now()).unwrap();
        let events = order.pull_events();
        assert!(events.is_empty());
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn fill_on_cancelled_is_an_error() {
        let mut order = new_order();
        order.cancel("x".into(), Utc::now()).unwrap();
        let err = order.fill(dec!(1.0), dec!(50000), Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }

    #[test]
    fn cancel_on_filled_is_an_error() {
        let mut order = new_order();
        order.fill(dec!(1.0), dec!(50000), Utc::now()).unwrap();
        let err = order.cancel("x".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }

    #[test]
    fn confirm_cancellation_requires_prior_cancel() {
        let mut order = new_order();
        let err = order.confirm_cancellation(Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));

        order.cancel("x".into(), Utc::now()).unwrap();
        order.confirm_cancellation(Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::CancelledConfirmed);
        assert!(order.is_terminal());
    }

    #[test]
    fn overfill_is_rejected() {
        let mut order = new_order();
        let err = order.fill(dec!(2.0), dec!(50000), Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::OverFill { .. }));
    }
}
