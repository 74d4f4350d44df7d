//! The Portfolio Aggregate: available/reserved cash and positions by
//! symbol. Cash fields are mutated only through these methods so that
//! reserve/release/fill are atomic with respect to balance queries.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::PortfolioError;
use crate::domain::types::{OrderSide, Symbol};

/// Buffer applied to the estimated fill price when reserving cash for a
/// market order, since its actual fill price is not known in advance.
pub const MARKET_ORDER_RESERVE_BUFFER: Decimal = dec!(0.05);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub name: String,
    pub currency: String,
    pub available: Decimal,
    pub reserved: Decimal,
    pub positions: HashMap<Symbol, Decimal>,
    pub initial_margin: Decimal,
    /// Reservation tracked per order id so that partial fills release
    /// proportionally rather than all at once (Open Question 1, resolved).
    reservations: HashMap<Uuid, Decimal>,
}

impl Portfolio {
    pub fn new(id: Uuid, name: impl Into<String>, currency: impl Into<String>, initial_cash: Decimal) -> Self {
        Self {
            id,
            name: name.into(),
            currency: currency.into(),
            available: initial_cash,
            reserved: dec!(0),
            positions: HashMap::new(),
            initial_margin: dec!(0),
            reservations: HashMap::new(),
        }
    }

    /// Moves `amount` from available to reserved, tracked under `order_id`.
    pub fn reserve(&mut self, order_id: Uuid, amount: Decimal) -> Result<(), PortfolioError> {
        if amount > self.available {
            return Err(PortfolioError::InsufficientFunds {
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.reserved += amount;
        *self.reservations.entry(order_id).or_insert(dec!(0)) += amount;
        Ok(())
    }

    /// Releases `amount` of the reservation held for `order_id` back to
    /// available cash (e.g. on cancel, or excess reservation after a fill).
    pub fn release(&mut self, order_id: Uuid, amount: Decimal) -> Result<(), PortfolioError> {
        if amount > self.reserved {
            return Err(PortfolioError::InvalidAmount {
                requested: amount,
                reserved: self.reserved,
            });
        }
        let remaining = self
            .reservations
            .get(&order_id)
            .copied()
            .ok_or(PortfolioError::UnknownReservation { order_id })?;
        if amount > remaining {
            return Err(PortfolioError::InvalidAmount {
                requested: amount,
                reserved: remaining,
            });
        }
        self.reserved -= amount;
        self.available += amount;
        let left = remaining - amount;
        if left.is_zero() {
            self.reservations.remove(&order_id);
        } else {
            self.reservations.insert(order_id, left);
        }
        Ok(())
    }

    /// Estimated reservation for a new order: limit orders reserve
    /// `price * qty`; market orders reserve `price * qty * (1 + buffer)`
    /// against slippage, per the spec's 5% default buffer.
    pub fn required_reservation(qty: Decimal, est_price: Decimal, is_market: bool) -> Decimal {
        if is_market {
            est_price * qty * (Decimal::ONE + MARKET_ORDER_RESERVE_BUFFER)
        } else {
            est_price * qty
        }
    }

    /// Releases the fraction of the order's reservation attributable to
    /// this fill (`fill_qty / order_total_qty`), then debits the actual
    /// fill cost from available cash, and updates the signed position.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_fill(
        &mut self,
        order_id: Uuid,
        symbol: &Symbol,
        side: OrderSide,
        fill_qty: Decimal,
        fill_price: Decimal,
        order_total_qty: Decimal,
    ) -> Result<(), PortfolioError> {
        if let Some(&reserved_for_order) = self.reservations.get(&order_id) {
            let fraction = if order_total_qty.is_zero() {
                Decimal::ONE
            } else {
                fill_qty / order_total_qty
            };
            let proportional_release = (reserved_for_order * fraction).min(reserved_for_order);
            if !proportional_release.is_zero() {
                self.release(order_id, proportional_release)?;
            }
        }

        let cost = fill_qty * fill_price;
        if cost > self.available {
            return Err(PortfolioError::InsufficientFunds {
                requested: cost,
                available: self.available,
            });
        }
        self.available -= cost;

        let signed_delta = match side {
            OrderSide::Buy => fill_qty,
            OrderSide::Sell => -fill_qty,
        };
        *self.positions.entry(symbol.clone()).or_insert(dec!(0)) += signed_delta;
        Ok(())
    }

    /// Releases whatever remains reserved for `order_id`, if anything. Used
    /// when an order leaves the book (cancel, reject) and the exact
    /// remaining reservation isn't known to the caller.
    pub fn release_remaining(&mut self, order_id: Uuid) -> Result<(), PortfolioError> {
        match self.reservations.get(&order_id).copied() {
            Some(remaining) if !remaining.is_zero() => self.release(order_id, remaining),
            _ => Ok(()),
        }
    }

    pub fn position_quantity(&self, symbol: &Symbol) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(dec!(0))
    }

    /// `available + reserved + Σ(position qty × mark price)`.
    pub fn total_equity(&self, mark_prices: &HashMap<Symbol, Decimal>) -> Decimal {
        let positions_value: Decimal = self
            .positions
            .iter()
            .map(|(symbol, qty)| {
                let mark = mark_prices.get(symbol).copied().unwrap_or(dec!(0));
                qty * mark
            })
            .sum();
        self.available + self.reserved + positions_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_portfolio() -> Portfolio {
        Portfolio::new(Uuid::new_v4(), "main", "USDT", dec!(10000))
    }

    #[test]
    fn reserve_moves_available_to_reserved() {
        let mut p = new_portfolio();
        p.reserve(Uuid::new_v4(), dec!(100)).unwrap();
        assert_eq!(p.available, dec!(9900));
        assert_eq!(p.reserved, dec!(100));
    }

    #[test]
    fn reserve_with_insufficient_funds_errors() {
        let mut p = new_portfolio();
        let err = p.reserve(Uuid::new_v4(), dec!(20000)).unwrap_err();
        assert!(matches!(err, PortfolioError::InsufficientFunds { .. }));
    }

    #[test]
    fn release_more_than_reserved_errors() {
        let mut p = new_portfolio();
        let order_id = Uuid::new_v4();
        p.reserve(order_id, dec!(100)).unwrap();
        let err = p.release(order_id, dec!(200)).unwrap_err();
        assert!(matches!(err, PortfolioError::InvalidAmount { .. }));
    }

    #[test]
    fn full_fill_releases_reservation_and_debits_actual_cost() {
        let mut p = new_portfolio();
        let order_id = Uuid::new_v4();
        p.reserve(order_id, dec!(50000)).unwrap(); // reserved at estimated price
        p.complete_fill(order_id, &"BTCUSDT".to_string(), OrderSide::Buy, dec!(1), dec!(49500), dec!(1))
            .unwrap();
        // entire reservation released, then actual cost of 49500 debited
        assert_eq!(p.reserved, dec!(0));
        assert_eq!(p.available, dec!(10000) - dec!(49500));
        assert_eq!(p.position_quantity(&"BTCUSDT".to_string()), dec!(1));
    }

    #[test]
    fn partial_fills_release_proportionally() {
        let mut p = new_portfolio();
        let order_id = Uuid::new_v4();
        p.reserve(order_id, dec!(1000)).unwrap();
        // first half filled: release half the reservation
        p.complete_fill(order_id, &"BTCUSDT".to_string(), OrderSide::Buy, dec!(0.5), dec!(900), dec!(1))
            .unwrap();
        assert_eq!(p.reserved, dec!(500));
        // second half filled: release the rest
        p.complete_fill(order_id, &"BTCUSDT".to_string(), OrderSide::Buy, dec!(0.5), dec!(900), dec!(1))
            .unwrap();
        assert_eq!(p.reserved, dec!(0));
        assert_eq!(p.position_quantity(&"BTCUSDT".to_string()), dec!(1));
    }

    #[test]
    fn sell_fill_decreases_signed_position() {
        let mut p = new_portfolio();
        let order_id = Uuid::new_v4();
        p.positions.insert("BTCUSDT".to_string(), dec!(1));
        p.reserve(order_id, dec!(0)).unwrap();
        p.complete_fill(order_id, &"BTCUSDT".to_string(), OrderSide::Sell, dec!(1), dec!(51000), dec!(1))
            .unwrap();
        assert_eq!(p.position_quantity(&"BTCUSDT".to_string()), dec!(0));
    }

    #[test]
    fn total_equity_includes_mark_to_market_positions() {
        let mut p = new_portfolio();
        p.available = dec!(5000);
        p.reserved = dec!(1000);
        p.positions.insert("BTCUSDT".to_string(), dec!(1));
        let mut marks = HashMap::new();
        marks.insert("BTCUSDT".to_string(), dec!(51000));
        assert_eq!(p.total_equity(&marks), dec!(5000) + dec!(1000) + dec!(51000));
    }
}
