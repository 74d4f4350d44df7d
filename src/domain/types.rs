//! Primitive vocabulary shared across the domain: symbols, sides, order
//! types, and the exchange precision rules used to round quantities and
//! prices before they ever reach a [`crate::domain::ports::BrokerPort`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uppercase ticker, opaque to the core beyond its string value.
pub type Symbol = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
    TakeProfitMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Exchange-declared precision and sizing limits for one symbol. Cached by
/// the broker driver and consulted before every submit to round and
/// validate locally, instead of letting the exchange reject the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

/// Rounds `value` down to the nearest multiple of `step` (toward zero),
/// matching the spec's "rounding toward zero at the symbol's declared
/// precision" rule.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).trunc() * step
}

/// Rounds a price to the nearest tick on the aggressive side of `side`:
/// buys round down (never overpay past the grid), sells round up (never
/// undersell past the grid) — "rounded, never truncated past the
/// aggressive side."
pub fn round_price_to_tick(price: Decimal, tick: Decimal, side: OrderSide) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    let steps = price / tick;
    let rounded = match side {
        OrderSide::Buy => steps.floor(),
        OrderSide::Sell => steps.ceil(),
    };
    rounded * tick
}

impl SymbolInfo {
    pub fn round_quantity(&self, qty: Decimal) -> Decimal {
        round_to_step(qty, self.step_size)
    }

    pub fn round_price(&self, price: Decimal, side: OrderSide) -> Decimal {
        round_price_to_tick(price, self.tick_size, side)
    }

    /// True if `qty` at `price` clears both the min-qty and min-notional
    /// floors declared for this symbol.
    pub fn meets_minimums(&self, qty: Decimal, price: Decimal) -> bool {
        qty >= self.min_qty && (qty * price) >= self.min_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_quantity_down_to_step() {
        assert_eq!(round_to_step(dec!(0.12345), dec!(0.001)), dec!(0.123));
        assert_eq!(round_to_step(dec!(1.0), dec!(0.001)), dec!(1.000));
    }

    #[test]
    fn rounds_buy_price_down_and_sell_price_up() {
        assert_eq!(
            round_price_to_tick(dec!(50000.37), dec!(0.1), OrderSide::Buy),
            dec!(50000.3)
        );
        assert_eq!(
            round_price_to_tick(dec!(50000.31), dec!(0.1), OrderSide::Sell),
            dec!(50000.4)
        );
    }

    #[test]
    fn symbol_info_minimums() {
        let info = SymbolInfo {
            symbol: "BTCUSDT".into(),
            step_size: dec!(0.001),
            tick_size: dec!(0.1),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        };
        assert!(!info.meets_minimums(dec!(0.0001), dec!(50000)));
        assert!(info.meets_minimums(dec!(0.001), dec!(50000)));
    }
}
