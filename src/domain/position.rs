//! Position: a read-through projection whose authoritative source is the
//! broker. The core's cache is refreshed by the reconciliation loop and
//! never computed locally beyond mark-to-market PnL.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::{PositionSide, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub portfolio_id: Uuid,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub realized_pnl: Decimal,
    pub leverage: u32,
    /// Populated from the broker driver's position response; the core does
    /// not compute liquidation price itself (exchange-authoritative).
    pub liquidation_price: Option<Decimal>,
    pub margin_used: Decimal,
    pub open: bool,
}

impl Position {
    pub fn unrealized_pnl(&self) -> Decimal {
        let direction = match self.side {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => -Decimal::ONE,
        };
        direction * self.quantity * (self.mark_price - self.entry_price)
    }

    /// Fraction of the way toward liquidation, in `[0, 1]`, or `None` if the
    /// broker has not reported a liquidation price for this position.
    pub fn liquidation_proximity(&self) -> Option<Decimal> {
        let liq = self.liquidation_price?;
        if self.entry_price.is_zero() {
            return None;
        }
        let distance_total = (self.entry_price - liq).abs();
        if distance_total.is_zero() {
            return Some(dec!(1));
        }
        let distance_now = (self.mark_price - liq).abs();
        Some((Decimal::ONE - (distance_now / distance_total)).clamp(dec!(0), dec!(1)))
    }
}
