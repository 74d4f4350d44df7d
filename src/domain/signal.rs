//! Signals produced by strategies and consumed by the core. Modelled as a
//! closed tagged record rather than a heterogeneous duck-typed payload.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    StrongBuy,
    Buy,
    Sell,
    StrongSell,
    CloseLong,
    CloseShort,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: Symbol,
    pub signal_type: SignalType,
    /// ∈ [0, 1]
    pub strength: f64,
    /// ∈ [0, 1]
    pub confidence: f64,
    /// Free-form parameters, including the current price under `"price"`.
    pub parameters: HashMap<String, Decimal>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Signal {
    pub fn current_price(&self) -> Option<Decimal> {
        self.parameters.get("price").copied()
    }
}
