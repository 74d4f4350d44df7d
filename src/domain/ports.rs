//! Broker Port: the abstract contract the core uses to talk to any futures
//! exchange. One concrete driver implements it
//! ([`crate::infrastructure::binance::BinanceFuturesDriver`]); a second,
//! in-memory implementation backs tests
//! ([`crate::infrastructure::mock::MockBrokerPort`]).

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};

use crate::domain::errors::BrokerError;
use crate::domain::order::Order;
use crate::domain::position::Position;
use crate::domain::types::{Symbol, SymbolInfo};

#[derive(Debug, Clone)]
pub struct MarketTick {
    pub symbol: Symbol,
    pub price: Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

#[derive(Debug, Clone)]
pub struct AccountBalance {
    pub available: Decimal,
    pub total: Decimal,
    pub currency: String,
}

/// Broker-reported order status, already translated to the core's Order
/// state vocabulary by the driver (`NEW -> Pending`, `PARTIALLY_FILLED ->
/// PartiallyFilled`, `FILLED -> Filled`, `CANCELED/EXPIRED -> Cancelled`,
/// `REJECTED -> Rejected`).
#[derive(Debug, Clone)]
pub struct BrokerOrderStatus {
    pub broker_order_id: String,
    pub status: crate::domain::order::OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Decimal,
}

/// A broker-initiated order update, delivered asynchronously over the
/// user-data stream and translated into the core's vocabulary by the
/// driver before it reaches the orchestrator.
#[derive(Debug, Clone)]
pub struct BrokerOrderUpdate {
    pub broker_order_id: String,
    pub status: crate::domain::order::OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Submits `order` and returns the broker-assigned order id.
    async fn submit(&self, order: &Order) -> Result<String, BrokerError>;

    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError>;

    /// A driver may implement `modify` as cancel+resubmit; callers must be
    /// prepared for `broker_order_id` to become invalid in that case.
    async fn modify(
        &self,
        broker_order_id: &str,
        new_qty: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> Result<String, BrokerError>;

    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrderStatus, BrokerError>;

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, BrokerError>;

    async fn close_position(&self, symbol: &Symbol) -> Result<String, BrokerError>;

    async fn get_market_data(&self, symbol: &Symbol) -> Result<MarketSnapshot, BrokerError>;

    async fn get_account_balance(&self) -> Result<AccountBalance, BrokerError>;

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo, BrokerError>;

    async fn subscribe_market_data(
        &self,
        symbols: Vec<Symbol>,
        tx: mpsc::Sender<MarketTick>,
    ) -> Result<(), BrokerError>;

    async fn subscribe_order_updates(&self) -> Result<broadcast::Receiver<BrokerOrderUpdate>, BrokerError>;
}
