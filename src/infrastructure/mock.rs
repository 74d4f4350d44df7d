//! `MockBrokerPort`: an in-memory Broker Port test double, grounded on the
//! teacher's `infrastructure/mock.rs` (subscriber list + price cache
//! pattern).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::domain::errors::{BrokerError, BrokerErrorKind};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{
    AccountBalance, BrokerOrderStatus, BrokerOrderUpdate, BrokerPort, MarketSnapshot, MarketTick,
};
use crate::domain::position::Position;
use crate::domain::types::{Symbol, SymbolInfo};

struct OpenOrder {
    order: Order,
}

pub struct MockBrokerPort {
    next_id: AtomicI64,
    open_orders: RwLock<HashMap<String, OpenOrder>>,
    positions: RwLock<HashMap<Symbol, Position>>,
    prices: RwLock<HashMap<Symbol, Decimal>>,
    balance: RwLock<AccountBalance>,
    order_update_tx: broadcast::Sender<BrokerOrderUpdate>,
    /// When true, every call returns a transient `BrokerError`, for testing
    /// retry/circuit-breaker behavior upstream.
    pub fail_all: std::sync::atomic::AtomicBool,
}

impl MockBrokerPort {
    pub fn new(initial_cash: Decimal) -> Self {
        let (order_update_tx, _rx) = broadcast::channel(256);
        Self {
            next_id: AtomicI64::new(1),
            open_orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            balance: RwLock::new(AccountBalance {
                available: initial_cash,
                total: initial_cash,
                currency: "USDT".to_string(),
            }),
            order_update_tx,
            fail_all: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn set_price(&self, symbol: Symbol, price: Decimal) {
        self.prices.write().await.insert(symbol, price);
    }

    /// Simulates a broker user-data update for a previously submitted
    /// order, e.g. an asynchronous `CANCELED` confirmation: broadcasts the
    /// update and applies it to the polled order state so the next
    /// `get_order_status` reflects it, matching a real exchange where the
    /// user-data stream and the REST order state move together.
    pub async fn push_order_update(&self, update: BrokerOrderUpdate) {
        if let Some(open) = self.open_orders.write().await.get_mut(&update.broker_order_id) {
            open.order.status = update.status;
            open.order.filled_quantity = update.filled_quantity;
            open.order.average_fill_price = update.average_fill_price;
        }
        let _ = self.order_update_tx.send(update);
    }

    /// Snapshot of every order currently held open by the mock, for test
    /// assertions against what was actually submitted.
    pub async fn open_orders_snapshot(&self) -> Vec<Order> {
        self.open_orders.read().await.values().map(|o| o.order.clone()).collect()
    }

    /// The broker-assigned id for a previously submitted order, looked up by
    /// its domain-side `Order::id`, for tests that need to address a
    /// specific order through the `BrokerPort` surface (e.g. to simulate a
    /// user-data update for it).
    pub async fn broker_order_id_for(&self, order_id: uuid::Uuid) -> Option<String> {
        self.open_orders
            .read()
            .await
            .iter()
            .find(|(_, open)| open.order.id == order_id)
            .map(|(broker_id, _)| broker_id.clone())
    }

    fn guard(&self) -> Result<(), BrokerError> {
        if self.fail_all.load(Ordering::SeqCst) {
            Err(BrokerError::transient("mock broker configured to fail"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerPort for MockBrokerPort {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.guard()
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn submit(&self, order: &Order) -> Result<String, BrokerError> {
        self.guard()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.open_orders.write().await.insert(
            id.clone(),
            OpenOrder {
                order: order.clone(),
            },
        );
        Ok(id)
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        self.guard()?;
        Ok(self.open_orders.write().await.remove(broker_order_id).is_some())
    }

    async fn modify(
        &self,
        broker_order_id: &str,
        new_qty: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> Result<String, BrokerError> {
        self.guard()?;
        let mut prior = self
            .open_orders
            .write()
            .await
            .remove(broker_order_id)
            .ok_or_else(|| BrokerError::permanent(BrokerErrorKind::OrderNotFound, broker_order_id))?;
        if let Some(qty) = new_qty {
            prior.order.quantity = qty;
        }
        if let Some(price) = new_price {
            prior.order.limit_price = Some(price);
        }
        let new_id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.open_orders.write().await.insert(new_id.clone(), prior);
        Ok(new_id)
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrderStatus, BrokerError> {
        self.guard()?;
        let orders = self.open_orders.read().await;
        match orders.get(broker_order_id) {
            Some(open) => Ok(BrokerOrderStatus {
                broker_order_id: broker_order_id.to_string(),
                status: open.order.status,
                filled_quantity: open.order.filled_quantity,
                average_fill_price: open.order.average_fill_price,
            }),
            None => Err(BrokerError::permanent(BrokerErrorKind::OrderNotFound, broker_order_id)),
        }
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.guard()?;
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, BrokerError> {
        self.guard()?;
        Ok(self.positions.read().await.get(symbol).cloned())
    }

    async fn close_position(&self, symbol: &Symbol) -> Result<String, BrokerError> {
        self.guard()?;
        self.positions.write().await.remove(symbol);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        Ok(id)
    }

    async fn get_market_data(&self, symbol: &Symbol) -> Result<MarketSnapshot, BrokerError> {
        self.guard()?;
        let price = self.prices.read().await.get(symbol).copied().unwrap_or(dec!(0));
        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            bid: price,
            ask: price,
            last: price,
        })
    }

    async fn get_account_balance(&self) -> Result<AccountBalance, BrokerError> {
        self.guard()?;
        Ok(self.balance.read().await.clone())
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo, BrokerError> {
        self.guard()?;
        Ok(SymbolInfo {
            symbol: symbol.clone(),
            step_size: dec!(0.001),
            tick_size: dec!(0.1),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        })
    }

    async fn subscribe_market_data(
        &self,
        _symbols: Vec<Symbol>,
        _tx: mpsc::Sender<MarketTick>,
    ) -> Result<(), BrokerError> {
        self.guard()
    }

    async fn subscribe_order_updates(&self) -> Result<broadcast::Receiver<BrokerOrderUpdate>, BrokerError> {
        self.guard()?;
        Ok(self.order_update_tx.subscribe())
    }
}

pub fn shared(initial_cash: Decimal) -> Arc<MockBrokerPort> {
    Arc::new(MockBrokerPort::new(initial_cash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{OrderSide, OrderType, TimeInForce};
    use uuid::Uuid;

    fn sample_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            "BTCUSDT".into(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(0.01),
            Some(dec!(50000)),
            None,
            TimeInForce::Gtc,
            false,
            1,
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn submit_then_cancel_round_trips() {
        let broker = MockBrokerPort::new(dec!(10000));
        let order = sample_order();
        let id = broker.submit(&order).await.unwrap();
        assert!(broker.cancel(&id).await.unwrap());
        let err = broker.get_order_status(&id).await.unwrap_err();
        assert_eq!(err.kind, BrokerErrorKind::OrderNotFound);
    }

    #[tokio::test]
    async fn fail_all_makes_every_call_transient_error() {
        let broker = MockBrokerPort::new(dec!(10000));
        broker.fail_all.store(true, Ordering::SeqCst);
        let err = broker.submit(&sample_order()).await.unwrap_err();
        assert!(err.retryable);
    }
}
