//! Background reconciliation loops that keep local order/position state
//! consistent with the broker (§5): position reconciliation (~5s) and order
//! reconciliation (~2s). Each is an independently cancellable task racing
//! its interval tick against a cooperative shutdown signal, following the
//! teacher's `RiskManager::run` `tokio::select!` loop shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::event_bus::EventBus;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{BrokerOrderStatus, BrokerOrderUpdate, BrokerPort};
use crate::domain::portfolio::Portfolio;
use crate::domain::position::Position;
use crate::domain::types::Symbol;

pub type ActiveOrders = Arc<RwLock<HashMap<Uuid, Order>>>;
pub type PositionCache = Arc<RwLock<HashMap<Symbol, Position>>>;

/// Upserts local positions from the broker and evicts closed symbols.
/// Idempotent: running it twice with no new broker events yields the same
/// local state.
pub async fn run_position_reconciliation(
    broker: Arc<dyn BrokerPort>,
    positions: PositionCache,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match broker.get_positions().await {
                    Ok(broker_positions) => {
                        let mut cache = positions.write().await;
                        let broker_symbols: std::collections::HashSet<_> =
                            broker_positions.iter().map(|p| p.symbol.clone()).collect();
                        cache.retain(|symbol, _| broker_symbols.contains(symbol));
                        for position in broker_positions {
                            cache.insert(position.symbol.clone(), position);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "position reconciliation fetch failed, will retry next tick");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// For every local active order whose broker state differs from the
/// orchestrator's cached state, applies `fill`/`partial_fill`/`cancel`/
/// `confirm_cancellation` to the local [`Order`] and publishes the
/// resulting events.
pub async fn run_order_reconciliation(
    broker: Arc<dyn BrokerPort>,
    active_orders: ActiveOrders,
    portfolio: Arc<Mutex<Portfolio>>,
    event_bus: EventBus,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reconcile_orders_once(&broker, &active_orders, &portfolio, &event_bus).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

pub async fn reconcile_orders_once(
    broker: &Arc<dyn BrokerPort>,
    active_orders: &ActiveOrders,
    portfolio: &Arc<Mutex<Portfolio>>,
    event_bus: &EventBus,
) {
    let order_ids: Vec<Uuid> = {
        let orders = active_orders.read().await;
        orders
            .values()
            .filter(|o| !o.is_terminal() && o.broker_order_id.is_some())
            .map(|o| o.id)
            .collect()
    };

    for order_id in order_ids {
        let broker_order_id = {
            let orders = active_orders.read().await;
            match orders.get(&order_id).and_then(|o| o.broker_order_id.clone()) {
                Some(id) => id,
                None => continue,
            }
        };

        let remote = match broker.get_order_status(&broker_order_id).await {
            Ok(status) => status,
            Err(err) => {
                error!(error = %err, %order_id, "order reconciliation status query failed");
                continue;
            }
        };

        apply_reconciled_status(order_id, &remote, chrono::Utc::now(), active_orders, portfolio, event_bus).await;
    }
}

/// Applies one broker-reported order status to the matching local [`Order`]
/// and its portfolio reservation, publishing whatever events the transition
/// produces. Shared by the polling reconciliation loop
/// ([`reconcile_orders_once`]) and the push-based user-data stream
/// ([`apply_broker_order_update`]) so both paths update state identically.
async fn apply_reconciled_status(
    order_id: Uuid,
    remote: &BrokerOrderStatus,
    now: chrono::DateTime<chrono::Utc>,
    active_orders: &ActiveOrders,
    portfolio: &Arc<Mutex<Portfolio>>,
    event_bus: &EventBus,
) {
    let (events, fill_delta, newly_cancelled) = {
        let mut orders = active_orders.write().await;
        let Some(order) = orders.get_mut(&order_id) else {
            return;
        };
        let prior_filled = order.filled_quantity;
        let prior_status = order.status;
        let (symbol, side, total_qty) = (order.symbol.clone(), order.side, order.quantity);
        let events = apply_remote_status(order, remote, now);
        let delta = order.filled_quantity - prior_filled;
        let fill_delta = if delta > rust_decimal::Decimal::ZERO {
            Some((symbol, side, delta, order.average_fill_price, total_qty))
        } else {
            None
        };
        let newly_cancelled = matches!(prior_status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
            && order.status == OrderStatus::Cancelled;
        (events, fill_delta, newly_cancelled)
    };

    if events.is_empty() {
        return;
    }

    {
        let mut guard = portfolio.lock().await;
        if let Some((symbol, side, delta, fill_price, total_qty)) = fill_delta {
            if let Err(err) = guard.complete_fill(order_id, &symbol, side, delta, fill_price, total_qty) {
                warn!(error = %err, %order_id, "failed to apply reconciled fill to portfolio");
            }
        }
        if newly_cancelled {
            if let Err(err) = guard.release_remaining(order_id) {
                warn!(error = %err, %order_id, "failed to release reservation on reconciled cancel");
            }
        }
    }

    for event in events {
        event_bus.publish(event).await;
    }
}

/// Applies one broker-initiated order update delivered over the user-data
/// stream (§2's broker-push path), looking up the local order by its
/// broker-assigned id.
pub async fn apply_broker_order_update(
    active_orders: &ActiveOrders,
    portfolio: &Arc<Mutex<Portfolio>>,
    event_bus: &EventBus,
    update: &BrokerOrderUpdate,
) {
    let order_id = {
        let orders = active_orders.read().await;
        orders
            .values()
            .find(|o| o.broker_order_id.as_deref() == Some(update.broker_order_id.as_str()))
            .map(|o| o.id)
    };
    let Some(order_id) = order_id else {
        warn!(broker_order_id = %update.broker_order_id, "order update for an order not tracked locally");
        return;
    };

    let remote = BrokerOrderStatus {
        broker_order_id: update.broker_order_id.clone(),
        status: update.status,
        filled_quantity: update.filled_quantity,
        average_fill_price: update.average_fill_price,
    };
    apply_reconciled_status(order_id, &remote, update.timestamp, active_orders, portfolio, event_bus).await;
}

fn apply_remote_status(
    order: &mut Order,
    remote: &crate::domain::ports::BrokerOrderStatus,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<crate::domain::events::TradingEvent> {
    match (order.status, remote.status) {
        (OrderStatus::Pending | OrderStatus::PartiallyFilled, OrderStatus::Filled) => {
            let remaining = order.quantity - order.filled_quantity;
            let _ = order.fill(remaining, remote.average_fill_price, now);
        }
        (OrderStatus::Pending, OrderStatus::PartiallyFilled) => {
            let delta = remote.filled_quantity - order.filled_quantity;
            if delta > rust_decimal::Decimal::ZERO {
                let _ = order.partial_fill(delta, remote.average_fill_price, now);
            }
        }
        (OrderStatus::Pending | OrderStatus::PartiallyFilled, OrderStatus::Cancelled) => {
            let _ = order.cancel("broker reported cancelled".to_string(), now);
        }
        (OrderStatus::Cancelled, OrderStatus::Cancelled) => {
            let _ = order.confirm_cancellation(now);
        }
        (OrderStatus::Pending, OrderStatus::Rejected) => {
            let _ = order.reject("broker rejected order".to_string(), now);
        }
        _ => {}
    }
    order.pull_events()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus as OS;
    use crate::domain::ports::BrokerOrderStatus;
    use crate::domain::types::{OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn new_pending_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            "BTCUSDT".into(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            None,
            TimeInForce::Gtc,
            false,
            1,
            chrono::Utc::now(),
        )
    }

    #[test]
    fn broker_filled_transitions_local_order_to_filled() {
        let mut order = new_pending_order();
        order.pull_events();
        let remote = BrokerOrderStatus {
            broker_order_id: "1".into(),
            status: OS::Filled,
            filled_quantity: dec!(1),
            average_fill_price: dec!(50010),
        };
        let events = apply_remote_status(&mut order, &remote, chrono::Utc::now());
        assert_eq!(order.status, OS::Filled);
        assert!(matches!(events[0], crate::domain::events::TradingEvent::OrderFilled { .. }));
    }

    #[test]
    fn broker_cancelled_twice_eventually_confirms() {
        let mut order = new_pending_order();
        order.pull_events();
        let remote = BrokerOrderStatus {
            broker_order_id: "1".into(),
            status: OS::Cancelled,
            filled_quantity: dec!(0),
            average_fill_price: dec!(0),
        };
        let events1 = apply_remote_status(&mut order, &remote, chrono::Utc::now());
        assert_eq!(order.status, OS::Cancelled);
        assert!(matches!(events1[0], crate::domain::events::TradingEvent::OrderCancelled { .. }));

        let events2 = apply_remote_status(&mut order, &remote, chrono::Utc::now());
        assert_eq!(order.status, OS::CancelledConfirmed);
        assert_eq!(events2.len(), 1);
        assert!(matches!(
            events2[0],
            crate::domain::events::TradingEvent::OrderFullyCancelled { .. }
        ));
    }
}
