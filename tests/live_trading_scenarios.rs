//! End-to-end scenarios against [`trading_core::application::session_service::LiveTradingService`],
//! wired the way the teacher's `tests/e2e_trading_flow.rs` wires a trading
//! application: a concrete mock broker constructed locally (kept alongside
//! the service so tests can assert on what it actually received), the
//! service built by explicit dependency injection, no global state.

use std::sync::Arc;

use rust_decimal_macros::dec;
use uuid::Uuid;

use trading_core::application::event_bus::EventBus;
use trading_core::application::recovery::{RecoveryConfig, RecoveryService};
use trading_core::application::risk_validator::RiskConfig;
use trading_core::application::risk_validator::RiskValidator;
use trading_core::application::session_service::{
    LiveTradingService, LiveTradingServiceConfig, OrderRequest,
};
use trading_core::application::signal_adapter::{AdapterConfig, SignalAdapter};
use trading_core::application::sizing::{PositionSizer, SizingConfig};
use trading_core::domain::events::TradingEvent;
use trading_core::domain::order::OrderStatus;
use trading_core::domain::ports::{BrokerOrderUpdate, BrokerPort};
use trading_core::domain::portfolio::Portfolio;
use trading_core::domain::risk::{RiskLevel, RiskSummary};
use trading_core::domain::session::{SessionStatus, TradingSession};
use trading_core::domain::snapshot::{Snapshot, SnapshotMetadata};
use trading_core::domain::types::{OrderSide, OrderType, TimeInForce};
use trading_core::infrastructure::mock::MockBrokerPort;
use trading_core::infrastructure::persistence::FileSnapshotRepository;
use trading_core::CoreError;

fn state_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("live-trading-scenario-{}", Uuid::new_v4()))
}

struct Harness {
    service: Arc<LiveTradingService>,
    broker: Arc<MockBrokerPort>,
    events: EventBus,
}

async fn build_harness(risk: RiskConfig) -> Harness {
    let broker = Arc::new(MockBrokerPort::new(dec!(100_000)));
    broker.set_price("BTCUSDT".to_string(), dec!(50_000)).await;
    let broker_port: Arc<dyn BrokerPort> = broker.clone();

    let portfolio = Portfolio::new(Uuid::new_v4(), "main", "USDT", dec!(100_000));
    let repo = Arc::new(FileSnapshotRepository::new(state_dir()));
    let recovery = Arc::new(RecoveryService::new(repo, RecoveryConfig::default()));
    let risk_validator = RiskValidator::new(risk);
    let signal_adapter = SignalAdapter::new(AdapterConfig::default(), PositionSizer::new(SizingConfig::default()));

    // `EventBus` shares its state across clones, so the copy kept here
    // observes everything published through the one handed to the service.
    let events = EventBus::default();

    let service = LiveTradingService::new(
        broker_port,
        portfolio,
        events.clone(),
        risk_validator,
        signal_adapter,
        recovery,
        LiveTradingServiceConfig::default(),
    );

    Harness { service, broker, events }
}

fn limit_buy_request(quantity: rust_decimal::Decimal, leverage: u32) -> OrderRequest {
    OrderRequest {
        symbol: "BTCUSDT".to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        quantity,
        limit_price: Some(dec!(50_000)),
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        reduce_only: false,
        leverage,
    }
}

#[tokio::test]
async fn happy_path_limit_order_reaches_the_broker_and_reserves_funds() {
    let harness = build_harness(RiskConfig::default()).await;
    harness.service.start().await.unwrap();

    let order_id = harness
        .service
        .place_order(limit_buy_request(dec!(0.01), 5))
        .await
        .unwrap();

    let state = harness.service.get_portfolio_state().await;
    assert!(state.available < dec!(100_000), "reservation should debit available cash");

    let broker_orders = harness.broker.open_orders_snapshot().await;
    assert_eq!(broker_orders.len(), 1);
    assert_eq!(broker_orders[0].id, order_id);
    assert_eq!(broker_orders[0].symbol, "BTCUSDT");

    let events = harness.events.recent_events().await;
    assert!(events.iter().any(|e| matches!(e, TradingEvent::OrderPlaced { .. })));

    harness.service.stop("scenario complete".to_string()).await.unwrap();
}

#[tokio::test]
async fn oversize_order_is_blocked_before_it_reaches_the_broker() {
    let mut risk = RiskConfig::default();
    risk.max_position_size_usdt = dec!(1_000);
    let harness = build_harness(risk).await;
    harness.service.start().await.unwrap();

    let err = harness
        .service
        .place_order(limit_buy_request(dec!(1), 5)) // 1 BTC @ 50k = 50k notional, way over the 1k cap
        .await
        .unwrap_err();

    match err {
        CoreError::RiskBlocked { reason } => {
            assert!(reason.to_lowercase().contains("exceeds maximum"));
        }
        other => panic!("expected RiskBlocked, got {other:?}"),
    }

    assert!(harness.broker.open_orders_snapshot().await.is_empty());
    harness.service.stop("scenario complete".to_string()).await.unwrap();
}

#[tokio::test]
async fn leverage_above_ceiling_is_capped_rather_than_rejected() {
    let harness = build_harness(RiskConfig::default()).await; // default ceiling is 10x
    harness.service.start().await.unwrap();

    harness
        .service
        .place_order(limit_buy_request(dec!(0.01), 25))
        .await
        .unwrap();

    let broker_orders = harness.broker.open_orders_snapshot().await;
    assert_eq!(broker_orders.len(), 1);
    assert_eq!(broker_orders[0].leverage, 10, "leverage should be capped at the configured ceiling");

    harness.service.stop("scenario complete".to_string()).await.unwrap();
}

#[tokio::test]
async fn emergency_stop_locks_the_session_and_cancels_active_orders() {
    let harness = build_harness(RiskConfig::default()).await;
    harness.service.start().await.unwrap();

    harness
        .service
        .place_order(limit_buy_request(dec!(0.01), 5))
        .await
        .unwrap();
    assert_eq!(harness.broker.open_orders_snapshot().await.len(), 1);

    harness
        .service
        .emergency_stop("risk monitor breach".to_string(), false)
        .await
        .unwrap();

    assert_eq!(harness.service.get_session_status().await, SessionStatus::Locked);
    assert!(
        harness.broker.open_orders_snapshot().await.is_empty(),
        "the order should have been cancelled at the broker"
    );

    let err = harness
        .service
        .place_order(limit_buy_request(dec!(0.01), 5))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    harness.service.unlock().await.unwrap();
    assert_eq!(harness.service.get_session_status().await, SessionStatus::Stopped);
}

#[tokio::test]
async fn asynchronous_broker_cancellation_is_picked_up_on_reconciliation() {
    let harness = build_harness(RiskConfig::default()).await;
    harness.service.start().await.unwrap();

    let order_id = harness
        .service
        .place_order(limit_buy_request(dec!(0.01), 5))
        .await
        .unwrap();

    let broker_order_id = harness
        .broker
        .broker_order_id_for(order_id)
        .await
        .expect("order should be known to the broker");

    harness
        .broker
        .push_order_update(BrokerOrderUpdate {
            broker_order_id,
            status: OrderStatus::Cancelled,
            filled_quantity: dec!(0),
            average_fill_price: dec!(0),
            timestamp: chrono::Utc::now(),
        })
        .await;

    // Reconciliation runs on its own interval in the background; trigger an
    // immediate pass instead of waiting on the clock.
    harness.service.reconcile_now().await;

    let events = harness.events.recent_events().await;
    assert!(
        events.iter().any(|e| matches!(e, TradingEvent::OrderCancelled { order_id: id, .. } if *id == order_id)),
        "reconciliation should have published OrderCancelled for the remotely cancelled order"
    );

    harness.service.stop("scenario complete".to_string()).await.unwrap();
}

#[tokio::test]
async fn a_running_session_is_restored_from_its_last_snapshot_on_start() {
    let dir = state_dir();
    let portfolio_id = Uuid::new_v4();

    let mut session = TradingSession::new(portfolio_id);
    session.transition_to(SessionStatus::Starting).unwrap();
    session.transition_to(SessionStatus::Running).unwrap();
    let session_id = session.id;

    let snapshot = Snapshot {
        timestamp: chrono::Utc::now(),
        session,
        active_orders: vec![],
        active_positions: vec![],
        monitored_symbols: Default::default(),
        portfolio_id,
        risk_metrics: RiskSummary {
            exposure_percent: Default::default(),
            daily_loss_percent: Default::default(),
            drawdown_percent: Default::default(),
            risk_level: RiskLevel::Low,
            active_thresholds: vec![],
        },
        metadata: SnapshotMetadata::default(),
    };

    let repo = Arc::new(FileSnapshotRepository::new(dir.clone()));
    let recovery_writer = RecoveryService::new(repo, RecoveryConfig::default());
    recovery_writer.save(&snapshot).await.unwrap();

    let broker = Arc::new(MockBrokerPort::new(dec!(100_000)));
    let broker_port: Arc<dyn BrokerPort> = broker.clone();
    let portfolio = Portfolio::new(portfolio_id, "main", "USDT", dec!(100_000));
    let repo2 = Arc::new(FileSnapshotRepository::new(dir));
    let recovery = Arc::new(RecoveryService::new(repo2, RecoveryConfig::default()));
    let risk_validator = RiskValidator::new(RiskConfig::default());
    let signal_adapter = SignalAdapter::new(AdapterConfig::default(), PositionSizer::new(SizingConfig::default()));
    let events = EventBus::default();

    let service = LiveTradingService::new(
        broker_port,
        portfolio,
        events.clone(),
        risk_validator,
        signal_adapter,
        recovery,
        LiveTradingServiceConfig::default(),
    );

    service.start().await.unwrap();

    assert_eq!(service.get_session_status().await, SessionStatus::Running);
    let restored_events = events.recent_events().await;
    assert!(restored_events.iter().any(|e| matches!(
        e,
        TradingEvent::SessionStarted { session_id: id, .. } if *id == session_id
    )));

    service.stop("scenario complete".to_string()).await.unwrap();
}
