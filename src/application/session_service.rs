//! Live Trading Service: the orchestrator. Owns the session, consumes
//! signals, calls the Signal Adapter, calls the Risk Validator, submits via
//! the Broker Port, tracks active orders/positions, runs the background
//! loops, publishes domain events, and implements emergency stop and
//! lock/unlock. Grounded on
//! `original_source/.../live_trading_service.py::LiveTradingService` for the
//! procedure shapes, and the teacher's `RiskManager` for the
//! `Arc<RwLock<_>>`-per-resource + `JoinHandle` loop-lifecycle pattern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::event_bus::EventBus;
use crate::application::monitor::{self, MonitorConfig};
use crate::application::reconciliation::{self, reconcile_orders_once, ActiveOrders, PositionCache};
use crate::application::recovery::RecoveryService;
use crate::application::risk_validator::{OrderProposal, PortfolioSnapshot, RiskValidator};
use crate::application::signal_adapter::{AdaptedSignal, DropReason, SignalAdapter};
use crate::domain::errors::CoreError;
use crate::domain::events::{Severity, TradingEvent};
use crate::domain::order::Order;
use crate::domain::portfolio::Portfolio;
use crate::domain::position::Position;
use crate::domain::risk::RiskSummary;
use crate::domain::session::{SessionStatus, TradingSession};
use crate::domain::signal::Signal;
use crate::domain::snapshot::{Snapshot, SnapshotMetadata};
use crate::domain::types::{OrderSide, OrderType, Symbol, TimeInForce};

#[derive(Debug, Clone)]
pub struct LiveTradingServiceConfig {
    pub auto_execute_signals: bool,
    pub close_positions_on_stop: bool,
    pub position_reconciliation_period: Duration,
    pub order_reconciliation_period: Duration,
    pub monitor_period: Duration,
    pub heartbeat_period: Duration,
    pub monitor: MonitorConfig,
}

impl Default for LiveTradingServiceConfig {
    fn default() -> Self {
        Self {
            auto_execute_signals: true,
            close_positions_on_stop: false,
            position_reconciliation_period: Duration::from_secs(5),
            order_reconciliation_period: Duration::from_secs(2),
            monitor_period: Duration::from_secs(10),
            heartbeat_period: Duration::from_secs(30),
            monitor: MonitorConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub leverage: u32,
}

#[derive(Debug, Clone)]
pub struct PortfolioView {
    pub available: Decimal,
    pub reserved: Decimal,
    pub positions: HashMap<Symbol, Decimal>,
    pub equity: Decimal,
}

pub struct LiveTradingService {
    broker: Arc<dyn crate::domain::ports::BrokerPort>,
    event_bus: EventBus,
    risk_validator: RiskValidator,
    signal_adapter: SignalAdapter,
    recovery: Arc<RecoveryService>,
    config: LiveTradingServiceConfig,

    session: Arc<RwLock<TradingSession>>,
    portfolio: Arc<Mutex<Portfolio>>,
    active_orders: ActiveOrders,
    positions: PositionCache,
    peak_equity: Mutex<Decimal>,
    monitored_symbols: Mutex<std::collections::HashSet<Symbol>>,

    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveTradingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn crate::domain::ports::BrokerPort>,
        portfolio: Portfolio,
        event_bus: EventBus,
        risk_validator: RiskValidator,
        signal_adapter: SignalAdapter,
        recovery: Arc<RecoveryService>,
        config: LiveTradingServiceConfig,
    ) -> Arc<Self> {
        let portfolio_id = portfolio.id;
        Arc::new(Self {
            broker,
            event_bus,
            risk_validator,
            signal_adapter,
            recovery,
            config,
            session: Arc::new(RwLock::new(TradingSession::new(portfolio_id))),
            portfolio: Arc::new(Mutex::new(portfolio)),
            active_orders: Arc::new(RwLock::new(HashMap::new())),
            positions: Arc::new(RwLock::new(HashMap::new())),
            peak_equity: Mutex::new(dec!(0)),
            monitored_symbols: Mutex::new(std::collections::HashSet::new()),
            shutdown_tx: Mutex::new(None),
            loop_handles: Mutex::new(Vec::new()),
        })
    }

    /// Attempts to resume from a previously saved snapshot for this
    /// portfolio. Only a snapshot whose session was `Running` when it was
    /// written is applied — anything else (a clean `Stopped`, a `Locked`
    /// emergency halt) means the prior run ended on purpose, and `start()`
    /// should begin a fresh session rather than resurrect it. Returns
    /// `true` if session/order/position state was restored.
    async fn try_recover(self: &Arc<Self>) -> bool {
        let snapshot = match self.recovery.recover().await {
            Ok(Some(s)) => s,
            Ok(None) => return false,
            Err(err) => {
                warn!(error = %err, "snapshot recovery failed, starting a fresh session");
                return false;
            }
        };
        if snapshot.session.status != SessionStatus::Running {
            return false;
        }
        let portfolio_id = self.portfolio.lock().await.id;
        if snapshot.portfolio_id != portfolio_id {
            warn!(
                snapshot_portfolio_id = %snapshot.portfolio_id,
                current_portfolio_id = %portfolio_id,
                "recovered snapshot belongs to a different portfolio, ignoring"
            );
            return false;
        }
        let session_id = snapshot.session.id;
        *self.session.write().await = snapshot.session;
        *self.active_orders.write().await =
            snapshot.active_orders.into_iter().map(|o| (o.id, o)).collect();
        *self.positions.write().await = snapshot
            .active_positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        *self.monitored_symbols.lock().await = snapshot.monitored_symbols;
        info!(%session_id, "recovered session state from snapshot");
        true
    }

    /// Refuses if another session is `Running` or `Locked`, unless a
    /// recovered snapshot (§4.9) says otherwise; connects the broker; loads
    /// existing positions into the cache; spawns background loops;
    /// transitions `Starting` -> `Running`; publishes
    /// `trading.session.started`. If a valid snapshot for this portfolio is
    /// found with status `Running` (a crash mid-session), the session id,
    /// status, active orders, and positions are restored from it instead of
    /// starting fresh; reconciliation then reconfirms everything against
    /// the broker on its next tick.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let recovered = self.try_recover().await;

        if !recovered {
            {
                let session = self.session.read().await;
                if session.status == SessionStatus::Running || session.status == SessionStatus::Locked {
                    return Err(CoreError::conflict(format!(
                        "cannot start: session is already {}",
                        session.status
                    )));
                }
            }
            self.session.write().await.transition_to(SessionStatus::Starting)?;
        }

        self.broker.connect().await?;

        if !recovered {
            let broker_positions = self.broker.get_positions().await?;
            let mut cache = self.positions.write().await;
            cache.clear();
            for position in broker_positions {
                cache.insert(position.symbol.clone(), position);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (emergency_tx, emergency_rx) = mpsc::channel(16);

        let mut handles = Vec::new();
        handles.push(tokio::spawn(reconciliation::run_position_reconciliation(
            self.broker.clone(),
            self.positions.clone(),
            self.config.position_reconciliation_period,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(reconciliation::run_order_reconciliation(
            self.broker.clone(),
            self.active_orders.clone(),
            self.portfolio.clone(),
            self.event_bus.clone(),
            self.config.order_reconciliation_period,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(monitor::run_monitor_loop(
            self.broker.clone(),
            self.positions.clone(),
            self.session.clone(),
            self.config.monitor.clone(),
            emergency_tx,
            self.config.monitor_period,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(monitor::run_heartbeat_loop(
            self.broker.clone(),
            self.config.heartbeat_period,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(Self::run_snapshot_loop(
            Arc::clone(self),
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(run_order_update_stream(
            self.broker.clone(),
            self.active_orders.clone(),
            self.portfolio.clone(),
            self.event_bus.clone(),
            shutdown_rx.clone(),
        )));

        // Spawn-and-forget: this task makes exactly one `emergency_stop` call
        // (if any) and then returns on its own once the monitor loop's
        // shutdown drops its `emergency_tx` clone and `recv` yields `None`.
        // It must never be awaited or aborted from within `emergency_stop`
        // itself, since it may be the very task that called it.
        let listener_service = Arc::clone(self);
        tokio::spawn(async move {
            Self::run_emergency_listener(listener_service, emergency_rx).await;
        });

        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *self.loop_handles.lock().await = handles;

        let now = Utc::now();
        if !recovered {
            let mut session = self.session.write().await;
            session.transition_to(SessionStatus::Running)?;
            session.started_at = Some(now);
        }

        let session_id = self.session.read().await.id;
        let portfolio_id = self.portfolio.lock().await.id;
        self.event_bus
            .publish(TradingEvent::SessionStarted {
                session_id,
                portfolio_id,
                timestamp: now,
            })
            .await;
        info!(%session_id, recovered, "trading session started");
        Ok(())
    }

    async fn run_emergency_listener(service: Arc<Self>, mut rx: mpsc::Receiver<String>) {
        if let Some(reason) = rx.recv().await {
            if let Err(err) = service.emergency_stop(reason, true).await {
                error!(error = %err, "emergency stop triggered by monitor loop failed");
            }
        }
    }

    async fn run_snapshot_loop(service: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(service.recovery.snapshot_interval_secs()));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = service.build_snapshot().await;
                    if let Err(err) = service.recovery.save(&snapshot).await {
                        warn!(error = %err, "periodic snapshot save failed");
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

    /// Cancels all pending orders best-effort; optionally closes positions;
    /// stops background loops; disconnects the broker; transitions to
    /// `Stopped`.
    pub async fn stop(self: &Arc<Self>, reason: String) -> Result<(), CoreError> {
        self.session.write().await.transition_to(SessionStatus::Stopping)?;

        self.cancel_all_active_orders().await;
        if self.config.close_positions_on_stop {
            self.close_all_positions().await;
        }

        self.halt_background_work().await;
        let _ = self.broker.disconnect().await;

        let now = Utc::now();
        let session_id = {
            let mut session = self.session.write().await;
            session.transition_to(SessionStatus::Stopped)?;
            session.stopped_at = Some(now);
            session.id
        };

        let snapshot = self.build_snapshot().await;
        if let Err(err) = self.recovery.save(&snapshot).await {
            warn!(error = %err, "snapshot save on stop failed");
        }

        self.event_bus
            .publish(TradingEvent::SessionStopped {
                session_id,
                reason,
                timestamp: now,
            })
            .await;
        Ok(())
    }

    pub async fn pause(&self, reason: String) -> Result<(), CoreError> {
        let (session_id, now) = {
            let mut session = self.session.write().await;
            session.transition_to(SessionStatus::Pausing)?;
            session.transition_to(SessionStatus::Paused)?;
            (session.id, Utc::now())
        };
        self.event_bus
            .publish(TradingEvent::SessionPaused {
                session_id,
                reason,
                timestamp: now,
            })
            .await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), CoreError> {
        let (session_id, now) = {
            let mut session = self.session.write().await;
            session.transition_to(SessionStatus::Running)?;
            (session.id, Utc::now())
        };
        self.event_bus
            .publish(TradingEvent::SessionResumed {
                session_id,
                timestamp: now,
            })
            .await;
        Ok(())
    }

    /// The seven-step procedure of §4.8, run in order; cancellation and
    /// position-close fan-out (steps 3-4) run concurrently per item,
    /// collecting outcomes without short-circuiting on individual failure.
    pub async fn emergency_stop(self: &Arc<Self>, reason: String, close_positions: bool) -> Result<(), CoreError> {
        let now = Utc::now();
        {
            let mut session = self.session.write().await;
            session.transition_to(SessionStatus::Locked)?;
            session.error_message = Some(reason.clone());
        }

        self.cancel_all_active_orders().await;

        let mut positions_closed = false;
        if close_positions {
            positions_closed = self.close_all_positions().await;
        }

        self.halt_background_work().await;
        let _ = self.broker.disconnect().await;

        let snapshot = self.build_snapshot().await;
        if let Err(err) = self.recovery.save(&snapshot).await {
            warn!(error = %err, "critical snapshot save on emergency stop failed");
        }

        self.event_bus
            .publish(TradingEvent::EmergencyStop {
                reason,
                positions_closed,
                severity: Severity::Critical,
                timestamp: now,
            })
            .await;
        Ok(())
    }

    /// `Locked -> Stopped` only. A subsequent `start` is then permitted.
    pub async fn unlock(&self) -> Result<(), CoreError> {
        let (session_id, now) = {
            let mut session = self.session.write().await;
            session.transition_to(SessionStatus::Stopped)?;
            session.error_message = None;
            (session.id, Utc::now())
        };
        self.event_bus
            .publish(TradingEvent::SessionUnlocked {
                session_id,
                timestamp: now,
            })
            .await;
        Ok(())
    }

    async fn cancel_all_active_orders(&self) {
        let orders: Vec<(Uuid, String)> = self
            .active_orders
            .read()
            .await
            .values()
            .filter(|o| o.is_pending())
            .filter_map(|o| o.broker_order_id.clone().map(|bid| (o.id, bid)))
            .collect();

        let results = join_all(orders.iter().map(|(_, broker_id)| self.broker.cancel(broker_id))).await;

        for ((order_id, _), result) in orders.iter().zip(results) {
            match result {
                Ok(_) => {
                    let events = {
                        let mut active_orders = self.active_orders.write().await;
                        match active_orders.get_mut(order_id) {
                            Some(order) => {
                                let _ = order.cancel("emergency/stop cancellation".to_string(), Utc::now());
                                order.pull_events()
                            }
                            None => Vec::new(),
                        }
                    };
                    if !events.is_empty() {
                        let mut portfolio = self.portfolio.lock().await;
                        let _ = portfolio.release_remaining(*order_id);
                        drop(portfolio);
                        for event in events {
                            self.event_bus.publish(event).await;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, %order_id, "order cancellation failed during stop/emergency stop");
                }
            }
        }
    }

    /// Returns whether at least one reduce-only close was submitted.
    async fn close_all_positions(&self) -> bool {
        let symbols: Vec<Symbol> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.open)
            .map(|p| p.symbol.clone())
            .collect();

        if symbols.is_empty() {
            return false;
        }

        let results = join_all(symbols.iter().map(|symbol| self.broker.close_position(symbol))).await;
        for (symbol, result) in symbols.iter().zip(results) {
            if let Err(err) = result {
                warn!(error = %err, %symbol, "position close failed during emergency stop");
            }
        }
        true
    }

    async fn halt_background_work(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(true);
        }
        let handles = std::mem::take(&mut *self.loop_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Places an explicit order request. Rejected with a conflict error if
    /// the session is not `Running` (including while `Locked`).
    pub async fn place_order(&self, request: OrderRequest) -> Result<Uuid, CoreError> {
        if self.session.read().await.status != SessionStatus::Running {
            return Err(CoreError::conflict("session is not running"));
        }
        self.submit_order(
            request.symbol,
            request.side,
            request.order_type,
            request.quantity,
            request.limit_price,
            request.stop_price,
            request.time_in_force,
            request.reduce_only,
            request.leverage,
        )
        .await
    }

    /// Consumes one strategy signal: adapts it to an order intent (steps
    /// 1-7), risk-validates and submits it (steps 8-9). Returns `Ok(None)`
    /// if the signal was dropped or rejected rather than erroring, since a
    /// dropped signal is expected, routine behavior.
    pub async fn handle_signal(&self, signal: Signal) -> Result<Option<Uuid>, CoreError> {
        let session_running = self.session.read().await.status == SessionStatus::Running;
        let available = self.portfolio.lock().await.available;

        let adapted = self.signal_adapter.adapt(
            &signal,
            session_running,
            self.config.auto_execute_signals,
            available,
        );

        let intent = match adapted {
            AdaptedSignal::Order(intent) => intent,
            AdaptedSignal::Dropped(reason) => {
                debug_dropped_signal(&signal, reason);
                return Ok(None);
            }
        };

        match self
            .submit_order(
                intent.symbol.clone(),
                intent.side,
                intent.order_type,
                intent.quantity,
                intent.limit_price,
                None,
                TimeInForce::Gtc,
                intent.reduce_only,
                intent.leverage,
            )
            .await
        {
            Ok(order_id) => Ok(Some(order_id)),
            Err(CoreError::RiskBlocked { reason }) => {
                self.event_bus
                    .publish(TradingEvent::RiskSignalRejected {
                        symbol: intent.symbol,
                        side: intent.side,
                        quantity: intent.quantity,
                        reason,
                        timestamp: Utc::now(),
                    })
                    .await;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit_order(
        &self,
        symbol: Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
        time_in_force: TimeInForce,
        reduce_only: bool,
        leverage: u32,
    ) -> Result<Uuid, CoreError> {
        let symbol_info = self.broker.get_symbol_info(&symbol).await?;
        let rounded_qty = symbol_info.round_quantity(quantity);
        let rounded_price = limit_price.map(|p| symbol_info.round_price(p, side));

        let price_for_risk = match rounded_price {
            Some(p) => p,
            None => self.broker.get_market_data(&symbol).await?.last,
        };
        if !symbol_info.meets_minimums(rounded_qty, price_for_risk) {
            return Err(CoreError::validation(format!(
                "{symbol} order fails exchange minimum quantity/notional"
            )));
        }

        let portfolio_id = self.portfolio.lock().await.id;
        let proposal = OrderProposal {
            symbol: symbol.clone(),
            side,
            quantity: rounded_qty,
            price: price_for_risk,
            leverage,
        };
        let snapshot = self.portfolio_snapshot().await;
        let outcome = self.risk_validator.validate(&proposal, &snapshot);
        if outcome.decision.is_blocked() {
            return Err(CoreError::risk_blocked(outcome.decision.reason));
        }

        let now = Utc::now();
        let mut order = Order::new(
            portfolio_id,
            symbol.clone(),
            side,
            order_type,
            outcome.quantity,
            rounded_price,
            stop_price,
            time_in_force,
            reduce_only,
            outcome.leverage,
            now,
        );
        let events = order.pull_events();

        let reservation = Portfolio::required_reservation(outcome.quantity, price_for_risk, order_type == OrderType::Market);
        {
            let mut portfolio = self.portfolio.lock().await;
            portfolio.reserve(order.id, reservation)?;
        }

        self.monitored_symbols.lock().await.insert(symbol.clone());
        for event in events {
            self.event_bus.publish(event).await;
        }

        match self.broker.submit(&order).await {
            Ok(broker_id) => {
                order.set_broker_order_id(broker_id);
                let order_id = order.id;
                self.active_orders.write().await.insert(order_id, order);
                Ok(order_id)
            }
            Err(err) => {
                let mut portfolio = self.portfolio.lock().await;
                let _ = portfolio.release_remaining(order.id);
                Err(err.into())
            }
        }
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<(), CoreError> {
        let broker_order_id = {
            let orders = self.active_orders.read().await;
            match orders.get(&order_id) {
                Some(order) if order.is_terminal() => {
                    return Err(CoreError::conflict("order is already in a terminal state"))
                }
                Some(order) => order.broker_order_id.clone(),
                None => {
                    return Err(CoreError::NotFound {
                        what: "order",
                        id: order_id.to_string(),
                    })
                }
            }
        };

        if let Some(broker_order_id) = broker_order_id {
            self.broker.cancel(&broker_order_id).await?;
        }

        let events = {
            let mut orders = self.active_orders.write().await;
            match orders.get_mut(&order_id) {
                Some(order) => {
                    order.cancel("operator requested cancellation".to_string(), Utc::now())?;
                    order.pull_events()
                }
                None => Vec::new(),
            }
        };

        let mut portfolio = self.portfolio.lock().await;
        let _ = portfolio.release_remaining(order_id);
        drop(portfolio);

        for event in events {
            self.event_bus.publish(event).await;
        }
        Ok(())
    }

    /// Runs one immediate order-reconciliation pass, independent of the
    /// background loop's interval. Exposed for operator-triggered refresh.
    pub async fn reconcile_now(&self) {
        reconcile_orders_once(&self.broker, &self.active_orders, &self.portfolio, &self.event_bus).await;
    }

    pub async fn get_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn get_portfolio_state(&self) -> PortfolioView {
        let portfolio = self.portfolio.lock().await;
        let positions = self.positions.read().await;
        let mark_prices: HashMap<Symbol, Decimal> =
            positions.values().map(|p| (p.symbol.clone(), p.mark_price)).collect();
        PortfolioView {
            available: portfolio.available,
            reserved: portfolio.reserved,
            positions: portfolio.positions.clone(),
            equity: portfolio.total_equity(&mark_prices),
        }
    }

    pub async fn get_session_status(&self) -> SessionStatus {
        self.session.read().await.status
    }

    pub async fn get_risk_summary(&self) -> RiskSummary {
        self.risk_validator.summary(&self.portfolio_snapshot().await)
    }

    async fn portfolio_snapshot(&self) -> PortfolioSnapshot {
        let portfolio = self.portfolio.lock().await;
        let positions = self.positions.read().await;
        let mark_prices: HashMap<Symbol, Decimal> =
            positions.values().map(|p| (p.symbol.clone(), p.mark_price)).collect();
        let equity = portfolio.total_equity(&mark_prices);
        let exposure_by_symbol: HashMap<Symbol, Decimal> = positions
            .values()
            .map(|p| (p.symbol.clone(), p.quantity.abs() * p.mark_price))
            .collect();
        drop(positions);

        let mut peak = self.peak_equity.lock().await;
        if equity > *peak {
            *peak = equity;
        }
        let daily_pnl = self.session.read().await.running_pnl;

        PortfolioSnapshot {
            available: portfolio.available,
            equity,
            peak_equity: *peak,
            daily_pnl,
            exposure_by_symbol,
        }
    }

    async fn build_snapshot(&self) -> Snapshot {
        let session = self.session.read().await.clone();
        let active_orders: Vec<Order> = self.active_orders.read().await.values().cloned().collect();
        let active_positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        let monitored_symbols = self.monitored_symbols.lock().await.clone();
        let portfolio_id = self.portfolio.lock().await.id;
        let risk_metrics = self.risk_validator.summary(&self.portfolio_snapshot().await);

        Snapshot {
            timestamp: Utc::now(),
            session,
            active_orders,
            active_positions,
            monitored_symbols,
            portfolio_id,
            risk_metrics,
            metadata: SnapshotMetadata::default(),
        }
    }
}

/// Drains the broker's user-data stream of order updates for the life of
/// the session (§2: broker push -> Order Aggregate -> Portfolio -> events),
/// applying each update the same way the polling reconciliation loop does.
/// If the driver has no user-data stream to offer, this exits immediately
/// and the polling loop remains the only path.
async fn run_order_update_stream(
    broker: Arc<dyn crate::domain::ports::BrokerPort>,
    active_orders: ActiveOrders,
    portfolio: Arc<Mutex<Portfolio>>,
    event_bus: EventBus,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut updates = match broker.subscribe_order_updates().await {
        Ok(rx) => rx,
        Err(err) => {
            warn!(error = %err, "broker order-update stream unavailable, relying on polling reconciliation only");
            return;
        }
    };

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        reconciliation::apply_broker_order_update(&active_orders, &portfolio, &event_bus, &update).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "order update stream lagged, some broker updates were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
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

fn debug_dropped_signal(signal: &Signal, reason: DropReason) {
    tracing::debug!(
        symbol = %signal.symbol,
        strategy = %signal.strategy_id,
        ?reason,
        "signal dropped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk_validator::RiskConfig;
    use crate::application::signal_adapter::AdapterConfig;
    use crate::application::sizing::{PositionSizer, SizingConfig};
    use crate::domain::session::SessionStatus as SS;
    use crate::infrastructure::mock::MockBrokerPort;
    use crate::infrastructure::persistence::FileSnapshotRepository;
    use crate::application::recovery::RecoveryConfig;

    fn test_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("session-service-test-{}", Uuid::new_v4()))
    }

    async fn new_service() -> Arc<LiveTradingService> {
        let broker = MockBrokerPort::new(dec!(100000));
        broker.set_price("BTCUSDT".to_string(), dec!(50000)).await;
        let broker: Arc<dyn crate::domain::ports::BrokerPort> = Arc::new(broker);
        let portfolio = Portfolio::new(Uuid::new_v4(), "main", "USDT", dec!(100000));
        let repo = Arc::new(FileSnapshotRepository::new(test_dir()));
        let recovery = Arc::new(RecoveryService::new(repo, RecoveryConfig::default()));
        let risk_validator = RiskValidator::new(RiskConfig::default());
        let signal_adapter = SignalAdapter::new(AdapterConfig::default(), PositionSizer::new(SizingConfig::default()));

        LiveTradingService::new(
            broker,
            portfolio,
            EventBus::default(),
            risk_validator,
            signal_adapter,
            recovery,
            LiveTradingServiceConfig::default(),
        )
    }

    #[tokio::test]
    async fn start_transitions_to_running_and_publishes_event() {
        let service = new_service().await;
        service.start().await.unwrap();
        assert_eq!(service.get_session_status().await, SS::Running);
        service.stop("test done".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn place_order_reserves_funds_and_tracks_active_order() {
        let service = new_service().await;
        service.start().await.unwrap();

        let order_id = service
            .place_order(OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                quantity: dec!(0.01),
                limit_price: Some(dec!(50000)),
                stop_price: None,
                time_in_force: TimeInForce::Gtc,
                reduce_only: false,
                leverage: 5,
            })
            .await
            .unwrap();

        let state = service.get_portfolio_state().await;
        assert!(state.available < dec!(100000));
        assert!(service.active_orders.read().await.contains_key(&order_id));
        service.stop("test done".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn place_order_while_locked_is_rejected() {
        let service = new_service().await;
        service.start().await.unwrap();
        service.emergency_stop("test trigger".to_string(), false).await.unwrap();

        let err = service
            .place_order(OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                quantity: dec!(0.01),
                limit_price: Some(dec!(50000)),
                stop_price: None,
                time_in_force: TimeInForce::Gtc,
                reduce_only: false,
                leverage: 5,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn unlock_after_emergency_stop_allows_a_new_start() {
        let service = new_service().await;
        service.start().await.unwrap();
        service.emergency_stop("daily loss breach".to_string(), false).await.unwrap();
        assert_eq!(service.get_session_status().await, SS::Locked);

        service.unlock().await.unwrap();
        assert_eq!(service.get_session_status().await, SS::Stopped);

        service.start().await.unwrap();
        assert_eq!(service.get_session_status().await, SS::Running);
        service.stop("cleanup".to_string()).await.unwrap();
    }
}
