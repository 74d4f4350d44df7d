//! Monitor and heartbeat background loops (§5): the monitor loop watches
//! for near-liquidation positions and a daily-loss breach, escalating to
//! emergency stop over `emergency_tx`; the heartbeat loop keeps the broker
//! connection alive at a configured interval.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::application::reconciliation::PositionCache;
use crate::domain::ports::BrokerPort;
use crate::domain::session::TradingSession;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Liquidation proximity in `[0, 1]` above which a position is flagged.
    pub liquidation_proximity_threshold: Decimal,
    pub daily_loss_limit: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            liquidation_proximity_threshold: dec!(0.9),
            daily_loss_limit: dec!(1000),
        }
    }
}

/// Checks near-liquidation positions and the daily-loss threshold; sends a
/// reason over `emergency_tx` the first time either trips, then keeps
/// watching (the orchestrator is responsible for not double-triggering once
/// the session is `Locked`).
pub async fn run_monitor_loop(
    broker: Arc<dyn BrokerPort>,
    positions: PositionCache,
    session: Arc<RwLock<TradingSession>>,
    config: MonitorConfig,
    emergency_tx: mpsc::Sender<String>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                monitor_tick(&broker, &positions, &session, &config, &emergency_tx).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn monitor_tick(
    broker: &Arc<dyn BrokerPort>,
    positions: &PositionCache,
    session: &Arc<RwLock<TradingSession>>,
    config: &MonitorConfig,
    emergency_tx: &mpsc::Sender<String>,
) {
    let cache = positions.read().await;
    for position in cache.values() {
        if let Some(proximity) = position.liquidation_proximity() {
            if proximity >= config.liquidation_proximity_threshold {
                warn!(
                    symbol = %position.symbol,
                    proximity = %proximity,
                    "position near liquidation"
                );
                let _ = emergency_tx
                    .send(format!("near-liquidation: {} at {}", position.symbol, proximity))
                    .await;
            }
        }
    }
    drop(cache);

    let running_pnl = session.read().await.running_pnl;
    if running_pnl <= -config.daily_loss_limit {
        warn!(pnl = %running_pnl, limit = %config.daily_loss_limit, "daily loss limit breached");
        let _ = emergency_tx
            .send(format!("daily loss limit breached: pnl {running_pnl}"))
            .await;
    }

    let balance = broker.get_account_balance().await;
    let open_positions = positions.read().await.len();
    match balance {
        Ok(balance) => {
            info!(
                equity = %balance.total,
                available = %balance.available,
                open_positions,
                "monitor health check"
            );
        }
        Err(err) => {
            warn!(error = %err, "monitor could not fetch account balance");
        }
    }
}

/// Keeps the broker connection alive. Driver-specific in substance (the
/// Binance driver's websocket ping/pong lives in its own reconnect loop);
/// here it is a periodic lightweight broker call that also surfaces
/// connectivity loss early.
pub async fn run_heartbeat_loop(
    broker: Arc<dyn BrokerPort>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match broker.get_account_balance().await {
                    Ok(_) => debug!("heartbeat ok"),
                    Err(err) => warn!(error = %err, "heartbeat failed"),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PositionSide;
    use std::collections::HashMap;
    use tokio::sync::RwLock as TokioRwLock;
    use uuid::Uuid;

    fn near_liquidation_position() -> crate::domain::position::Position {
        crate::domain::position::Position {
            portfolio_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            quantity: dec!(1),
            entry_price: dec!(50000),
            mark_price: dec!(45100),
            realized_pnl: dec!(0),
            leverage: 10,
            liquidation_price: Some(dec!(45000)),
            margin_used: dec!(5000),
            open: true,
        }
    }

    #[tokio::test]
    async fn monitor_tick_escalates_on_near_liquidation_position() {
        let broker = crate::infrastructure::mock::shared(dec!(10000));
        let mut map = HashMap::new();
        map.insert("BTCUSDT".to_string(), near_liquidation_position());
        let positions: PositionCache = Arc::new(TokioRwLock::new(map));
        let session = Arc::new(TokioRwLock::new(TradingSession::new(Uuid::new_v4())));
        let (tx, mut rx) = mpsc::channel(4);

        monitor_tick(&(broker as Arc<dyn BrokerPort>), &positions, &session, &MonitorConfig::default(), &tx).await;

        let reason = rx.try_recv().unwrap();
        assert!(reason.contains("near-liquidation"));
    }

    #[tokio::test]
    async fn monitor_tick_escalates_on_daily_loss_breach() {
        let broker = crate::infrastructure::mock::shared(dec!(10000));
        let positions: PositionCache = Arc::new(TokioRwLock::new(HashMap::new()));
        let mut session_state = TradingSession::new(Uuid::new_v4());
        session_state.running_pnl = dec!(-2000);
        let session = Arc::new(TokioRwLock::new(session_state));
        let (tx, mut rx) = mpsc::channel(4);

        monitor_tick(&(broker as Arc<dyn BrokerPort>), &positions, &session, &MonitorConfig::default(), &tx).await;

        let reason = rx.try_recv().unwrap();
        assert!(reason.contains("daily loss limit breached"));
    }

    #[tokio::test]
    async fn monitor_tick_is_silent_when_healthy() {
        let broker = crate::infrastructure::mock::shared(dec!(10000));
        let positions: PositionCache = Arc::new(TokioRwLock::new(HashMap::new()));
        let session = Arc::new(TokioRwLock::new(TradingSession::new(Uuid::new_v4())));
        let (tx, mut rx) = mpsc::channel(4);

        monitor_tick(&(broker as Arc<dyn BrokerPort>), &positions, &session, &MonitorConfig::default(), &tx).await;

        assert!(rx.try_recv().is_err());
    }
}
