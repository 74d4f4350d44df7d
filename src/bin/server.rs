//! Headless process entrypoint: wires one [`LiveTradingService`] by explicit
//! dependency injection (no module-level singletons) and runs it until a
//! shutdown signal arrives. Grounded on the teacher's `src/bin/server.rs`
//! (headless, stdout logging via `tracing_subscriber`, `ctrl_c` shutdown).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use trading_core::application::event_bus::EventBus;
use trading_core::application::recovery::RecoveryService;
use trading_core::application::risk_validator::RiskValidator;
use trading_core::application::session_service::LiveTradingService;
use trading_core::application::signal_adapter::SignalAdapter;
use trading_core::application::sizing::PositionSizer;
use trading_core::config::{Config, TradingMode};
use trading_core::domain::ports::BrokerPort;
use trading_core::domain::portfolio::Portfolio;
use trading_core::infrastructure::binance::driver::BinanceConfig;
use trading_core::infrastructure::binance::BinanceFuturesDriver;
use trading_core::infrastructure::mock::MockBrokerPort;
use trading_core::infrastructure::persistence::FileSnapshotRepository;

/// Minimal process flags; everything else is read from the environment by
/// [`Config::from_env`].
#[derive(Parser)]
#[command(author, version, about = "Live trading core", long_about = None)]
struct Cli {
    /// Path to a `.env` file to load before reading the environment.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Overrides STATE_DIR for this run.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("live trading core {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    info!(
        mode = ?config.trading_mode,
        enabled = config.trading_enabled,
        "configuration loaded"
    );

    let broker: Arc<dyn BrokerPort> = match config.trading_mode {
        TradingMode::Mainnet => {
            let binance_config = BinanceConfig::mainnet(
                config.broker_credentials.api_key.clone(),
                config.broker_credentials.api_secret.clone(),
            );
            Arc::new(BinanceFuturesDriver::new(binance_config))
        }
        TradingMode::Testnet => {
            let binance_config = BinanceConfig::testnet(
                config.broker_credentials.api_key.clone(),
                config.broker_credentials.api_secret.clone(),
            );
            Arc::new(BinanceFuturesDriver::new(binance_config))
        }
        TradingMode::Paper => Arc::new(MockBrokerPort::new(dec!(100_000))),
    };

    let portfolio = Portfolio::new(Uuid::new_v4(), "main", "USDT", dec!(100_000));
    let event_bus = EventBus::default();
    let risk_validator = RiskValidator::new(config.risk.clone());
    let sizer = PositionSizer::new(config.sizing.clone());
    let signal_adapter = SignalAdapter::new(config.adapter.clone(), sizer);
    let repository = Arc::new(FileSnapshotRepository::new(config.state_dir.clone()));
    let recovery = Arc::new(RecoveryService::new(repository, config.recovery.clone()));

    let service = LiveTradingService::new(
        broker,
        portfolio,
        event_bus,
        risk_validator,
        signal_adapter,
        recovery,
        config.service.clone(),
    );

    if !config.trading_enabled {
        info!("TRADING_ENABLED is false; exiting without starting a session");
        return Ok(());
    }

    service.start().await?;
    info!("trading session running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping session");
    service.stop("operator requested shutdown via signal".to_string()).await?;

    Ok(())
}
