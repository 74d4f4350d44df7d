//! Process configuration: everything the binary needs to assemble a
//! [`crate::application::session_service::LiveTradingService`] is read from
//! the environment here, once, at startup. Grounded on the teacher's
//! `config.rs` (`FromStr` enums, `unwrap_or_else` defaults, `Decimal`
//! parsing via `.context(...)`), adapted to this crate's risk/sizing/
//! adapter/service/monitor/recovery config structs instead of the
//! teacher's strategy parameters.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::application::monitor::MonitorConfig;
use crate::application::recovery::RecoveryConfig;
use crate::application::risk_validator::RiskConfig;
use crate::application::session_service::LiveTradingServiceConfig;
use crate::application::signal_adapter::AdapterConfig;
use crate::application::sizing::SizingConfig;
use crate::domain::types::OrderType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Testnet,
    Mainnet,
    Paper,
}

impl FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TESTNET" => Ok(TradingMode::Testnet),
            "MAINNET" => Ok(TradingMode::Mainnet),
            "PAPER" => Ok(TradingMode::Paper),
            _ => anyhow::bail!("Invalid TRADING_MODE: {s}. Must be TESTNET, MAINNET or PAPER"),
        }
    }
}

fn parse_order_type(s: &str) -> Result<OrderType> {
    match s.to_uppercase().as_str() {
        "MARKET" => Ok(OrderType::Market),
        "LIMIT" => Ok(OrderType::Limit),
        "STOP" => Ok(OrderType::Stop),
        "STOP_LIMIT" => Ok(OrderType::StopLimit),
        "TAKE_PROFIT" => Ok(OrderType::TakeProfit),
        "TAKE_PROFIT_MARKET" => Ok(OrderType::TakeProfitMarket),
        _ => anyhow::bail!("Invalid DEFAULT_ORDER_TYPE: {s}"),
    }
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("failed to parse {key} as a decimal"))
}

fn env_parse<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("failed to parse {key}: {e}"))
}

/// Broker credentials for whichever mode is active. Only the credentials for
/// `trading_mode` are required to be non-empty; the others are read but
/// unused (Paper mode needs none).
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub trading_mode: TradingMode,
    pub trading_enabled: bool,
    pub broker_credentials: BrokerCredentials,
    pub state_dir: PathBuf,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub adapter: AdapterConfig,
    pub service: LiveTradingServiceConfig,
    pub monitor: MonitorConfig,
    pub recovery: RecoveryConfig,
    pub ws: WsConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let trading_mode = env_parse::<TradingMode>("TRADING_MODE", "PAPER")?;
        let trading_enabled = env_parse::<bool>("TRADING_ENABLED", "false")?;

        let (api_key_var, secret_var) = match trading_mode {
            TradingMode::Testnet => ("BINANCE_TESTNET_API_KEY", "BINANCE_TESTNET_API_SECRET"),
            TradingMode::Mainnet => ("BINANCE_API_KEY", "BINANCE_API_SECRET"),
            TradingMode::Paper => ("BINANCE_TESTNET_API_KEY", "BINANCE_TESTNET_API_SECRET"),
        };
        let broker_credentials = BrokerCredentials {
            api_key: env::var(api_key_var).unwrap_or_default(),
            api_secret: env::var(secret_var).unwrap_or_default(),
        };
        if matches!(trading_mode, TradingMode::Mainnet)
            && (broker_credentials.api_key.is_empty() || broker_credentials.api_secret.is_empty())
        {
            anyhow::bail!("TRADING_MODE=MAINNET requires BINANCE_API_KEY and BINANCE_API_SECRET");
        }

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./state"));

        let max_leverage = env_parse::<u32>("MAX_LEVERAGE", "10")?;
        let max_position_size_usdt = env_decimal("MAX_POSITION_SIZE_USDT", "10000")?;
        let max_positions = env_parse::<usize>("MAX_POSITIONS", "10")?;
        let daily_loss_limit_usdt = env_decimal("DAILY_LOSS_LIMIT_USDT", "500")?;
        let max_drawdown_percent = env_decimal("MAX_DRAWDOWN_PERCENT", "20")?;

        let risk = RiskConfig {
            max_leverage,
            max_position_size_usdt,
            daily_loss_limit_usdt,
            max_positions,
            max_drawdown_percent,
            ..RiskConfig::default()
        };

        let default_position_size_percent = env_decimal("DEFAULT_POSITION_SIZE_PERCENT", "0.02")?;
        let use_kelly_criterion = env_parse::<bool>("USE_KELLY_CRITERION", "false")?;
        let kelly_fraction_cap = env_decimal("KELLY_FRACTION", "0.25")?;

        let sizing = SizingConfig {
            default_position_size_percent,
            use_kelly_criterion,
            kelly_fraction_cap,
            ..SizingConfig::default()
        };

        let default_order_type_str =
            env::var("DEFAULT_ORDER_TYPE").unwrap_or_else(|_| "LIMIT".to_string());
        let default_order_type = parse_order_type(&default_order_type_str)?;
        let limit_order_offset_percent = env_decimal("LIMIT_ORDER_OFFSET_PERCENT", "0.001")?;
        let stop_loss_percent = env_decimal("STOP_LOSS_PERCENT", "0.02")?;
        let take_profit_percent = env_decimal("TAKE_PROFIT_PERCENT", "0.04")?;

        let auto_execute_signals = env_parse::<bool>("AUTO_EXECUTE_SIGNALS", "true")?;
        let signal_confidence_threshold = env_parse::<f64>("SIGNAL_CONFIDENCE_THRESHOLD", "0.55")?;
        let signal_strength_threshold = env_parse::<f64>("SIGNAL_STRENGTH_THRESHOLD", "0.3")?;

        let adapter = AdapterConfig {
            confidence_threshold: signal_confidence_threshold,
            strength_threshold: signal_strength_threshold,
            default_order_type,
            limit_order_offset_percent,
            stop_loss_percent,
            take_profit_percent,
            max_position_size_usdt,
            ..AdapterConfig::default()
        };

        let ws_reconnect_delay = env_parse::<u64>("WS_RECONNECT_DELAY", "5")?;
        let ws_max_reconnect_delay = env_parse::<u64>("WS_MAX_RECONNECT_DELAY", "60")?;
        let ws_heartbeat_interval = env_parse::<u64>("WS_HEARTBEAT_INTERVAL", "30")?;
        let ws = WsConfig {
            reconnect_delay: Duration::from_secs(ws_reconnect_delay),
            max_reconnect_delay: Duration::from_secs(ws_max_reconnect_delay),
            heartbeat_interval: Duration::from_secs(ws_heartbeat_interval),
        };

        let close_positions_on_stop = env_parse::<bool>("CLOSE_POSITIONS_ON_STOP", "false")?;
        let service = LiveTradingServiceConfig {
            auto_execute_signals,
            close_positions_on_stop,
            heartbeat_period: ws.heartbeat_interval,
            ..LiveTradingServiceConfig::default()
        };

        let monitor = MonitorConfig {
            daily_loss_limit: daily_loss_limit_usdt,
            ..MonitorConfig::default()
        };

        let recovery = RecoveryConfig::default();

        Ok(Config {
            trading_mode,
            trading_enabled,
            broker_credentials,
            state_dir,
            risk,
            sizing,
            adapter,
            service,
            monitor,
            recovery,
            ws,
        })
    }
}
