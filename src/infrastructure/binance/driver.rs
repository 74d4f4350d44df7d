//! `BinanceFuturesDriver`: the one concrete Broker Port driver, a
//! USDT-margined futures driver. Grounded on
//! `original_source/.../binance_futures_broker.py` (reconnect backoff,
//! futures endpoints) and styled on the teacher's
//! `infrastructure/binance/execution.rs` (HMAC signing, `reqwest-middleware`
//! client, exchange-info caching).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::errors::{BrokerError, BrokerErrorKind};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{
    AccountBalance, BrokerOrderStatus, BrokerOrderUpdate, BrokerPort, MarketSnapshot, MarketTick,
};
use crate::domain::position::Position;
use crate::domain::types::{OrderSide, OrderType, PositionSide, Symbol, SymbolInfo};
use crate::infrastructure::binance::signing::sign;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::build_http_client;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_base_url: String,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl BinanceConfig {
    pub fn testnet(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
            base_url: "https://testnet.binancefuture.com".to_string(),
            ws_base_url: "wss://stream.binancefuture.com".to_string(),
            recv_window_ms: 5_000,
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }

    pub fn mainnet(api_key: String, api_secret: String) -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            ws_base_url: "wss://fstream.binance.com".to_string(),
            ..Self::testnet(api_key, api_secret)
        }
    }
}

pub struct BinanceFuturesDriver {
    config: BinanceConfig,
    client: ClientWithMiddleware,
    circuit_breaker: Arc<CircuitBreaker>,
    symbol_info_cache: RwLock<HashMap<Symbol, SymbolInfo>>,
    order_update_tx: broadcast::Sender<BrokerOrderUpdate>,
    user_stream_task: Mutex<Option<JoinHandle<()>>>,
    market_stream_task: Mutex<Option<JoinHandle<()>>>,
    /// Symbol/side/original-quantity of orders submitted through this driver,
    /// keyed by broker order id, so `modify` can resubmit a faithful copy of
    /// the order it cancels instead of fabricating one from `get_order_status`
    /// (which reports filled quantity, not the original side or symbol).
    submitted_orders: RwLock<HashMap<String, (Symbol, OrderSide, Decimal)>>,
}

impl BinanceFuturesDriver {
    pub fn new(config: BinanceConfig) -> Self {
        let client = build_http_client(config.request_timeout, config.max_retries);
        let (order_update_tx, _rx) = broadcast::channel(256);
        Self {
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "binance-futures",
                5,
                2,
                Duration::from_secs(30),
            )),
            client,
            config,
            symbol_info_cache: RwLock::new(HashMap::new()),
            order_update_tx,
            user_stream_task: Mutex::new(None),
            market_stream_task: Mutex::new(None),
            submitted_orders: RwLock::new(HashMap::new()),
        }
    }

    /// Starts the user-data-stream task if one isn't already running.
    /// Idempotent: a second `connect()` while the task is alive is a no-op.
    async fn start_user_stream(&self) {
        let mut slot = self.user_stream_task.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let config = self.config.clone();
        let client = self.client.clone();
        let tx = self.order_update_tx.clone();
        *slot = Some(tokio::spawn(run_user_stream(config, client, tx)));
    }

    fn timestamp_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the unix epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push(("timestamp".to_string(), self.timestamp_ms().to_string()));
        params.push(("recvWindow".to_string(), self.config.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign(&self.config.api_secret, &query);
        format!("{query}&signature={signature}")
    }

    async fn cached_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo, BrokerError> {
        if let Some(info) = self.symbol_info_cache.read().await.get(symbol) {
            return Ok(info.clone());
        }
        let info = self.fetch_symbol_info(symbol).await?;
        self.symbol_info_cache
            .write()
            .await
            .insert(symbol.clone(), info.clone());
        Ok(info)
    }

    async fn fetch_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo, BrokerError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("exchangeInfo request failed: {e}")))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BrokerError::transient(format!("exchangeInfo decode failed: {e}")))?;

        let filters = body["symbols"][0]["filters"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let mut step_size = Decimal::new(1, 3);
        let mut tick_size = Decimal::new(1, 1);
        let mut min_qty = Decimal::new(1, 3);
        let mut min_notional = Decimal::from(5);
        for filter in filters {
            match filter["filterType"].as_str() {
                Some("LOT_SIZE") => {
                    step_size = parse_decimal_field(&filter, "stepSize", step_size);
                    min_qty = parse_decimal_field(&filter, "minQty", min_qty);
                }
                Some("PRICE_FILTER") => {
                    tick_size = parse_decimal_field(&filter, "tickSize", tick_size);
                }
                Some("MIN_NOTIONAL") => {
                    min_notional = parse_decimal_field(&filter, "notional", min_notional);
                }
                _ => {}
            }
        }

        Ok(SymbolInfo {
            symbol: symbol.clone(),
            step_size,
            tick_size,
            min_qty,
            min_notional,
        })
    }

    fn order_params(&self, order: &Order, symbol_info: &SymbolInfo) -> Vec<(String, String)> {
        let quantity = symbol_info.round_quantity(order.quantity);
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), order.side.to_string()),
            ("type".to_string(), order.order_type.to_string()),
            ("quantity".to_string(), quantity.to_string()),
        ];
        if order.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        match order.order_type {
            OrderType::Limit | OrderType::StopLimit | OrderType::TakeProfit => {
                if let Some(price) = order.limit_price {
                    let rounded = symbol_info.round_price(price, order.side);
                    params.push(("price".to_string(), rounded.to_string()));
                }
                params.push(("timeInForce".to_string(), order.time_in_force.to_string()));
            }
            _ => {}
        }
        if let Some(stop) = order.stop_price {
            let rounded = symbol_info.round_price(stop, order.side);
            params.push(("stopPrice".to_string(), rounded.to_string()));
        }
        params
    }
}

fn parse_decimal_field(value: &serde_json::Value, field: &str, default: Decimal) -> Decimal {
    value[field]
        .as_str()
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(default)
}

/// Translates Binance order status strings to the core's vocabulary:
/// `NEW -> Pending`, `PARTIALLY_FILLED -> PartiallyFilled`, `FILLED ->
/// Filled`, `CANCELED/EXPIRED -> Cancelled`, `REJECTED -> Rejected`.
fn translate_status(raw: &str) -> OrderStatus {
    match raw {
        "NEW" => OrderStatus::Pending,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "EXPIRED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        other => {
            warn!(status = other, "unrecognized Binance order status, treating as Pending");
            OrderStatus::Pending
        }
    }
}

/// Requests a fresh user-data-stream listen key (valid ~60 minutes; this
/// driver renews by reconnecting rather than keeping it alive with a
/// keepalive ping, so the reconnect loop is the only path to reason about).
async fn obtain_listen_key(client: &ClientWithMiddleware, config: &BinanceConfig) -> Result<String, BrokerError> {
    let url = format!("{}/fapi/v1/listenKey", config.base_url);
    let response = client
        .post(&url)
        .header("X-MBX-APIKEY", config.api_key.clone())
        .send()
        .await
        .map_err(|e| BrokerError::transient(format!("listenKey request failed: {e}")))?;
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| BrokerError::transient(format!("listenKey decode failed: {e}")))?;
    body["listenKey"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BrokerError::permanent(BrokerErrorKind::Generic, "listenKey missing from response"))
}

/// Drains the futures user-data websocket for the life of the driver,
/// translating `ORDER_TRADE_UPDATE` frames into [`BrokerOrderUpdate`]s on
/// `tx`. Reconnects with doubling backoff, capped at `max_reconnect_delay`,
/// whenever the listen key fetch or the socket itself fails.
async fn run_user_stream(config: BinanceConfig, client: ClientWithMiddleware, tx: broadcast::Sender<BrokerOrderUpdate>) {
    let mut backoff = config.reconnect_delay;
    loop {
        let listen_key = match obtain_listen_key(&client, &config).await {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "failed to obtain user-data listen key, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_reconnect_delay);
                continue;
            }
        };

        let url = format!("{}/ws/{}", config.ws_base_url, listen_key);
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                info!("user-data stream connected");
                backoff = config.reconnect_delay;
                let (mut write, mut read) = stream.split();
                let mut ticker = tokio::time::interval(Duration::from_secs(180));
                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(update) = parse_order_trade_update(&text) {
                                        let _ = tx.send(update);
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(err)) => {
                                    warn!(error = %err, "user-data stream read error");
                                    break;
                                }
                                _ => {}
                            }
                        }
                        _ = ticker.tick() => {
                            let _ = write.send(Message::Ping(vec![].into())).await;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "user-data stream connect failed");
            }
        }

        warn!(delay = ?backoff, "user-data stream disconnected, reconnecting after backoff");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_reconnect_delay);
    }
}

fn parse_order_trade_update(text: &str) -> Option<BrokerOrderUpdate> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value["e"].as_str()? != "ORDER_TRADE_UPDATE" {
        return None;
    }
    let order = &value["o"];
    let broker_order_id = order["i"].as_i64()?.to_string();
    let status = translate_status(order["X"].as_str().unwrap_or("NEW"));
    let filled_quantity = parse_decimal_field(order, "z", Decimal::ZERO);
    let average_fill_price = parse_decimal_field(order, "ap", Decimal::ZERO);
    Some(BrokerOrderUpdate {
        broker_order_id,
        status,
        filled_quantity,
        average_fill_price,
        timestamp: chrono::Utc::now(),
    })
}

/// Drains a combined book-ticker stream for `symbols`, forwarding each tick
/// on `tx` until the receiver is dropped. Reconnects with doubling backoff
/// on any socket failure, matching [`run_user_stream`]'s policy.
async fn run_market_stream(config: BinanceConfig, symbols: Vec<Symbol>, tx: mpsc::Sender<MarketTick>) {
    if symbols.is_empty() {
        return;
    }
    let streams = symbols
        .iter()
        .map(|s| format!("{}@bookTicker", s.to_lowercase()))
        .collect::<Vec<_>>()
        .join("/");
    let url = format!("{}/stream?streams={}", config.ws_base_url, streams);
    let mut backoff = config.reconnect_delay;
    loop {
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                info!(?symbols, "market data stream connected");
                backoff = config.reconnect_delay;
                let (mut write, mut read) = stream.split();
                let mut ticker = tokio::time::interval(Duration::from_secs(180));
                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(tick) = parse_book_ticker(&text) {
                                        if tx.send(tick).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(err)) => {
                                    warn!(error = %err, "market data stream read error");
                                    break;
                                }
                                _ => {}
                            }
                        }
                        _ = ticker.tick() => {
                            let _ = write.send(Message::Ping(vec![].into())).await;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "market data stream connect failed");
            }
        }
        warn!(delay = ?backoff, "market data stream disconnected, reconnecting after backoff");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_reconnect_delay);
    }
}

fn parse_book_ticker(text: &str) -> Option<MarketTick> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let data = if value.get("data").is_some() { &value["data"] } else { &value };
    let symbol = data["s"].as_str()?.to_string();
    let bid = parse_decimal_field(data, "b", Decimal::ZERO);
    let ask = parse_decimal_field(data, "a", Decimal::ZERO);
    Some(MarketTick {
        symbol,
        price: (bid + ask) / Decimal::TWO,
        timestamp: chrono::Utc::now(),
    })
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> BrokerError {
    if body.contains("-2019") || body.contains("Margin is insufficient") {
        BrokerError::permanent(BrokerErrorKind::InsufficientBalance, body.to_string())
    } else if body.contains("-1121") || body.contains("Invalid symbol") {
        BrokerError::permanent(BrokerErrorKind::SymbolNotTradable, body.to_string())
    } else if body.contains("-2013") || body.contains("Order does not exist") {
        BrokerError::permanent(BrokerErrorKind::OrderNotFound, body.to_string())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        BrokerError::transient(format!("{status}: {body}"))
    } else {
        BrokerError::permanent(BrokerErrorKind::Generic, format!("{status}: {body}"))
    }
}

#[async_trait]
impl BrokerPort for BinanceFuturesDriver {
    async fn connect(&self) -> Result<(), BrokerError> {
        let url = format!("{}/fapi/v1/ping", self.config.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("connect failed: {e}")))?;
        info!(base_url = %self.config.base_url, "connected to Binance futures");
        self.start_user_stream().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(handle) = self.user_stream_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.market_stream_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn submit(&self, order: &Order) -> Result<String, BrokerError> {
        let symbol_info = self.cached_symbol_info(&order.symbol).await?;
        if !symbol_info.meets_minimums(order.quantity, order.limit_price.unwrap_or_default()) {
            return Err(BrokerError::permanent(
                BrokerErrorKind::Generic,
                "quantity below symbol minimums",
            ));
        }
        let params = self.order_params(order, &symbol_info);
        let url = format!("{}/fapi/v1/order", self.config.base_url);
        let client = self.client.clone();
        let query = self.signed_query(params);
        let api_key = self.config.api_key.clone();

        let result = self
            .circuit_breaker
            .call(|| async move {
                let response = client
                    .post(format!("{url}?{query}"))
                    .header("X-MBX-APIKEY", api_key)
                    .send()
                    .await
                    .map_err(|e| BrokerError::transient(format!("submit failed: {e}")))?;
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| BrokerError::transient(format!("submit decode failed: {e}")))?;
                if !status.is_success() {
                    return Err(classify_error(status, &body));
                }
                let parsed: serde_json::Value = serde_json::from_str(&body)
                    .map_err(|e| BrokerError::transient(format!("submit json decode failed: {e}")))?;
                parsed["orderId"]
                    .as_i64()
                    .map(|id| id.to_string())
                    .ok_or_else(|| BrokerError::permanent(BrokerErrorKind::Generic, "missing orderId in response"))
            })
            .await;

        match result {
            Ok(id) => {
                self.submitted_orders.write().await.insert(
                    id.clone(),
                    (order.symbol.clone(), order.side, order.quantity),
                );
                Ok(id)
            }
            Err(CircuitBreakerError::Open(name)) => Err(BrokerError::transient(format!("circuit '{name}' open"))),
            Err(CircuitBreakerError::Inner(err)) => Err(err),
        }
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        let url = format!("{}/fapi/v1/order", self.config.base_url);
        let query = self.signed_query(vec![("orderId".to_string(), broker_order_id.to_string())]);
        let response = self
            .client
            .delete(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", self.config.api_key.clone())
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("cancel failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::transient(format!("cancel decode failed: {e}")))?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        Ok(true)
    }

    /// Binance futures has no native amend; implemented as cancel+resubmit.
    /// Callers must treat `broker_order_id` as potentially invalidated.
    async fn modify(
        &self,
        broker_order_id: &str,
        new_qty: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> Result<String, BrokerError> {
        let (symbol, side, original_qty) = self
            .submitted_orders
            .read()
            .await
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| {
                BrokerError::permanent(
                    BrokerErrorKind::OrderNotFound,
                    format!("no locally-tracked order for {broker_order_id}, cannot modify"),
                )
            })?;
        self.cancel(broker_order_id).await?;
        let status = self.get_order_status(broker_order_id).await?;
        let remaining = (original_qty - status.filled_quantity).max(Decimal::ZERO);
        let mut resubmit = Order::new(
            uuid::Uuid::nil(),
            symbol,
            side,
            OrderType::Limit,
            new_qty.unwrap_or(remaining),
            new_price,
            None,
            crate::domain::types::TimeInForce::Gtc,
            false,
            1,
            chrono::Utc::now(),
        );
        resubmit.pull_events();
        self.submit(&resubmit).await
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrderStatus, BrokerError> {
        let url = format!("{}/fapi/v1/order", self.config.base_url);
        let query = self.signed_query(vec![("orderId".to_string(), broker_order_id.to_string())]);
        let response = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", self.config.api_key.clone())
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("query failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::transient(format!("query decode failed: {e}")))?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        let parsed: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BrokerError::transient(format!("query json decode failed: {e}")))?;
        Ok(BrokerOrderStatus {
            broker_order_id: broker_order_id.to_string(),
            status: translate_status(parsed["status"].as_str().unwrap_or("NEW")),
            filled_quantity: parse_decimal_field(&parsed, "executedQty", Decimal::ZERO),
            average_fill_price: parse_decimal_field(&parsed, "avgPrice", Decimal::ZERO),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let url = format!("{}/fapi/v2/positionRisk", self.config.base_url);
        let query = self.signed_query(vec![]);
        let response = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", self.config.api_key.clone())
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("positions request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::transient(format!("positions decode failed: {e}")))?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| BrokerError::transient(format!("positions json decode failed: {e}")))?;

        Ok(parsed
            .into_iter()
            .filter_map(|entry| {
                let qty = parse_decimal_field(&entry, "positionAmt", Decimal::ZERO);
                if qty.is_zero() {
                    return None;
                }
                Some(Position {
                    portfolio_id: uuid::Uuid::nil(),
                    symbol: entry["symbol"].as_str().unwrap_or_default().to_string(),
                    side: if qty.is_sign_positive() {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    quantity: qty.abs(),
                    entry_price: parse_decimal_field(&entry, "entryPrice", Decimal::ZERO),
                    mark_price: parse_decimal_field(&entry, "markPrice", Decimal::ZERO),
                    realized_pnl: Decimal::ZERO,
                    leverage: entry["leverage"]
                        .as_str()
                        .and_then(|s| s.parse::<u32>().ok())
                        .unwrap_or(1),
                    liquidation_price: entry["liquidationPrice"]
                        .as_str()
                        .and_then(|s| s.parse::<Decimal>().ok()),
                    margin_used: parse_decimal_field(&entry, "isolatedMargin", Decimal::ZERO),
                    open: true,
                })
            })
            .collect())
    }

    async fn get_position(&self, symbol: &Symbol) -> Result<Option<Position>, BrokerError> {
        Ok(self
            .get_positions()
            .await?
            .into_iter()
            .find(|p| &p.symbol == symbol))
    }

    async fn close_position(&self, symbol: &Symbol) -> Result<String, BrokerError> {
        let position = self.get_position(symbol).await?.ok_or_else(|| {
            BrokerError::permanent(BrokerErrorKind::Generic, format!("no open position for {symbol}"))
        })?;
        let close_side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        let order = Order::new(
            uuid::Uuid::nil(),
            symbol.clone(),
            close_side,
            OrderType::Market,
            position.quantity,
            None,
            None,
            crate::domain::types::TimeInForce::Gtc,
            true,
            position.leverage,
            chrono::Utc::now(),
        );
        self.submit(&order).await
    }

    async fn get_market_data(&self, symbol: &Symbol) -> Result<MarketSnapshot, BrokerError> {
        let url = format!("{}/fapi/v1/ticker/bookTicker", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("market data request failed: {e}")))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BrokerError::transient(format!("market data decode failed: {e}")))?;
        let bid = parse_decimal_field(&body, "bidPrice", Decimal::ZERO);
        let ask = parse_decimal_field(&body, "askPrice", Decimal::ZERO);
        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            bid,
            ask,
            last: (bid + ask) / Decimal::TWO,
        })
    }

    async fn get_account_balance(&self) -> Result<AccountBalance, BrokerError> {
        let url = format!("{}/fapi/v2/balance", self.config.base_url);
        let query = self.signed_query(vec![]);
        let response = self
            .client
            .get(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", self.config.api_key.clone())
            .send()
            .await
            .map_err(|e| BrokerError::transient(format!("balance request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::transient(format!("balance decode failed: {e}")))?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| BrokerError::transient(format!("balance json decode failed: {e}")))?;
        let usdt = parsed
            .iter()
            .find(|entry| entry["asset"].as_str() == Some("USDT"));
        match usdt {
            Some(entry) => Ok(AccountBalance {
                available: parse_decimal_field(entry, "availableBalance", Decimal::ZERO),
                total: parse_decimal_field(entry, "balance", Decimal::ZERO),
                currency: "USDT".to_string(),
            }),
            None => Ok(AccountBalance {
                available: Decimal::ZERO,
                total: Decimal::ZERO,
                currency: "USDT".to_string(),
            }),
        }
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo, BrokerError> {
        self.cached_symbol_info(symbol).await
    }

    async fn subscribe_market_data(
        &self,
        symbols: Vec<Symbol>,
        tx: mpsc::Sender<MarketTick>,
    ) -> Result<(), BrokerError> {
        debug!(?symbols, "market data subscription requested");
        let mut slot = self.market_stream_task.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let config = self.config.clone();
        *slot = Some(tokio::spawn(run_market_stream(config, symbols, tx)));
        Ok(())
    }

    async fn subscribe_order_updates(&self) -> Result<broadcast::Receiver<BrokerOrderUpdate>, BrokerError> {
        Ok(self.order_update_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_known_binance_statuses() {
        assert_eq!(translate_status("NEW"), OrderStatus::Pending);
        assert_eq!(translate_status("PARTIALLY_FILLED"), OrderStatus::PartiallyFilled);
        assert_eq!(translate_status("FILLED"), OrderStatus::Filled);
        assert_eq!(translate_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(translate_status("EXPIRED"), OrderStatus::Cancelled);
        assert_eq!(translate_status("REJECTED"), OrderStatus::Rejected);
    }

    #[test]
    fn classifies_insufficient_balance_as_permanent() {
        let err = classify_error(
            reqwest::StatusCode::BAD_REQUEST,
            "{\"code\":-2019,\"msg\":\"Margin is insufficient\"}",
        );
        assert_eq!(err.kind, BrokerErrorKind::InsufficientBalance);
        assert!(!err.retryable);
    }

    #[test]
    fn classifies_server_errors_as_transient() {
        let err = classify_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn signed_query_includes_signature_param() {
        let driver = BinanceFuturesDriver::new(BinanceConfig::testnet("key".into(), "secret".into()));
        let query = driver.signed_query(vec![("symbol".to_string(), "BTCUSDT".to_string())]);
        assert!(query.contains("signature="));
        assert!(query.contains("symbol=BTCUSDT"));
    }
}
