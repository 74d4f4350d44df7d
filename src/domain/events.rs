//! Domain events published onto the event bus. Topic names in doc comments
//! mirror the wire topics named in the external-interfaces section of the
//! specification this crate implements.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::{OrderSide, OrderType, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradingEvent {
    /// `trading.session.started`
    SessionStarted {
        session_id: Uuid,
        portfolio_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// `trading.session.stopped`
    SessionStopped {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// `trading.session.paused`
    SessionPaused {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// `trading.session.resumed`
    SessionResumed {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// `trading.session.unlocked`
    SessionUnlocked {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// `trading.order.placed`
    OrderPlaced {
        order_id: Uuid,
        broker_order_id: Option<String>,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        order_type: OrderType,
        timestamp: DateTime<Utc>,
    },
    /// `trading.order.cancelled`
    OrderCancelled {
        order_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// `trading.order.filled`
    OrderFilled {
        order_id: Uuid,
        symbol: Symbol,
        quantity: Decimal,
        fill_price: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// `trading.order.partially_filled`
    OrderPartiallyFilled {
        order_id: Uuid,
        symbol: Symbol,
        filled_qty: Decimal,
        remaining_qty: Decimal,
        fill_price: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// `trading.order.rejected`
    OrderRejected {
        order_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// `trading.order.fully_cancelled`
    OrderFullyCancelled {
        order_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// `trading.position.updated`
    PositionUpdated {
        symbol: Symbol,
        quantity: Decimal,
        mark_price: Decimal,
        unrealized_pnl: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// `trading.emergency_stop`, always severity `Critical`.
    EmergencyStop {
        reason: String,
        positions_closed: bool,
        severity: Severity,
        timestamp: DateTime<Utc>,
    },
    /// `risk.signal_rejected`
    RiskSignalRejected {
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Unit-variant mirror of [`TradingEvent`], used as the event bus's typed
/// subscription key (equivalent to keying on the event's enum discriminant,
/// without requiring a sample instance to subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    SessionStopped,
    SessionPaused,
    SessionResumed,
    SessionUnlocked,
    OrderPlaced,
    OrderCancelled,
    OrderFilled,
    OrderPartiallyFilled,
    OrderRejected,
    OrderFullyCancelled,
    PositionUpdated,
    EmergencyStop,
    RiskSignalRejected,
}

impl TradingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TradingEvent::SessionStarted { .. } => EventKind::SessionStarted,
            TradingEvent::SessionStopped { .. } => EventKind::SessionStopped,
            TradingEvent::SessionPaused { .. } => EventKind::SessionPaused,
            TradingEvent::SessionResumed { .. } => EventKind::SessionResumed,
            TradingEvent::SessionUnlocked { .. } => EventKind::SessionUnlocked,
            TradingEvent::OrderPlaced { .. } => EventKind::OrderPlaced,
            TradingEvent::OrderCancelled { .. } => EventKind::OrderCancelled,
            TradingEvent::OrderFilled { .. } => EventKind::OrderFilled,
            TradingEvent::OrderPartiallyFilled { .. } => EventKind::OrderPartiallyFilled,
            TradingEvent::OrderRejected { .. } => EventKind::OrderRejected,
            TradingEvent::OrderFullyCancelled { .. } => EventKind::OrderFullyCancelled,
            TradingEvent::PositionUpdated { .. } => EventKind::PositionUpdated,
            TradingEvent::EmergencyStop { .. } => EventKind::EmergencyStop,
            TradingEvent::RiskSignalRejected { .. } => EventKind::RiskSignalRejected,
        }
    }

    /// Stable topic string, used for logging and for the ring buffer's
    /// debug rendering.
    pub fn topic(&self) -> &'static str {
        match self {
            TradingEvent::SessionStarted { .. } => "trading.session.started",
            TradingEvent::SessionStopped { .. } => "trading.session.stopped",
            TradingEvent::SessionPaused { .. } => "trading.session.paused",
            TradingEvent::SessionResumed { .. } => "trading.session.resumed",
            TradingEvent::SessionUnlocked { .. } => "trading.session.unlocked",
            TradingEvent::OrderPlaced { .. } => "trading.order.placed",
            TradingEvent::OrderCancelled { .. } => "trading.order.cancelled",
            TradingEvent::OrderFilled { .. } => "trading.order.filled",
            TradingEvent::OrderPartiallyFilled { .. } => "trading.order.partially_filled",
            TradingEvent::OrderRejected { .. } => "trading.order.rejected",
            TradingEvent::OrderFullyCancelled { .. } => "trading.order.fully_cancelled",
            TradingEvent::PositionUpdated { .. } => "trading.position.updated",
            TradingEvent::EmergencyStop { .. } => "trading.emergency_stop",
            TradingEvent::RiskSignalRejected { .. } => "risk.signal_rejected",
        }
    }
}
