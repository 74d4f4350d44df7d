//! Error taxonomy for the trading core. Each variant maps onto one of the
//! categories the control surface exposes: validation, domain invariant,
//! risk-blocked, conflict, broker transient/permanent, and internal.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::types::Symbol;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("invalid transition: order in state {from} cannot handle event {event}")]
    InvalidTransition { from: String, event: &'static str },

    #[error("fill quantity {fill_qty} would exceed order quantity {order_qty}")]
    OverFill {
        fill_qty: Decimal,
        order_qty: Decimal,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortfolioError {
    #[error("insufficient funds: requested {requested} but only {available} available")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid release amount: requested {requested} but only {reserved} reserved")]
    InvalidAmount {
        requested: Decimal,
        reserved: Decimal,
    },

    #[error("no reservation found for order {order_id}")]
    UnknownReservation { order_id: uuid::Uuid },
}

/// `{kind, message, retryable}` as named in the spec's broker error design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerErrorKind {
    InsufficientBalance,
    SymbolNotTradable,
    OrderNotFound,
    Timeout,
    Generic,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("broker error ({kind:?}): {message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl BrokerError {
    pub fn permanent(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Generic,
            message: message.into(),
            retryable: true,
        }
    }
}

/// Top-level error surfaced to callers of the control surface (§6, §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("domain invariant violated: {0}")]
    Domain(#[from] OrderError),

    #[error("portfolio invariant violated: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("risk blocked: {reason}")]
    RiskBlocked { reason: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("not found: {what} {id}")]
    NotFound { what: &'static str, id: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl CoreError {
    pub fn conflict(reason: impl Into<String>) -> Self {
        CoreError::Conflict {
            reason: reason.into(),
        }
    }

    pub fn risk_blocked(reason: impl Into<String>) -> Self {
        CoreError::RiskBlocked {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        CoreError::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found_symbol(symbol: &Symbol) -> Self {
        CoreError::NotFound {
            what: "symbol",
            id: symbol.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_error_message_includes_kind_and_message() {
        let err = BrokerError::permanent(BrokerErrorKind::InsufficientBalance, "not enough margin");
        assert!(err.to_string().contains("InsufficientBalance"));
        assert!(err.to_string().contains("not enough margin"));
        assert!(!err.retryable);
    }

    #[test]
    fn order_error_display() {
        let err = OrderError::InvalidTransition {
            from: "Filled".into(),
            event: "cancel",
        };
        assert_eq!(
            err.to_string(),
            "invalid transition: order in state Filled cannot handle event cancel"
        );
    }

    #[test]
    fn core_error_wraps_broker_error_transparently() {
        let broker = BrokerError::transient("timed out");
        let core: CoreError = broker.into();
        assert!(core.to_string().contains("timed out"));
    }
}
