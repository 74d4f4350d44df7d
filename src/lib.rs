//! Live trading core: accepts trading signals, validates them against risk
//! limits, submits orders to a futures exchange, tracks open orders and
//! positions, reacts to asynchronous broker events, persists session state
//! for crash recovery, and supports an emergency halt that locks the session
//! until an operator unlocks it.

pub mod config;
pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::errors::CoreError;
