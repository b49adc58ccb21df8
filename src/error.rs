//! Error kinds
//!
//! Five error families, matching the propagation policy of the engine:
//! `FeedError` and `ConfigError` are fatal and bubble out of the
//! simulation with `?`; `PreTradeValidationError` and `OrderRuntimeError`
//! are recovered at the trade-API/order-processor boundary and surfaced as
//! data (`Result::Err` on a single order), never as a panic; `StrategyError`
//! is caught at each strategy callback and logged, and the run continues.

use crate::clock::Millis;
use thiserror::Error;

/// Malformed configuration discovered at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("base token {0:?} cannot also be a tradable token")]
    BaseTokenIsTradable(String),
    #[error("unknown symbol {0:?} referenced in feed or config")]
    UnknownSymbol(String),
    #[error("leverage {leverage} is not in the allowed set {allowed:?} for {segment}")]
    DisallowedLeverage {
        leverage: u32,
        allowed: Vec<u32>,
        segment: &'static str,
    },
    #[error("walletBalance must not be negative for token {token:?} (got {amount})")]
    NegativeWalletBalance { token: String, amount: f64 },
    #[error("simulationConfig field {field} is out of range: {detail}")]
    OutOfRange { field: &'static str, detail: String },
}

/// Failure to satisfy a pre-trade check (insufficient balance, segment
/// disabled, etc). Returned as data from the trade API, never thrown.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreTradeValidationError {
    #[error("cannot trade the base token {0:?} directly")]
    BaseTokenNotTradable(String),
    #[error("futures trading is disabled for this exchange")]
    FuturesDisabled,
    #[error("spot trading is disabled for this exchange")]
    SpotDisabled,
    #[error("leverage {leverage} is not in the allowed set {allowed:?}")]
    DisallowedLeverage { leverage: u32, allowed: Vec<u32> },
    #[error("insufficient available balance of {token}: need {required}, have {available}")]
    InsufficientBalance {
        token: String,
        required: f64,
        available: f64,
    },
    #[error("insufficient {token} holdings to sell {amount}: have {available}")]
    InsufficientHoldings {
        token: String,
        amount: f64,
        available: f64,
    },
    #[error("no position to close for {0:?}")]
    NoPosition(String),
    #[error("order amount must be positive (got {0})")]
    NonPositiveAmount(f64),
}

/// A runtime failure while advancing an already-accepted order.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderRuntimeError {
    #[error("no known price for {token:?} at t={at}")]
    NoPrice { token: String, at: Millis },
    #[error("order rejected by failure roll")]
    FailureRoll,
}

/// An error raised by strategy callback code. Caught at each boundary and
/// logged; the simulation continues with the next candle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("strategy error during {phase}: {message}")]
    Callback { phase: &'static str, message: String },
}

/// Malformed or out-of-order candle feed. Fatal - the simulation aborts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    #[error("candle at t={current} is out of order (previous was t={previous})")]
    OutOfOrder { previous: Millis, current: Millis },
    #[error("candle references unknown symbol {0:?}")]
    UnknownSymbol(String),
    #[error("malformed candle record: {0}")]
    Malformed(String),
}
