//! candlesim
//!
//! A deterministic event-driven trading-strategy backtester. Replays a
//! historical candle feed through a simulated exchange - order book,
//! price oracle, wallet/position accountant - and produces a trade
//! report and PnL summary for a user-supplied strategy.
//!
//! The engine is single-threaded and cooperative: one candle loop drives
//! everything, and all nondeterministic choices (slippage, fill jitter,
//! failure rolls) flow through seeded generators so that identical
//! `(feed, config, seed, strategy)` inputs reproduce byte-identical
//! output. See `scheduler::Scheduler` for the replay loop itself.

pub mod accountant;
pub mod clock;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod order_book;
pub mod order_processor;
pub mod position_monitor;
pub mod report;
pub mod rng;
pub mod scheduler;
pub mod trade_api;
pub mod types;

pub use error::{ConfigError, FeedError, OrderRuntimeError, PreTradeValidationError, StrategyError};
pub use scheduler::{Feed, Scheduler, SimulationResult, Strategy};
pub use trade_api::{TradeApi, TradeError, TradeOptions, TradeOutcome};
pub use types::{Candle, ExchangeConfig, SimulationConfig, TradingConfig};
