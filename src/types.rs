//! Shared data model
//!
//! Candle, tagged-union order/trigger/fill-strategy types, and the
//! configuration documents consumed at startup. Enums replace the source
//! system's string discriminants so the compiler guarantees exhaustive
//! handling at every match site.

use crate::clock::Millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical zero-test tolerance for all floating-point money comparisons.
pub const EPSILON: f64 = 1e-7;

/// One OHLCV bar. Immutable, produced by the feed, consumed once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: Millis,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            OrderAction::Buy => OrderAction::Sell,
            OrderAction::Sell => OrderAction::Buy,
        }
    }
}

/// Market or limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Spot (outright ownership) or futures (cross-margined, leveraged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Spot,
    Futures,
}

impl Segment {
    pub fn label(self) -> &'static str {
        match self {
            Segment::Spot => "spot",
            Segment::Futures => "futures",
        }
    }
}

/// Order lifecycle state. See `order_book::SimulatedOrder` for the
/// transition functions that produce these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal states are immutable once reached.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Active states are advanced by the order processor each tick.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::Partial
        )
    }
}

/// Stop-loss / profit-target configuration, interpreted relative to a
/// position's entry price and the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TriggerConfig {
    /// Percentage distance from entry price (e.g. `10.0` = 10%).
    Percentage(f64),
    /// Absolute price level.
    Price(f64),
}

/// Policy governing when an accepted order transitions to filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderFillStrategy {
    Immediate,
    Delayed,
    Gradual,
    Never,
}

/// Exchange-side capability flags and allowed leverage tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub spot_enabled: bool,
    pub futures_enabled: bool,
    pub spot_leverage_options: Vec<u32>,
    pub futures_leverage_options: Vec<u32>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            spot_enabled: true,
            futures_enabled: true,
            spot_leverage_options: vec![1],
            futures_leverage_options: vec![1, 2, 3, 5, 10],
        }
    }
}

/// `tradingConfig`: the accounting-side setup consumed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    pub base_token: String,
    pub tradable_tokens: Vec<String>,
    pub wallet_balance: HashMap<String, f64>,
    pub exchange_settings: ExchangeSettings,
}

impl TradingConfig {
    /// Validate the document per §7's `ConfigError` family.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        if self.tradable_tokens.iter().any(|t| t == &self.base_token) {
            return Err(ConfigError::BaseTokenIsTradable(self.base_token.clone()));
        }
        for (token, amount) in &self.wallet_balance {
            if *amount < 0.0 {
                return Err(ConfigError::NegativeWalletBalance {
                    token: token.clone(),
                    amount: *amount,
                });
            }
        }
        Ok(())
    }
}

/// `simulationConfig`: fields governing the simulated exchange's behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub order_fill_strategy: OrderFillStrategy,
    pub fill_delay_ms: Option<Millis>,
    pub partial_fill_percentage: Option<f64>,
    pub gradual_fill_interval_ms: Option<Millis>,
    pub order_failure_rate: f64,
    pub cancellation_after_ms: Option<Millis>,
    pub slippage_percentage: f64,
    pub price_volatility: f64,
    pub market_orders_always_succeed: bool,
    pub limit_order_fill_probability: f64,
    pub random_seed: Option<u64>,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        let in_unit = |field: &'static str, v: f64| -> Result<(), ConfigError> {
            if !(0.0..=1.0).contains(&v) {
                Err(ConfigError::OutOfRange {
                    field,
                    detail: format!("{v} not in [0,1]"),
                })
            } else {
                Ok(())
            }
        };
        in_unit("orderFailureRate", self.order_failure_rate)?;
        in_unit("slippagePercentage", self.slippage_percentage)?;
        in_unit("priceVolatility", self.price_volatility)?;
        in_unit(
            "limitOrderFillProbability",
            self.limit_order_fill_probability,
        )?;
        if let Some(p) = self.partial_fill_percentage {
            if !(0.0 < p && p <= 1.0) {
                return Err(ConfigError::OutOfRange {
                    field: "partialFillPercentage",
                    detail: format!("{p} not in (0,1]"),
                });
            }
        }
        if self.order_fill_strategy == OrderFillStrategy::Gradual
            && (self.partial_fill_percentage.is_none() || self.gradual_fill_interval_ms.is_none())
        {
            return Err(ConfigError::OutOfRange {
                field: "orderFillStrategy",
                detail: "gradual strategy requires partialFillPercentage and gradualFillIntervalMs"
                    .to_string(),
            });
        }
        if self.order_fill_strategy == OrderFillStrategy::Delayed && self.fill_delay_ms.is_none() {
            return Err(ConfigError::OutOfRange {
                field: "orderFillStrategy",
                detail: "delayed strategy requires fillDelayMs".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            order_fill_strategy: OrderFillStrategy::Immediate,
            fill_delay_ms: None,
            partial_fill_percentage: None,
            gradual_fill_interval_ms: None,
            order_failure_rate: 0.0,
            cancellation_after_ms: None,
            slippage_percentage: 0.0,
            price_volatility: 0.0,
            market_orders_always_succeed: true,
            limit_order_fill_probability: 1.0,
            random_seed: None,
        }
    }
}

/// `exchangeConfig`: consumed only by the external feed adapter. Carried
/// here as an opaque, serde-round-trippable record since the engine itself
/// never reads it - the replay scheduler receives an already-materialized
/// feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub exchange_id: String,
    pub exchange_type: String,
    pub symbol: String,
    pub time_from: Millis,
    pub time_to: Millis,
    pub interval_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_base_token_as_tradable() {
        let cfg = TradingConfig {
            base_token: "USDC".to_string(),
            tradable_tokens: vec!["USDC".to_string()],
            wallet_balance: HashMap::new(),
            exchange_settings: ExchangeSettings::default(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_probabilities() {
        let mut cfg = SimulationConfig::default();
        cfg.order_failure_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gradual_strategy_requires_params() {
        let mut cfg = SimulationConfig::default();
        cfg.order_fill_strategy = OrderFillStrategy::Gradual;
        assert!(cfg.validate().is_err());
        cfg.partial_fill_percentage = Some(0.3);
        cfg.gradual_fill_interval_ms = Some(1000);
        assert!(cfg.validate().is_ok());
    }
}
