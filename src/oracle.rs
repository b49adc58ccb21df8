//! Price Oracle
//!
//! Owns the latest price and price history per symbol, applies seeded
//! volatility perturbation and stochastic slippage. One RNG instance lives
//! here; other components needing nondeterministic choices (failure rolls,
//! gradual-fill jitter) own separate seeded instances so call order in one
//! component never perturbs another's sequence.

use crate::clock::Millis;
use crate::rng::Lcg;
use crate::types::OrderAction;
use std::collections::HashMap;

/// Half the bid/ask spread applied around the oracle's mid price.
const BID_ASK_EPSILON: f64 = 0.0005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: Millis,
}

/// Bid/ask quote derived from the latest price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
}

pub struct Oracle {
    latest: HashMap<String, PricePoint>,
    history: HashMap<String, Vec<PricePoint>>,
    volatility: f64,
    rng: Lcg,
}

impl Oracle {
    pub fn new(volatility: f64, seed: u64) -> Self {
        Self {
            latest: HashMap::new(),
            history: HashMap::new(),
            volatility,
            rng: Lcg::new(seed),
        }
    }

    /// Record a new observed price for `symbol` at `timestamp`.
    pub fn update(&mut self, symbol: &str, price: f64, timestamp: Millis) {
        let point = PricePoint { price, timestamp };
        self.latest.insert(symbol.to_string(), point);
        self.history
            .entry(symbol.to_string())
            .or_default()
            .push(point);
    }

    /// Volatility-perturbed current quote. `None` if the symbol is unknown.
    ///
    /// Each call draws from the shared seeded RNG, so consecutive reads of
    /// the same symbol generally return *different* prices when
    /// `price_volatility > 0` - this is intentional (spec §9 open question)
    /// and strategies must not assume idempotence across reads.
    pub fn current_price(&mut self, symbol: &str) -> Option<Quote> {
        let base = self.latest.get(symbol)?.price;
        let price = self.perturb(base);
        Some(Quote {
            price,
            bid: price * (1.0 - BID_ASK_EPSILON),
            ask: price * (1.0 + BID_ASK_EPSILON),
        })
    }

    /// Execution price for a fill of `action` with stochastic `slippage`
    /// in `[0, slippage]`. `None` if there is no latest price for `symbol`.
    pub fn execution_price(&mut self, symbol: &str, action: OrderAction, slippage: f64) -> Option<f64> {
        let base = self.perturb(self.latest.get(symbol)?.price);
        if slippage <= 0.0 {
            return Some(base);
        }
        let roll = self.rng.next_f64();
        Some(match action {
            OrderAction::Buy => base * (1.0 + roll * slippage),
            OrderAction::Sell => base / (1.0 + roll * slippage),
        })
    }

    /// Last known price at or before `t`, via binary search over history.
    pub fn historical_at(&self, symbol: &str, t: Millis) -> Option<f64> {
        let points = self.history.get(symbol)?;
        if points.is_empty() {
            return None;
        }
        match points.binary_search_by_key(&t, |p| p.timestamp) {
            Ok(idx) => Some(points[idx].price),
            Err(0) => None,
            Err(idx) => Some(points[idx - 1].price),
        }
    }

    /// Last recorded price for `symbol` with no perturbation, used for
    /// end-of-session liquidation where a stable reference is required.
    pub fn last_known(&self, symbol: &str) -> Option<f64> {
        self.latest.get(symbol).map(|p| p.price)
    }

    fn perturb(&mut self, base: f64) -> f64 {
        if self.volatility <= 0.0 {
            return base;
        }
        let noise = self.rng.next_signed();
        base + base * noise * self.volatility
    }
}
