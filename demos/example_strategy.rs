//! Example Strategy Demo
//!
//! A minimal moving-average crossover strategy exercising the full
//! `Strategy` callback set against the spot segment. Demonstrates how a
//! strategy is wired to the replay loop: it never touches the engine
//! directly, only the `TradeApi` handle passed into each callback.
//!
//! Run with:
//!   cargo run --example example_strategy

use async_trait::async_trait;
use candlesim::{
    Candle, Scheduler, SimulationConfig, SimulationResult, Strategy, StrategyError, TradeApi,
    TradeOptions, TradingConfig,
};
use std::collections::{HashMap, VecDeque};

/// Buys when the close crosses above a short moving average and sells the
/// full spot position when it crosses back below.
struct MovingAverageCrossStrategy {
    token: String,
    window: usize,
    closes: VecDeque<f64>,
    held_amount: f64,
}

impl MovingAverageCrossStrategy {
    fn new(token: impl Into<String>, window: usize) -> Self {
        Self {
            token: token.into(),
            window,
            closes: VecDeque::with_capacity(window),
            held_amount: 0.0,
        }
    }

    fn moving_average(&self) -> Option<f64> {
        if self.closes.len() < self.window {
            return None;
        }
        Some(self.closes.iter().sum::<f64>() / self.closes.len() as f64)
    }
}

#[async_trait]
impl Strategy for MovingAverageCrossStrategy {
    async fn initialize(&mut self, _config: &TradingConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn analyze(&mut self, candle: &Candle, api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        if candle.symbol != self.token {
            return Ok(());
        }
        if self.closes.len() == self.window {
            self.closes.pop_front();
        }
        self.closes.push_back(candle.close);

        let Some(avg) = self.moving_average() else {
            return Ok(());
        };

        if self.held_amount <= 0.0 && candle.close > avg {
            let balance = api.get_available_balance("USDC");
            let price = candle.close.max(1e-9);
            let size = (balance * 0.5 / price).max(0.0);
            if size > 0.0 {
                let outcome = api.buy(&self.token, size, TradeOptions::default());
                if outcome.is_ok() {
                    self.held_amount = size;
                }
            }
        } else if self.held_amount > 0.0 && candle.close < avg {
            // Spot holdings aren't tracked as a `Position` (those are
            // futures-only per the data model), so sell the tracked size
            // directly rather than going through `close_position`.
            if api.sell(&self.token, self.held_amount, TradeOptions::default()).is_ok() {
                self.held_amount = 0.0;
            }
        }

        Ok(())
    }

    async fn close_session(&mut self, api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        if self.held_amount > 0.0 {
            let _ = api.sell(&self.token, self.held_amount, TradeOptions::default());
            self.held_amount = 0.0;
        }
        Ok(())
    }
}

fn synthetic_feed(token: &str) -> Vec<Candle> {
    let prices = [
        100.0, 101.0, 103.0, 106.0, 104.0, 102.0, 98.0, 95.0, 97.0, 101.0, 105.0, 109.0,
    ];
    prices
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            timestamp: (i as i64) * 60_000,
            symbol: token.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        })
        .collect()
}

#[tokio::main]
async fn main() {
    candlesim::logging::init_tracing();

    let token = "BTC";
    let trading_config = TradingConfig {
        base_token: "USDC".to_string(),
        tradable_tokens: vec![token.to_string()],
        wallet_balance: HashMap::from([("USDC".to_string(), 10_000.0)]),
        exchange_settings: Default::default(),
    };
    let simulation_config = SimulationConfig::default();

    let scheduler = Scheduler::new(trading_config, simulation_config).expect("valid config");
    let feed = synthetic_feed(token).into_iter().map(Ok);
    let mut strategy = MovingAverageCrossStrategy::new(token, 3);

    let SimulationResult {
        initial_value,
        final_value,
        pnl,
        pnl_percentage,
        trades,
        report,
        ..
    } = scheduler.run(feed, &mut strategy).await.expect("feed is well-formed");

    println!("initial value: {initial_value:.2}");
    println!("final value:   {final_value:.2}");
    println!("pnl:           {pnl:.2} ({pnl_percentage:.2}%)");
    println!("trades:        {}", trades.len());
    println!();
    println!("{report}");
}
