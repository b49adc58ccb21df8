//! Determinism: two runs with identical `(feed, config, seed, strategy)`
//! produce bit-identical trade lists and PnL. This is the primary stress
//! test of the whole engine (spec §5/§8) - every nondeterministic choice
//! must flow through a seeded generator, never wall time.

use async_trait::async_trait;
use candlesim::types::{ExchangeSettings, OrderFillStrategy, OrderType};
use candlesim::{Candle, FeedError, Scheduler, SimulationConfig, Strategy, StrategyError, TradeApi, TradeOptions, TradingConfig};
use std::collections::HashMap;

struct NoisyStrategy {
    token: String,
    tick: u32,
}

#[async_trait]
impl Strategy for NoisyStrategy {
    async fn initialize(&mut self, _config: &TradingConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn analyze(&mut self, _candle: &Candle, api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        self.tick += 1;
        // Trades on alternating ticks so fills land under slippage and
        // failure-roll randomness, exercising both seeded generators.
        if self.tick % 2 == 1 {
            let _ = api.buy(
                &self.token,
                1.0,
                TradeOptions { order_type: OrderType::Market, ..TradeOptions::default() },
            );
        } else {
            let _ = api.sell(
                &self.token,
                1.0,
                TradeOptions { order_type: OrderType::Market, ..TradeOptions::default() },
            );
        }
        Ok(())
    }

    async fn close_session(&mut self, _api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

fn trading_config() -> TradingConfig {
    let mut wallet = HashMap::new();
    wallet.insert("USDC".to_string(), 10_000.0);
    TradingConfig {
        base_token: "USDC".to_string(),
        tradable_tokens: vec!["BTC".to_string()],
        wallet_balance: wallet,
        exchange_settings: ExchangeSettings::default(),
    }
}

fn noisy_config(seed: u64) -> SimulationConfig {
    SimulationConfig {
        order_fill_strategy: OrderFillStrategy::Immediate,
        slippage_percentage: 0.02,
        price_volatility: 0.05,
        order_failure_rate: 0.1,
        market_orders_always_succeed: false,
        random_seed: Some(seed),
        ..SimulationConfig::default()
    }
}

fn feed() -> Vec<Result<Candle, FeedError>> {
    (0..30)
        .map(|i| {
            let close = 100.0 + (i as f64 * 1.7).sin() * 5.0;
            Ok(Candle {
                timestamp: i * 60_000,
                symbol: "BTC".to_string(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
        })
        .collect()
}

async fn run_once(seed: u64) -> candlesim::SimulationResult {
    let scheduler = Scheduler::new(trading_config(), noisy_config(seed)).unwrap();
    let mut strategy = NoisyStrategy { token: "BTC".to_string(), tick: 0 };
    scheduler.run(feed().into_iter(), &mut strategy).await.unwrap()
}

#[tokio::test]
async fn identical_seed_produces_identical_results() {
    let a = run_once(7).await;
    let b = run_once(7).await;

    assert_eq!(a.trades.len(), b.trades.len());
    for (ra, rb) in a.trades.iter().zip(b.trades.iter()) {
        assert_eq!(ra.timestamp, rb.timestamp);
        assert_eq!(ra.action, rb.action);
        assert!((ra.execution_price - rb.execution_price).abs() < 1e-12);
        assert!((ra.filled_amount - rb.filled_amount).abs() < 1e-12);
        assert_eq!(ra.slippage.is_some(), rb.slippage.is_some());
    }
    assert!((a.pnl - b.pnl).abs() < 1e-12);
    assert!((a.final_value - b.final_value).abs() < 1e-12);
}

#[tokio::test]
async fn different_seeds_can_diverge() {
    let a = run_once(1).await;
    let b = run_once(2).await;

    // Not a hard correctness requirement, but the point of seeding: two
    // different seeds should not be forced into lockstep. If this ever
    // starts failing because the engine genuinely converges for this
    // feed/config pair, pick noisier parameters rather than deleting it.
    let same_prices = a
        .trades
        .iter()
        .zip(b.trades.iter())
        .all(|(ra, rb)| (ra.execution_price - rb.execution_price).abs() < 1e-12);
    assert!(!same_prices || a.trades.is_empty(), "different seeds produced identical execution prices");
}
