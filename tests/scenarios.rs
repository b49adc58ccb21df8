//! End-to-end scenario tests against the public `Scheduler`/`TradeApi`
//! surface, one per concrete scenario in the testable-properties section
//! of the design: slippage, a futures profit-target close, delayed-order
//! auto-cancel, stop-loss/profit-target tie-breaking, and gradual fills.

use async_trait::async_trait;
use candlesim::types::{ExchangeSettings, OrderFillStrategy, OrderType, TriggerConfig};
use candlesim::{Candle, FeedError, Scheduler, SimulationConfig, Strategy, StrategyError, TradeApi, TradeOptions, TradingConfig};
use std::collections::HashMap;

fn trading_config(base_token: &str, balance: f64, tokens: &[&str]) -> TradingConfig {
    let mut wallet = HashMap::new();
    wallet.insert(base_token.to_string(), balance);
    TradingConfig {
        base_token: base_token.to_string(),
        tradable_tokens: tokens.iter().map(|s| s.to_string()).collect(),
        wallet_balance: wallet,
        exchange_settings: ExchangeSettings::default(),
    }
}

fn candle(t: i64, symbol: &str, close: f64) -> Result<Candle, FeedError> {
    Ok(Candle {
        timestamp: t,
        symbol: symbol.to_string(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
    })
}

/// Runs a supplied closure against the `TradeApi` on the Nth (0-indexed)
/// candle it sees; a no-op on every other tick.
struct OnTickStrategy<F: FnMut(&mut TradeApi<'_>) + Send> {
    target_tick: u32,
    tick: u32,
    action: F,
}

#[async_trait]
impl<F: FnMut(&mut TradeApi<'_>) + Send> Strategy for OnTickStrategy<F> {
    async fn initialize(&mut self, _config: &TradingConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn analyze(&mut self, _candle: &Candle, api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        if self.tick == self.target_tick {
            (self.action)(api);
        }
        self.tick += 1;
        Ok(())
    }

    async fn close_session(&mut self, _api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

#[tokio::test]
async fn slippage_on_buy_is_bounded_and_recorded() {
    let config = SimulationConfig {
        order_fill_strategy: OrderFillStrategy::Immediate,
        slippage_percentage: 0.01,
        price_volatility: 0.0,
        random_seed: Some(1),
        ..SimulationConfig::default()
    };
    let scheduler = Scheduler::new(trading_config("USDC", 10_000.0, &["BTC"]), config).unwrap();

    let mut strategy = OnTickStrategy {
        target_tick: 0,
        tick: 0,
        action: |api: &mut TradeApi<'_>| {
            api.buy("BTC", 1.0, TradeOptions { order_type: OrderType::Market, ..TradeOptions::default() })
                .unwrap();
        },
    };

    let feed = vec![candle(0, "BTC", 100.0)];
    let result = scheduler.run(feed.into_iter(), &mut strategy).await.unwrap();

    assert_eq!(result.trades.len(), 1);
    let row = &result.trades[0];
    assert!(row.execution_price >= 100.0 && row.execution_price <= 101.0, "{}", row.execution_price);
    assert!((row.base_after - (10_000.0 - row.execution_price)).abs() < 1e-6);
    assert!((row.token_after - 1.0).abs() < 1e-9);
    let expected_slippage = (row.execution_price - 100.0) / 100.0;
    assert!((row.slippage.unwrap() - expected_slippage).abs() < 1e-9);
}

#[tokio::test]
async fn futures_long_closes_on_profit_target() {
    let config = SimulationConfig {
        order_fill_strategy: OrderFillStrategy::Immediate,
        slippage_percentage: 0.0,
        price_volatility: 0.0,
        ..SimulationConfig::default()
    };
    let scheduler = Scheduler::new(trading_config("USDC", 1_000.0, &["BTC"]), config).unwrap();

    let mut strategy = OnTickStrategy {
        target_tick: 0,
        tick: 0,
        action: |api: &mut TradeApi<'_>| {
            api.buy(
                "BTC",
                1.0,
                TradeOptions {
                    order_type: OrderType::Market,
                    leverage: 5,
                    is_futures: true,
                    profit_target: Some(TriggerConfig::Percentage(10.0)),
                    ..TradeOptions::default()
                },
            )
            .unwrap();
        },
    };

    let feed = vec![candle(0, "BTC", 100.0), candle(60_000, "BTC", 105.0), candle(120_000, "BTC", 112.0)];
    let result = scheduler.run(feed.into_iter(), &mut strategy).await.unwrap();

    assert_eq!(result.trades.len(), 2, "open + triggered close");
    let open = &result.trades[0];
    assert!((open.capital_used - 20.0).abs() < 1e-6, "margin = amount*price/leverage = 1*100/5");

    let close = &result.trades[1];
    assert!(close.realized_pnl.unwrap() > 0.0, "profit target closes in the black");
    assert!((close.base_after - 1_012.0).abs() < 1.0, "{}", close.base_after);
}

#[tokio::test]
async fn delayed_order_auto_cancels_and_releases_commitment() {
    let config = SimulationConfig {
        order_fill_strategy: OrderFillStrategy::Delayed,
        fill_delay_ms: Some(10_000),
        cancellation_after_ms: Some(5_000),
        ..SimulationConfig::default()
    };
    let scheduler = Scheduler::new(trading_config("USDC", 10_000.0, &["BTC"]), config).unwrap();

    let mut strategy = OnTickStrategy {
        target_tick: 0,
        tick: 0,
        action: |api: &mut TradeApi<'_>| {
            api.buy("BTC", 1.0, TradeOptions { order_type: OrderType::Market, ..TradeOptions::default() })
                .unwrap();
        },
    };

    let feed = vec![candle(0, "BTC", 100.0), candle(6_000, "BTC", 100.0)];
    let result = scheduler.run(feed.into_iter(), &mut strategy).await.unwrap();

    assert!(result.trades.is_empty(), "order never filled before cancellation");
    assert!((result.final_value - 10_000.0).abs() < 1e-6, "commitment fully released on cancel");
}

#[tokio::test]
async fn stop_loss_takes_precedence_over_profit_target_tie() {
    let config = SimulationConfig {
        order_fill_strategy: OrderFillStrategy::Immediate,
        slippage_percentage: 0.0,
        price_volatility: 0.0,
        ..SimulationConfig::default()
    };
    let scheduler = Scheduler::new(trading_config("USDC", 1_000.0, &["BTC"]), config).unwrap();

    let mut strategy = OnTickStrategy {
        target_tick: 0,
        tick: 0,
        action: |api: &mut TradeApi<'_>| {
            api.buy(
                "BTC",
                1.0,
                TradeOptions {
                    order_type: OrderType::Market,
                    leverage: 1,
                    is_futures: true,
                    stop_loss: Some(TriggerConfig::Percentage(5.0)),
                    profit_target: Some(TriggerConfig::Percentage(5.0)),
                    ..TradeOptions::default()
                },
            )
            .unwrap();
        },
    };

    let feed = vec![candle(0, "BTC", 100.0), candle(60_000, "BTC", 95.0)];
    let result = scheduler.run(feed.into_iter(), &mut strategy).await.unwrap();

    assert_eq!(result.trades.len(), 2, "open + exactly one trigger close");
    let close = &result.trades[1];
    assert!(close.realized_pnl.unwrap() < 0.0, "stop-loss close is a loss");
}

#[tokio::test]
async fn gradual_fill_sums_to_requested_amount() {
    let config = SimulationConfig {
        order_fill_strategy: OrderFillStrategy::Gradual,
        partial_fill_percentage: Some(0.3),
        gradual_fill_interval_ms: Some(1_000),
        slippage_percentage: 0.0,
        price_volatility: 0.0,
        ..SimulationConfig::default()
    };
    let scheduler = Scheduler::new(trading_config("USDC", 10_000.0, &["BTC"]), config).unwrap();

    let mut strategy = OnTickStrategy {
        target_tick: 0,
        tick: 0,
        action: |api: &mut TradeApi<'_>| {
            api.buy("BTC", 10.0, TradeOptions { order_type: OrderType::Market, ..TradeOptions::default() })
                .unwrap();
        },
    };

    let feed: Vec<_> = (0..=6).map(|i| candle(i * 1_000, "BTC", 100.0)).collect();
    let result = scheduler.run(feed.into_iter(), &mut strategy).await.unwrap();

    // Remaining shrinks geometrically by (1 - 0.3) each of the 6 post-open
    // ticks: 10 * 0.3, 7 * 0.3, 4.9 * 0.3, ... Each tick's delta is the
    // expected fill of `remainingAmount * partialFillPercentage` from §4.3.
    let expected_deltas = [3.0, 2.1, 1.47, 1.029, 0.7203, 0.50421];
    assert_eq!(result.trades.len(), expected_deltas.len());
    for (row, expected) in result.trades.iter().zip(expected_deltas.iter()) {
        assert!((row.filled_amount - expected).abs() < 1e-6, "{} vs {}", row.filled_amount, expected);
    }

    let total_filled: f64 = result.trades.iter().map(|t| t.filled_amount).sum();
    let expected_total: f64 = expected_deltas.iter().sum();
    assert!((total_filled - expected_total).abs() < 1e-6);
    assert!(total_filled < 10.0, "order has not yet fully filled within the observed ticks");
    assert!((result.trades.last().unwrap().token_after - total_filled).abs() < 1e-6);
}

#[tokio::test]
async fn empty_feed_returns_unchanged_value_and_no_trades() {
    let config = SimulationConfig::default();
    let scheduler = Scheduler::new(trading_config("USDC", 5_000.0, &["BTC"]), config).unwrap();
    let mut strategy = OnTickStrategy {
        target_tick: 0,
        tick: 0,
        action: |_api: &mut TradeApi<'_>| {},
    };
    let feed: Vec<Result<Candle, FeedError>> = Vec::new();
    let result = scheduler.run(feed.into_iter(), &mut strategy).await.unwrap();

    assert!(result.trades.is_empty());
    assert!((result.initial_value - result.final_value).abs() < 1e-9);
}
