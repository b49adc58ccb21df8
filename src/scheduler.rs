//! Replay Scheduler
//!
//! Owns every engine component and drives the single-threaded cooperative
//! candle loop: advance clock, update oracle, advance orders, check
//! position triggers, invoke the strategy, repeat. Deterministic given
//! `(feed, config, seed, strategy)`.

use crate::accountant::Accountant;
use crate::clock::{Clock, Millis};
use crate::error::{ConfigError, FeedError, StrategyError};
use crate::oracle::Oracle;
use crate::order_book::OrderBook;
use crate::order_processor::OrderProcessor;
use crate::position_monitor::PositionMonitor;
use crate::report::{ReportBuilder, Summary, TradeRecord};
use crate::trade_api::{TradeApi, TradeOptions};
use crate::types::{Candle, OrderAction, SimulationConfig, TradingConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// The capability set a backtested strategy must implement. Callbacks are
/// `async` so strategy code may `.await` an external adapter (e.g. an LLM
/// call) between engine steps; the engine itself never awaits anything but
/// the strategy.
#[async_trait]
pub trait Strategy: Send {
    async fn initialize(&mut self, config: &TradingConfig) -> Result<(), StrategyError>;
    async fn analyze(&mut self, candle: &Candle, api: &mut TradeApi<'_>) -> Result<(), StrategyError>;
    async fn close_session(&mut self, api: &mut TradeApi<'_>) -> Result<(), StrategyError>;
}

/// A lazy, non-decreasing-by-timestamp sequence of candles. Multiple
/// symbols may interleave.
pub trait Feed: Iterator<Item = Result<Candle, FeedError>> {}
impl<T: Iterator<Item = Result<Candle, FeedError>>> Feed for T {}

/// `{initialValue, finalValue, pnl, pnlPercentage, baseToken, trades, report}`.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub initial_value: f64,
    pub final_value: f64,
    pub pnl: f64,
    pub pnl_percentage: f64,
    pub base_token: String,
    pub trades: Vec<TradeRecord>,
    pub summary: Summary,
    pub report: String,
}

pub struct Scheduler {
    clock: Clock,
    trading_config: TradingConfig,
    simulation_config: SimulationConfig,
    book: OrderBook,
    accountant: Accountant,
    oracle: Oracle,
    processor: OrderProcessor,
    monitor: PositionMonitor,
    report: ReportBuilder,
}

impl Scheduler {
    /// Validate both config documents and build the engine. The only
    /// fallible step outside the replay loop itself.
    pub fn new(trading_config: TradingConfig, simulation_config: SimulationConfig) -> Result<Self, ConfigError> {
        trading_config.validate()?;
        simulation_config.validate()?;

        let initial_portfolio_value = *trading_config
            .wallet_balance
            .get(&trading_config.base_token)
            .unwrap_or(&0.0);

        let seed = simulation_config.random_seed.unwrap_or(42);
        let accountant = Accountant::new(
            trading_config.base_token.clone(),
            trading_config.wallet_balance.clone(),
            trading_config.exchange_settings.clone(),
        );

        Ok(Self {
            clock: Clock::new(0),
            oracle: Oracle::new(simulation_config.price_volatility, seed),
            processor: OrderProcessor::new(seed.wrapping_add(1)),
            monitor: PositionMonitor::new(),
            report: ReportBuilder::new(initial_portfolio_value),
            book: OrderBook::new(),
            accountant,
            trading_config,
            simulation_config,
        })
    }

    /// Run the replay loop to completion. `feed` errors (malformed or
    /// out-of-order candles) are fatal and propagate immediately;
    /// `StrategyError`s are caught at each callback boundary, logged, and
    /// the simulation continues.
    pub async fn run(
        mut self,
        feed: impl Feed,
        strategy: &mut dyn Strategy,
    ) -> Result<SimulationResult, FeedError> {
        if let Err(err) = strategy.initialize(&self.trading_config).await {
            error!(error = %err, phase = "initialize", "strategy callback failed");
        }

        for candle in feed {
            let candle = candle?;
            self.advance(candle, strategy).await?;
        }

        let mut api = self.trade_api();
        if let Err(err) = strategy.close_session(&mut api).await {
            error!(error = %err, phase = "close_session", "strategy callback failed");
        }

        self.processor.tick(
            self.clock.now(),
            &self.simulation_config,
            &mut self.book,
            &mut self.oracle,
            &mut self.accountant,
            &mut self.report,
        );

        let last_prices = self.last_known_prices();
        self.accountant.liquidate_all(&last_prices);

        Ok(self.finish())
    }

    async fn advance(&mut self, candle: Candle, strategy: &mut dyn Strategy) -> Result<(), FeedError> {
        if candle.timestamp < self.clock.now() {
            return Err(FeedError::OutOfOrder {
                previous: self.clock.now(),
                current: candle.timestamp,
            });
        }
        if !self.trading_config.tradable_tokens.contains(&candle.symbol) {
            return Err(FeedError::UnknownSymbol(candle.symbol));
        }

        self.clock.advance_to(candle.timestamp);
        self.oracle.update(&candle.symbol, candle.close, candle.timestamp);

        self.processor.tick(
            self.clock.now(),
            &self.simulation_config,
            &mut self.book,
            &mut self.oracle,
            &mut self.accountant,
            &mut self.report,
        );

        self.apply_trigger_closes();

        let mut api = self.trade_api();
        if let Err(err) = strategy.analyze(&candle, &mut api).await {
            warn!(error = %err, phase = "analyze", timestamp = candle.timestamp, "strategy callback failed");
        }

        Ok(())
    }

    /// Run the position monitor and close any position whose stop-loss or
    /// profit-target fired this tick, via the same trade API path a
    /// strategy would use, so the report gets the same record shape.
    fn apply_trigger_closes(&mut self) {
        let events = self
            .monitor
            .tick(self.clock.now(), &mut self.oracle, &self.accountant);
        for event in events {
            let mut api = self.trade_api();
            let opts = TradeOptions {
                leverage: event.leverage,
                is_futures: true,
                ..TradeOptions::default()
            };
            let result = match event.close_action {
                OrderAction::Buy => api.buy(&event.token, event.close_amount, opts),
                OrderAction::Sell => api.sell(&event.token, event.close_amount, opts),
            };
            if let Err(err) = result {
                warn!(token = %event.token, error = %err, "position-trigger close failed");
            } else {
                info!(
                    token = %event.token,
                    stop_loss = event.stop_loss,
                    profit_target = event.profit_target,
                    "position closed by trigger"
                );
            }
        }
    }

    fn trade_api(&mut self) -> TradeApi<'_> {
        TradeApi {
            book: &mut self.book,
            accountant: &mut self.accountant,
            oracle: &mut self.oracle,
            clock: &self.clock,
            config: &self.simulation_config,
            processor: &mut self.processor,
            report: &mut self.report,
        }
    }

    fn last_known_prices(&self) -> HashMap<String, f64> {
        self.trading_config
            .tradable_tokens
            .iter()
            .filter_map(|token| self.oracle.last_known(token).map(|p| (token.clone(), p)))
            .collect()
    }

    fn finish(self) -> SimulationResult {
        let initial_value = self.report.initial_portfolio_value();
        let final_value = self.accountant.wallet_amount(&self.trading_config.base_token);
        let pnl = final_value - initial_value;
        let pnl_percentage = if initial_value.abs() > f64::EPSILON {
            pnl / initial_value * 100.0
        } else {
            0.0
        };
        let summary = self.report.summary();
        let report_markdown = self.report.render_markdown();
        SimulationResult {
            initial_value,
            final_value,
            pnl,
            pnl_percentage,
            base_token: self.trading_config.base_token,
            trades: self.report.rows().to_vec(),
            summary,
            report: report_markdown,
        }
    }
}
