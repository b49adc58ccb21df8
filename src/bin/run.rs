//! candlesim-run - CLI demo driver
//!
//! Reads a JSON config document (`{tradingConfig, simulationConfig}`) and a
//! CSV candle file, replays them through the engine with a small built-in
//! strategy, and prints the trade report.
//!
//! # Usage
//!
//! ```bash
//! candlesim-run \
//!   --config config.json \
//!   --candles candles.csv \
//!   --strategy buy-and-hold \
//!   --token BTC \
//!   --output trades.json
//! ```
//!
//! # Exit Codes
//!
//! - 0: success
//! - 1: configuration, feed, or I/O error

use anyhow::{Context, Result};
use async_trait::async_trait;
use candlesim::{Candle, FeedError, Scheduler, SimulationConfig, Strategy, StrategyError, TradeApi, TradeOptions, TradingConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "candlesim-run", about = "Replay a candle feed through the deterministic backtester")]
struct Args {
    /// Path to a JSON document with `tradingConfig` and `simulationConfig`.
    #[arg(long)]
    config: PathBuf,

    /// Path to a CSV candle file with header
    /// `timestamp,symbol,open,high,low,close,volume`.
    #[arg(long)]
    candles: PathBuf,

    /// Built-in strategy: `noop` or `buy-and-hold`.
    #[arg(long, default_value = "buy-and-hold")]
    strategy: String,

    /// Symbol the built-in strategy trades.
    #[arg(long)]
    token: String,

    /// Optional path to write the trade log as JSON.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override `simulationConfig.randomSeed`.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    trading_config: TradingConfig,
    simulation_config: SimulationConfig,
}

#[derive(Debug, Serialize)]
struct OutputDocument {
    initial_value: f64,
    final_value: f64,
    pnl: f64,
    pnl_percentage: f64,
    base_token: String,
    trades: Vec<candlesim::report::TradeRecord>,
}

/// Never trades. Used for smoke-testing a feed/config pair.
struct NoOpStrategy;

#[async_trait]
impl Strategy for NoOpStrategy {
    async fn initialize(&mut self, _config: &TradingConfig) -> Result<(), StrategyError> {
        Ok(())
    }
    async fn analyze(&mut self, _candle: &Candle, _api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
    async fn close_session(&mut self, _api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Buys the configured token with half the available base-token balance on
/// the first candle it sees, then holds until `close_session`.
struct BuyAndHoldStrategy {
    token: String,
    bought: bool,
}

#[async_trait]
impl Strategy for BuyAndHoldStrategy {
    async fn initialize(&mut self, _config: &TradingConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn analyze(&mut self, candle: &Candle, api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        if self.bought || candle.symbol != self.token {
            return Ok(());
        }
        let portfolio = api.get_portfolio();
        let base_token = portfolio
            .wallet
            .keys()
            .find(|_| true)
            .cloned()
            .unwrap_or_default();
        let balance = api.get_available_balance(&base_token);
        let size = (balance * 0.5 / candle.close.max(1e-9)).max(0.0);
        if size > 0.0 {
            let outcome = api.buy(&self.token, size, TradeOptions::default());
            if let Err(err) = &outcome {
                error!(error = ?err, "buy-and-hold strategy's opening buy failed");
            } else {
                self.bought = true;
            }
        }
        Ok(())
    }

    async fn close_session(&mut self, _api: &mut TradeApi<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

fn make_strategy(name: &str, token: &str) -> Result<Box<dyn Strategy>> {
    match name {
        "noop" | "no-op" => Ok(Box::new(NoOpStrategy)),
        "buy-and-hold" | "buy_and_hold" => Ok(Box::new(BuyAndHoldStrategy {
            token: token.to_string(),
            bought: false,
        })),
        other => anyhow::bail!("unknown strategy {other:?} (expected `noop` or `buy-and-hold`)"),
    }
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    /// RFC3339 timestamp, e.g. `2026-01-24T00:00:00Z`. Converted to the
    /// engine's internal millisecond clock on load.
    timestamp: String,
    symbol: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads the whole CSV file up front and checks non-decreasing timestamp
/// order, matching the feed contract of §6 (`FeedError::OutOfOrder`).
fn read_candles(path: &PathBuf) -> Result<Vec<Result<Candle, FeedError>>> {
    let file = File::open(path).with_context(|| format!("opening candle file {path:?}"))?;
    let mut reader = csv::Reader::from_reader(file);
    let mut out = Vec::new();
    let mut previous: Option<i64> = None;

    for record in reader.deserialize::<CandleRow>() {
        let row = record.with_context(|| format!("parsing candle row in {path:?}"))?;
        let timestamp = chrono::DateTime::parse_from_rfc3339(&row.timestamp)
            .with_context(|| format!("parsing timestamp {:?} in {path:?}", row.timestamp))?
            .timestamp_millis();
        if let Some(prev) = previous {
            if timestamp < prev {
                out.push(Err(FeedError::OutOfOrder {
                    previous: prev,
                    current: timestamp,
                }));
                continue;
            }
        }
        previous = Some(timestamp);
        out.push(Ok(Candle {
            timestamp,
            symbol: row.symbol,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }));
    }
    Ok(out)
}

async fn run(args: Args) -> Result<()> {
    let config_file = File::open(&args.config).with_context(|| format!("opening config {:?}", args.config))?;
    let doc: ConfigDocument =
        serde_json::from_reader(config_file).with_context(|| format!("parsing config {:?}", args.config))?;

    let mut simulation_config = doc.simulation_config;
    if let Some(seed) = args.seed {
        simulation_config.random_seed = Some(seed);
    }

    let scheduler = Scheduler::new(doc.trading_config, simulation_config).context("invalid configuration")?;
    let candles = read_candles(&args.candles)?;
    let mut strategy = make_strategy(&args.strategy, &args.token)?;

    let result = scheduler
        .run(candles.into_iter(), strategy.as_mut())
        .await
        .context("feed error during replay")?;

    info!(
        trades = result.trades.len(),
        pnl = result.pnl,
        "simulation complete"
    );
    println!("{}", result.report);

    if let Some(output) = &args.output {
        let doc = OutputDocument {
            initial_value: result.initial_value,
            final_value: result.final_value,
            pnl: result.pnl,
            pnl_percentage: result.pnl_percentage,
            base_token: result.base_token,
            trades: result.trades,
        };
        let file = File::create(output).with_context(|| format!("creating output file {output:?}"))?;
        serde_json::to_writer_pretty(file, &doc).context("writing output JSON")?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    candlesim::logging::init_tracing();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "candlesim-run failed");
            eprintln!("error: {err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
