//! Trade Report Generator
//!
//! Accumulates one row per filled order plus the liquidated-balance chain
//! that lets the report read as a single continuous balance trajectory,
//! independent of intervening price moves that produced no trades. Renders
//! a markdown summary and exposes aggregate statistics.

use crate::clock::Millis;
use crate::types::{OrderAction, Segment};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Inputs the caller (scheduler / trade API / order processor) supplies
/// when a fill lands. Everything derivable purely from the ledger chain
/// (trade number, `liq_before`, cumulative PnL, percentage) is computed by
/// `ReportBuilder::record`.
#[derive(Debug, Clone)]
pub struct TradeInput {
    pub timestamp: Millis,
    pub action: OrderAction,
    pub token: String,
    pub segment: Segment,
    pub leverage: u32,
    pub requested_amount: f64,
    pub filled_amount: f64,
    pub requested_price: Option<f64>,
    pub execution_price: f64,
    pub slippage: Option<f64>,
    pub capital_used: f64,
    pub base_before: f64,
    pub base_after: f64,
    pub token_before: f64,
    pub token_after: f64,
    pub position_before: Option<String>,
    pub position_after: Option<String>,
    pub realized_pnl: Option<f64>,
    pub unrealized_pnl_before: Option<f64>,
    pub unrealized_pnl_after: Option<f64>,
    pub liquidated_after: f64,
}

/// One row of the trade report (external schema per spec §6/§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_number: u64,
    pub timestamp: Millis,
    pub action: OrderAction,
    pub token: String,
    pub segment: Segment,
    pub leverage: u32,
    pub requested_amount: f64,
    pub filled_amount: f64,
    pub requested_price: Option<f64>,
    pub execution_price: f64,
    pub slippage: Option<f64>,
    pub capital_used: f64,
    pub base_before: f64,
    pub base_after: f64,
    pub base_delta: f64,
    pub token_before: f64,
    pub token_after: f64,
    pub position_before: Option<String>,
    pub position_after: Option<String>,
    pub realized_pnl: Option<f64>,
    pub unrealized_pnl_before: Option<f64>,
    pub unrealized_pnl_after: Option<f64>,
    pub liquidated_before: f64,
    pub liquidated_after: f64,
    pub liquidated_change: f64,
    pub cumulative_pnl: f64,
    pub cumulative_pnl_pct: f64,
}

pub struct ReportBuilder {
    initial_portfolio_value: f64,
    last_liquidated: f64,
    rows: Vec<TradeRecord>,
}

impl ReportBuilder {
    pub fn new(initial_portfolio_value: f64) -> Self {
        Self {
            initial_portfolio_value,
            last_liquidated: initial_portfolio_value,
            rows: Vec::new(),
        }
    }

    /// Append a row, chaining `liquidated_before` to the prior row's
    /// `liquidated_after` (or the initial portfolio value for the first row).
    pub fn record(&mut self, input: TradeInput) -> &TradeRecord {
        let liquidated_before = self.last_liquidated;
        let liquidated_change = input.liquidated_after - liquidated_before;
        let cumulative_pnl = input.liquidated_after - self.initial_portfolio_value;
        let cumulative_pnl_pct = if self.initial_portfolio_value.abs() > f64::EPSILON {
            cumulative_pnl / self.initial_portfolio_value * 100.0
        } else {
            0.0
        };

        let row = TradeRecord {
            trade_number: self.rows.len() as u64 + 1,
            timestamp: input.timestamp,
            action: input.action,
            token: input.token,
            segment: input.segment,
            leverage: input.leverage,
            requested_amount: input.requested_amount,
            filled_amount: input.filled_amount,
            requested_price: input.requested_price,
            execution_price: input.execution_price,
            slippage: input.slippage,
            capital_used: input.capital_used,
            base_before: input.base_before,
            base_after: input.base_after,
            base_delta: input.base_after - input.base_before,
            token_before: input.token_before,
            token_after: input.token_after,
            position_before: input.position_before,
            position_after: input.position_after,
            realized_pnl: input.realized_pnl,
            unrealized_pnl_before: input.unrealized_pnl_before,
            unrealized_pnl_after: input.unrealized_pnl_after,
            liquidated_before,
            liquidated_after: input.liquidated_after,
            liquidated_change,
            cumulative_pnl,
            cumulative_pnl_pct,
        };
        self.last_liquidated = input.liquidated_after;
        self.rows.push(row);
        self.rows.last().expect("just pushed")
    }

    pub fn rows(&self) -> &[TradeRecord] {
        &self.rows
    }

    pub fn initial_portfolio_value(&self) -> f64 {
        self.initial_portfolio_value
    }

    pub fn final_liquidated_value(&self) -> f64 {
        self.last_liquidated
    }

    pub fn summary(&self) -> Summary {
        Summary::from_rows(self.initial_portfolio_value, &self.rows)
    }

    pub fn render_markdown(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(out, "# Backtest Report");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Initial portfolio value: {:.8}", self.initial_portfolio_value);
        let _ = writeln!(out, "- Final portfolio value: {:.8}", self.last_liquidated);
        let _ = writeln!(out, "- PnL: {:.8} ({:.4}%)", summary.final_pnl, summary.final_pnl_pct);
        let _ = writeln!(out, "- Trades: {}", self.rows.len());
        let _ = writeln!(out, "- Spot trades: {}", summary.spot_trades);
        let _ = writeln!(out, "- Futures trades: {}", summary.futures_trades);
        let _ = writeln!(out, "- Capital deployed: {:.8}", summary.capital_deployed);
        let _ = writeln!(out, "- Average slippage: {:.6}", summary.avg_slippage);
        let _ = writeln!(out, "- Win rate: {:.2}%", summary.win_rate * 100.0);
        let _ = writeln!(out, "- Profit factor: {:.4}", summary.profit_factor);
        let _ = writeln!(out, "- Largest win: {:.8}", summary.largest_win);
        let _ = writeln!(out, "- Largest loss: {:.8}", summary.largest_loss);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "| # | t | action | token | segment | filled | exec price | liq after | cum pnl |"
        );
        let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|");
        for row in &self.rows {
            let _ = writeln!(
                out,
                "| {} | {} | {:?} | {} | {} | {:.6} | {:.6} | {:.4} | {:.4} |",
                row.trade_number,
                row.timestamp,
                row.action,
                row.token,
                row.segment.label(),
                row.filled_amount,
                row.execution_price,
                row.liquidated_after,
                row.cumulative_pnl,
            );
        }
        out
    }
}

/// Aggregate statistics over the recorded trade rows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Summary {
    pub spot_trades: u64,
    pub futures_trades: u64,
    pub capital_deployed: f64,
    pub avg_slippage: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub final_pnl: f64,
    pub final_pnl_pct: f64,
}

impl Summary {
    fn from_rows(initial: f64, rows: &[TradeRecord]) -> Self {
        if rows.is_empty() {
            return Summary::default();
        }
        let spot_trades = rows.iter().filter(|r| r.segment == Segment::Spot).count() as u64;
        let futures_trades = rows.iter().filter(|r| r.segment == Segment::Futures).count() as u64;
        let capital_deployed: f64 = rows.iter().map(|r| r.capital_used).sum();
        let slippages: Vec<f64> = rows.iter().filter_map(|r| r.slippage).collect();
        let avg_slippage = if slippages.is_empty() {
            0.0
        } else {
            slippages.iter().sum::<f64>() / slippages.len() as f64
        };
        let wins = rows.iter().filter(|r| r.liquidated_change > 0.0).count();
        let win_rate = wins as f64 / rows.len() as f64;
        let gross_profit: f64 = rows.iter().map(|r| r.liquidated_change.max(0.0)).sum();
        let gross_loss: f64 = rows.iter().map(|r| (-r.liquidated_change).max(0.0)).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let largest_win = rows
            .iter()
            .map(|r| r.liquidated_change)
            .fold(f64::MIN, f64::max)
            .max(0.0);
        let largest_loss = rows
            .iter()
            .map(|r| r.liquidated_change)
            .fold(f64::MAX, f64::min)
            .min(0.0);
        let final_pnl = rows.last().map(|r| r.cumulative_pnl).unwrap_or(0.0);
        let final_pnl_pct = rows.last().map(|r| r.cumulative_pnl_pct).unwrap_or(0.0);
        let _ = initial;

        Summary {
            spot_trades,
            futures_trades,
            capital_deployed,
            avg_slippage,
            win_rate,
            profit_factor,
            largest_win,
            largest_loss,
            final_pnl,
            final_pnl_pct,
        }
    }
}
