//! Order Processor
//!
//! Advances every active order once per scheduler tick: auto-cancel,
//! fill-strategy application, and the failure/fill-probability rolls.
//! Owns its own seeded RNG, independent of the oracle's, so neither
//! component's call order perturbs the other's sequence.

use crate::accountant::Accountant;
use crate::clock::Millis;
use crate::oracle::Oracle;
use crate::order_book::{OrderBook, OrderId, SimulatedOrder};
use crate::report::{ReportBuilder, TradeInput};
use crate::rng::Lcg;
use crate::types::{OrderFillStrategy, OrderType, SimulationConfig, EPSILON};
use std::collections::HashMap;
use tracing::debug;

/// A single fill (full or partial) applied during a tick, reported back so
/// the scheduler can feed it into the trade report.
#[derive(Debug, Clone, Copy)]
pub struct ProcessedFill {
    pub order_id: OrderId,
    pub delta: f64,
    pub price: f64,
    pub realized_pnl: Option<f64>,
}

pub struct OrderProcessor {
    rng: Lcg,
}

impl OrderProcessor {
    pub fn new(seed: u64) -> Self {
        Self { rng: Lcg::new(seed) }
    }

    /// Roll for order-creation failure. Market orders never fail when
    /// `market_orders_always_succeed` is set.
    pub fn should_order_fail(&mut self, config: &SimulationConfig, order_type: OrderType) -> bool {
        if order_type == OrderType::Market && config.market_orders_always_succeed {
            return false;
        }
        self.rng.next_f64() < config.order_failure_rate
    }

    /// Roll for whether a limit order's fill decision passes this tick.
    /// Market orders always pass this gate (the failure roll above is the
    /// only gate for them).
    fn limit_fill_passes(&mut self, config: &SimulationConfig, order_type: OrderType) -> bool {
        match order_type {
            OrderType::Market => true,
            OrderType::Limit => self.rng.next_f64() < config.limit_order_fill_probability,
        }
    }

    /// Same roll, exposed for the trade API's immediate-fill path where the
    /// order is always known to be a limit order at the call site.
    pub(crate) fn limit_order_roll_passes(&mut self, config: &SimulationConfig) -> bool {
        self.rng.next_f64() < config.limit_order_fill_probability
    }

    /// Advance every active order by one tick, applying auto-cancel and the
    /// configured fill strategy. Returns every fill applied this tick; each
    /// fill is also recorded into `report` as it lands.
    pub fn tick(
        &mut self,
        now: Millis,
        config: &SimulationConfig,
        book: &mut OrderBook,
        oracle: &mut Oracle,
        accountant: &mut Accountant,
        report: &mut ReportBuilder,
    ) -> Vec<ProcessedFill> {
        let mut fills = Vec::new();
        for id in book.active_order_ids() {
            let order = book.get(id).expect("active id came from the book").clone();

            if let Some(cancel_after) = config.cancellation_after_ms {
                if now - order.created_at >= cancel_after {
                    self.cancel(book, accountant, order, now);
                    continue;
                }
            }

            match config.order_fill_strategy {
                OrderFillStrategy::Immediate => {
                    // Filled synchronously at creation by the trade API; an
                    // active immediate order here indicates it was rejected
                    // at creation and should not be advanced further.
                }
                OrderFillStrategy::Never => {}
                OrderFillStrategy::Delayed => {
                    if let Some(scheduled) = order.scheduled_fill_time {
                        if now >= scheduled {
                            self.fill_remaining(now, config, book, oracle, accountant, report, order, &mut fills);
                        }
                    }
                }
                OrderFillStrategy::Gradual => {
                    let interval = config.gradual_fill_interval_ms.unwrap_or(0);
                    if now - order.last_updated_at >= interval {
                        let pct = config.partial_fill_percentage.unwrap_or(1.0);
                        self.fill_partial(now, config, book, oracle, accountant, report, order, pct, &mut fills);
                    }
                }
            }
        }
        fills
    }

    fn cancel(&mut self, book: &mut OrderBook, accountant: &mut Accountant, mut order: SimulatedOrder, now: Millis) {
        let release = order.outstanding_commitment();
        accountant.release(&order.committed_token.clone(), release);
        order.mark_cancelled(now, "auto-cancel: cancellationAfterMs elapsed");
        debug!(order_id = %order.id, "order auto-cancelled");
        book.update(order);
    }

    fn reject(&mut self, book: &mut OrderBook, accountant: &mut Accountant, mut order: SimulatedOrder, now: Millis, reason: &str) {
        let release = order.outstanding_commitment();
        accountant.release(&order.committed_token.clone(), release);
        order.mark_rejected(now, reason);
        debug!(order_id = %order.id, reason, "order rejected");
        book.update(order);
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_remaining(
        &mut self,
        now: Millis,
        config: &SimulationConfig,
        book: &mut OrderBook,
        oracle: &mut Oracle,
        accountant: &mut Accountant,
        report: &mut ReportBuilder,
        order: SimulatedOrder,
        fills: &mut Vec<ProcessedFill>,
    ) {
        let remaining = order.remaining_amount;
        self.fill_amount(now, config, book, oracle, accountant, report, order, remaining, fills);
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_partial(
        &mut self,
        now: Millis,
        config: &SimulationConfig,
        book: &mut OrderBook,
        oracle: &mut Oracle,
        accountant: &mut Accountant,
        report: &mut ReportBuilder,
        order: SimulatedOrder,
        pct: f64,
        fills: &mut Vec<ProcessedFill>,
    ) {
        let delta = order.remaining_amount * pct;
        self.fill_amount(now, config, book, oracle, accountant, report, order, delta, fills);
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_amount(
        &mut self,
        now: Millis,
        config: &SimulationConfig,
        book: &mut OrderBook,
        oracle: &mut Oracle,
        accountant: &mut Accountant,
        report: &mut ReportBuilder,
        mut order: SimulatedOrder,
        mut delta: f64,
        fills: &mut Vec<ProcessedFill>,
    ) {
        if order.order_type == OrderType::Limit && !self.limit_fill_passes(config, order.order_type) {
            order.last_updated_at = now;
            book.update(order);
            return;
        }
        let Some(price) = oracle.execution_price(&order.token, order.action, config.slippage_percentage) else {
            self.reject(book, accountant, order, now, "no price available");
            return;
        };
        delta = delta.min(order.remaining_amount);
        if delta <= EPSILON {
            order.last_updated_at = now;
            book.update(order);
            return;
        }

        let base_before = accountant.wallet_amount(accountant.base_token());
        let token_before = accountant.wallet_amount(&order.token);
        let position_before = accountant.position(&order.token).map(describe_position);
        let unrealized_before = accountant
            .position(&order.token)
            .map(|p| p.amount * (price - p.entry_price));

        let outcome = match order.action {
            crate::types::OrderAction::Buy => {
                accountant.execute_buy(&order.token, delta, price, order.leverage, order.is_futures, now)
            }
            crate::types::OrderAction::Sell => {
                accountant.execute_sell(&order.token, delta, price, order.leverage, order.is_futures, now)
            }
        };
        let release = order.commitment_release_for_fill(delta);
        accountant.release(&order.committed_token.clone(), release);

        order.apply_fill(delta, price, now);

        if order.is_futures && (order.stop_loss.is_some() || order.profit_target.is_some()) {
            accountant.set_position_triggers(&order.token, order.stop_loss, order.profit_target);
        }

        let base_after = accountant.wallet_amount(accountant.base_token());
        let token_after = accountant.wallet_amount(&order.token);
        let position_after = accountant.position(&order.token).map(describe_position);
        let unrealized_after = accountant
            .position(&order.token)
            .map(|p| p.amount * (price - p.entry_price));

        let capital_used = if order.is_futures {
            delta * price / order.leverage as f64
        } else {
            delta * price
        };

        let mut price_map = HashMap::new();
        price_map.insert(order.token.clone(), price);
        for sym in accountant.wallet_snapshot().into_keys() {
            if sym != order.token {
                if let Some(p) = oracle.last_known(&sym) {
                    price_map.insert(sym, p);
                }
            }
        }
        let liquidated_after = accountant.liquidated_balance(&price_map);

        report.record(TradeInput {
            timestamp: now,
            action: order.action,
            token: order.token.clone(),
            segment: order.segment(),
            leverage: order.leverage,
            requested_amount: order.requested_amount,
            filled_amount: order.filled_amount,
            requested_price: order.requested_price,
            execution_price: price,
            slippage: None,
            capital_used,
            base_before,
            base_after,
            token_before,
            token_after,
            position_before,
            position_after,
            realized_pnl: outcome.realized_pnl,
            unrealized_pnl_before: unrealized_before,
            unrealized_pnl_after: unrealized_after,
            liquidated_after,
        });

        let order_id = order.id;
        book.update(order);
        fills.push(ProcessedFill {
            order_id,
            delta,
            price,
            realized_pnl: outcome.realized_pnl,
        });
    }
}

fn describe_position(position: &crate::accountant::Position) -> String {
    format!(
        "{} amount={:.8} entry={:.8} leverage={} margin={:.8}",
        position.token, position.amount, position.entry_price, position.leverage, position.margin_used
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExchangeSettings, OrderAction};
    use std::collections::HashMap;

    fn accountant() -> Accountant {
        let mut wallet = HashMap::new();
        wallet.insert("USDC".to_string(), 10_000.0);
        Accountant::new("USDC".to_string(), wallet, ExchangeSettings::default())
    }

    fn config(strategy: OrderFillStrategy) -> SimulationConfig {
        SimulationConfig {
            order_fill_strategy: strategy,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn gradual_fill_converges_on_full_amount() {
        let mut book = OrderBook::new();
        let mut oracle = Oracle::new(0.0, 1);
        oracle.update("BTC", 100.0, 0);
        let mut acc = accountant();
        let mut order = SimulatedOrder::new(
            OrderAction::Buy,
            "BTC".to_string(),
            "USDC".to_string(),
            10.0,
            OrderType::Market,
            None,
            1,
            false,
            0,
        );
        order.set_commitment("USDC", 1000.0);
        acc.commit_buy(10.0, 100.0, 1, false);
        book.add(order);

        let mut cfg = config(OrderFillStrategy::Gradual);
        cfg.partial_fill_percentage = Some(0.3);
        cfg.gradual_fill_interval_ms = Some(1000);

        let mut processor = OrderProcessor::new(1);
        let mut report = ReportBuilder::new(10_000.0);
        let mut total_filled = 0.0;
        // remaining decays by (1 - 0.3) per tick; ~46 ticks are needed before
        // it drops under EPSILON and the order's status flips to `filled`.
        for t in (1000..=60_000).step_by(1000) {
            let fills = processor.tick(t, &cfg, &mut book, &mut oracle, &mut acc, &mut report);
            for f in fills {
                total_filled += f.delta;
            }
        }
        assert!((total_filled - 10.0).abs() < 1e-6);
        let order = book.filled_orders().next().unwrap();
        assert!((order.filled_amount - 10.0).abs() < 1e-6);
    }

    #[test]
    fn auto_cancel_releases_commitment() {
        let mut book = OrderBook::new();
        let mut oracle = Oracle::new(0.0, 1);
        oracle.update("BTC", 100.0, 0);
        let mut acc = accountant();
        let mut order = SimulatedOrder::new(
            OrderAction::Buy,
            "BTC".to_string(),
            "USDC".to_string(),
            10.0,
            OrderType::Market,
            None,
            1,
            false,
            0,
        );
        order.set_commitment("USDC", 1000.0);
        acc.commit_buy(10.0, 100.0, 1, false);
        book.add(order);

        let mut cfg = config(OrderFillStrategy::Delayed);
        cfg.fill_delay_ms = Some(10_000);
        cfg.cancellation_after_ms = Some(5_000);

        let mut processor = OrderProcessor::new(1);
        let mut report = ReportBuilder::new(10_000.0);
        processor.tick(6_000, &cfg, &mut book, &mut oracle, &mut acc, &mut report);

        assert_eq!(acc.available("USDC"), 10_000.0);
    }

    #[test]
    fn never_strategy_makes_no_fills() {
        let mut book = OrderBook::new();
        let mut oracle = Oracle::new(0.0, 1);
        oracle.update("BTC", 100.0, 0);
        let mut acc = accountant();
        let mut order = SimulatedOrder::new(
            OrderAction::Buy,
            "BTC".to_string(),
            "USDC".to_string(),
            10.0,
            OrderType::Market,
            None,
            1,
            false,
            0,
        );
        order.set_commitment("USDC", 1000.0);
        book.add(order);
        let cfg = config(OrderFillStrategy::Never);
        let mut processor = OrderProcessor::new(1);
        let mut report = ReportBuilder::new(10_000.0);
        let fills = processor.tick(100_000, &cfg, &mut book, &mut oracle, &mut acc, &mut report);
        assert!(fills.is_empty());
    }
}
