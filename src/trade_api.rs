//! Trade API Facade
//!
//! The surface exposed to strategy code. Borrows the scheduler's owned
//! components for the lifetime of a single `analyze()`/`close_session()`
//! call, which structurally enforces the "atomic critical section"
//! guarantee - no other code can observe engine state mid-call, and
//! cloning on every read accessor keeps engine state from escaping into
//! strategy hands.

use crate::accountant::{Accountant, Position};
use crate::clock::Clock;
use crate::error::{OrderRuntimeError, PreTradeValidationError};
use crate::oracle::Oracle;
use crate::order_book::{OrderBook, OrderId, SimulatedOrder};
use crate::order_processor::OrderProcessor;
use crate::report::{ReportBuilder, TradeInput};
use crate::types::{OrderAction, OrderFillStrategy, OrderStatus, OrderType, SimulationConfig, TriggerConfig};
use std::collections::HashMap;

/// Options accompanying a `buy`/`sell` call.
#[derive(Debug, Clone)]
pub struct TradeOptions {
    pub order_type: OrderType,
    pub requested_price: Option<f64>,
    pub leverage: u32,
    pub is_futures: bool,
    pub stop_loss: Option<TriggerConfig>,
    pub profit_target: Option<TriggerConfig>,
}

impl Default for TradeOptions {
    fn default() -> Self {
        Self {
            order_type: OrderType::Market,
            requested_price: None,
            leverage: 1,
            is_futures: false,
            stop_loss: None,
            profit_target: None,
        }
    }
}

/// Recoverable trade-API error: never thrown, always returned as data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TradeError {
    #[error(transparent)]
    Validation(#[from] PreTradeValidationError),
    #[error(transparent)]
    Runtime(#[from] OrderRuntimeError),
}

/// Result of a `buy`/`sell`/`closePosition` call.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub execution_price: Option<f64>,
    pub slippage: Option<f64>,
}

/// Snapshot for strategy display: wallet, open positions, open order count.
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub wallet: HashMap<String, f64>,
    pub positions: HashMap<String, Position>,
    pub open_order_count: usize,
}

pub struct TradeApi<'a> {
    pub(crate) book: &'a mut OrderBook,
    pub(crate) accountant: &'a mut Accountant,
    pub(crate) oracle: &'a mut Oracle,
    pub(crate) clock: &'a Clock,
    pub(crate) config: &'a SimulationConfig,
    pub(crate) processor: &'a mut OrderProcessor,
    pub(crate) report: &'a mut ReportBuilder,
}

impl<'a> TradeApi<'a> {
    pub fn buy(&mut self, token: &str, amount: f64, opts: TradeOptions) -> Result<TradeOutcome, TradeError> {
        self.place_order(OrderAction::Buy, token, amount, opts)
    }

    pub fn sell(&mut self, token: &str, amount: f64, opts: TradeOptions) -> Result<TradeOutcome, TradeError> {
        self.place_order(OrderAction::Sell, token, amount, opts)
    }

    fn reference_price(&mut self, token: &str, opts: &TradeOptions) -> Option<f64> {
        match opts.order_type {
            OrderType::Limit => opts
                .requested_price
                .or_else(|| self.oracle.current_price(token).map(|q| q.price)),
            OrderType::Market => self.oracle.current_price(token).map(|q| q.price),
        }
    }

    fn place_order(
        &mut self,
        action: OrderAction,
        token: &str,
        amount: f64,
        opts: TradeOptions,
    ) -> Result<TradeOutcome, TradeError> {
        let now = self.clock.now();
        let base_token = self.accountant.base_token().to_string();
        let reference_price = self.reference_price(token, &opts);

        match action {
            OrderAction::Buy => {
                self.accountant
                    .can_buy(token, amount, reference_price.unwrap_or(0.0), opts.leverage, opts.is_futures)?;
            }
            OrderAction::Sell => {
                self.accountant.can_sell(token, amount, opts.is_futures)?;
            }
        }

        let mut order = SimulatedOrder::new(
            action,
            token.to_string(),
            base_token.clone(),
            amount,
            opts.order_type,
            opts.requested_price,
            opts.leverage,
            opts.is_futures,
            now,
        );

        let Some(price_for_commit) = reference_price else {
            order.mark_rejected(now, "no price available at order creation");
            self.book.add(order);
            return Err(TradeError::Runtime(OrderRuntimeError::NoPrice {
                token: token.to_string(),
                at: now,
            }));
        };

        if self.processor.should_order_fail(self.config, opts.order_type) {
            order.mark_rejected(now, "rejected by failure roll");
            self.book.add(order);
            return Err(TradeError::Runtime(OrderRuntimeError::FailureRoll));
        }

        let (commit_token, commit_amount) = match action {
            OrderAction::Buy => {
                self.accountant
                    .commit_buy(amount, price_for_commit, opts.leverage, opts.is_futures);
                let required = if opts.is_futures {
                    amount * price_for_commit / opts.leverage as f64
                } else {
                    amount * price_for_commit
                };
                (base_token.clone(), required)
            }
            OrderAction::Sell => {
                let reserved = self
                    .accountant
                    .commit_sell(token, amount, price_for_commit, opts.leverage, opts.is_futures);
                let commit_token = if opts.is_futures { base_token.clone() } else { token.to_string() };
                (commit_token, reserved)
            }
        };
        order.set_commitment(commit_token, commit_amount);

        // Stop-loss/profit-target requested alongside the order ride along
        // on the order itself rather than being attached to the position
        // now: for `delayed`/`gradual` strategies the position this order
        // will open doesn't exist yet. They're attached to the position
        // once a fill actually opens/extends it (`fill_immediately` below,
        // or `OrderProcessor::fill_amount` for later-landing fills).
        if opts.is_futures {
            order.stop_loss = opts.stop_loss;
            order.profit_target = opts.profit_target;
        }

        order.mark_open(now);

        match self.config.order_fill_strategy {
            OrderFillStrategy::Immediate => self.fill_immediately(order, action, token, price_for_commit),
            OrderFillStrategy::Delayed => {
                let delay = self.config.fill_delay_ms.unwrap_or(0);
                order.scheduled_fill_time = Some(now + delay);
                let order_id = self.book.add(order);
                Ok(TradeOutcome {
                    order_id,
                    status: OrderStatus::Open,
                    execution_price: None,
                    slippage: None,
                })
            }
            OrderFillStrategy::Gradual | OrderFillStrategy::Never => {
                let order_id = self.book.add(order);
                Ok(TradeOutcome {
                    order_id,
                    status: OrderStatus::Open,
                    execution_price: None,
                    slippage: None,
                })
            }
        }
    }

    /// Fill synchronously at creation time (the `Immediate` fill strategy).
    /// If the limit-fill-probability roll fails for a limit order, the order
    /// is left open rather than filled - per the order processor's own
    /// handling, an active order under the `Immediate` strategy is then a
    /// no-op on every later tick, so this should be rare in practice.
    fn fill_immediately(
        &mut self,
        mut order: SimulatedOrder,
        action: OrderAction,
        token: &str,
        reference_price: f64,
    ) -> Result<TradeOutcome, TradeError> {
        let now = self.clock.now();

        if order.order_type == OrderType::Limit
            && self.config.limit_order_fill_probability < 1.0
            && !self.processor.limit_order_roll_passes(self.config)
        {
            let order_id = self.book.add(order);
            return Ok(TradeOutcome {
                order_id,
                status: OrderStatus::Open,
                execution_price: None,
                slippage: None,
            });
        }

        let Some(exec_price) = self.oracle.execution_price(token, action, self.config.slippage_percentage) else {
            let release = order.outstanding_commitment();
            self.accountant.release(&order.committed_token.clone(), release);
            order.mark_rejected(now, "no price available at fill time");
            self.book.add(order);
            return Err(TradeError::Runtime(OrderRuntimeError::NoPrice {
                token: token.to_string(),
                at: now,
            }));
        };

        let amount = order.remaining_amount;
        let base_before = self.accountant.wallet_amount(self.accountant.base_token());
        let token_before = self.accountant.wallet_amount(token);
        let unrealized_before = self
            .accountant
            .position(token)
            .map(|p| p.amount * (reference_price - p.entry_price));
        let position_before = self.accountant.position(token).map(describe_position);

        let outcome = match action {
            OrderAction::Buy => self
                .accountant
                .execute_buy(token, amount, exec_price, order.leverage, order.is_futures, now),
            OrderAction::Sell => self
                .accountant
                .execute_sell(token, amount, exec_price, order.leverage, order.is_futures, now),
        };
        let release = order.commitment_release_for_fill(amount);
        self.accountant.release(&order.committed_token.clone(), release);
        order.apply_fill(amount, exec_price, now);

        if order.is_futures && (order.stop_loss.is_some() || order.profit_target.is_some()) {
            self.accountant
                .set_position_triggers(token, order.stop_loss, order.profit_target);
        }

        let base_after = self.accountant.wallet_amount(self.accountant.base_token());
        let token_after = self.accountant.wallet_amount(token);
        let position_after = self.accountant.position(token).map(describe_position);
        let unrealized_after = self
            .accountant
            .position(token)
            .map(|p| p.amount * (exec_price - p.entry_price));

        let slippage = Some((exec_price - reference_price) / reference_price);
        let capital_used = if order.is_futures {
            amount * exec_price / order.leverage as f64
        } else {
            amount * exec_price
        };

        let mut price_map = HashMap::new();
        price_map.insert(token.to_string(), exec_price);
        for sym in self.accountant.wallet_snapshot().into_keys() {
            if sym != token {
                if let Some(p) = self.oracle.last_known(&sym) {
                    price_map.insert(sym, p);
                }
            }
        }
        let liquidated_after = self.accountant.liquidated_balance(&price_map);

        let order_id = self.book.add(order.clone());
        self.report.record(TradeInput {
            timestamp: now,
            action,
            token: token.to_string(),
            segment: order.segment(),
            leverage: order.leverage,
            requested_amount: order.requested_amount,
            filled_amount: order.filled_amount,
            requested_price: order.requested_price,
            execution_price: exec_price,
            slippage,
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

        Ok(TradeOutcome {
            order_id,
            status: OrderStatus::Filled,
            execution_price: Some(exec_price),
            slippage,
        })
    }

    pub fn get_order_status(&self, id: OrderId) -> Option<SimulatedOrder> {
        self.book.get(id).cloned()
    }

    pub fn get_current_price(&mut self, token: &str) -> Option<f64> {
        self.oracle.current_price(token).map(|q| q.price)
    }

    pub fn get_position(&self, token: &str) -> Option<Position> {
        self.accountant.position(token).cloned()
    }

    pub fn get_all_positions(&self) -> HashMap<String, Position> {
        self.accountant.positions_snapshot()
    }

    /// Idempotent close: calling again once the position is gone returns
    /// `Err(PreTradeValidationError::NoPosition)` rather than panicking.
    pub fn close_position(&mut self, token: &str) -> Result<TradeOutcome, TradeError> {
        let Some(position) = self.accountant.position(token).cloned() else {
            return Err(TradeError::Validation(PreTradeValidationError::NoPosition(token.to_string())));
        };
        let action = if position.is_long() { OrderAction::Sell } else { OrderAction::Buy };
        self.place_order(
            action,
            token,
            position.amount.abs(),
            TradeOptions {
                order_type: OrderType::Market,
                requested_price: None,
                leverage: position.leverage,
                is_futures: true,
                stop_loss: None,
                profit_target: None,
            },
        )
    }

    pub fn get_available_balance(&self, token: &str) -> f64 {
        self.accountant.available(token)
    }

    pub fn get_wallet(&self) -> HashMap<String, f64> {
        self.accountant.wallet_snapshot()
    }

    pub fn get_portfolio(&self) -> Portfolio {
        Portfolio {
            wallet: self.accountant.wallet_snapshot(),
            positions: self.accountant.positions_snapshot(),
            open_order_count: self.book.active_orders().count(),
        }
    }

    pub fn get_open_orders(&self) -> Vec<SimulatedOrder> {
        self.book.active_orders().cloned().collect()
    }

    pub fn can_trade(&self, token: &str, is_futures: bool) -> bool {
        if token == self.accountant.base_token() {
            return false;
        }
        self.accountant.check_segment_enabled(is_futures)
    }
}

fn describe_position(position: &Position) -> String {
    format!(
        "{} amount={:.8} entry={:.8} leverage={} margin={:.8}",
        position.token, position.amount, position.entry_price, position.leverage, position.margin_used
    )
}
