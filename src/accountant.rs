//! Wallet / Position Accountant
//!
//! The single source of truth for money: spot balances, reserved
//! commitments, and at most one cross-margined futures position per
//! symbol. All numeric comparisons use `EPSILON` for zero-tests; see
//! spec invariants in the module tests below.

use crate::clock::Millis;
use crate::error::PreTradeValidationError;
use crate::types::{ExchangeSettings, OrderAction, TriggerConfig, EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// A cross-margined futures position. At most one per symbol; reversing
/// sign is modeled as (close existing, open opposite) within one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token: String,
    /// Signed: positive = long, negative = short.
    pub amount: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub margin_used: f64,
    pub stop_loss: Option<TriggerConfig>,
    pub profit_target: Option<TriggerConfig>,
    pub created_at: Millis,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.amount > 0.0
    }
}

/// Which stop/target fired, with stop-loss precedence already applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggersHit {
    pub stop_loss: bool,
    pub profit_target: bool,
}

/// Outcome of a futures execution: residual position state plus any PnL
/// realized by closing (or partially closing) the prior position.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOutcome {
    pub realized_pnl: Option<f64>,
}

pub struct Accountant {
    base_token: String,
    wallet: HashMap<String, f64>,
    committed: HashMap<String, f64>,
    positions: HashMap<String, Position>,
    settings: ExchangeSettings,
}

impl Accountant {
    pub fn new(
        base_token: String,
        initial_wallet: HashMap<String, f64>,
        settings: ExchangeSettings,
    ) -> Self {
        Self {
            base_token,
            wallet: initial_wallet,
            committed: HashMap::new(),
            positions: HashMap::new(),
            settings,
        }
    }

    pub fn base_token(&self) -> &str {
        &self.base_token
    }

    pub fn wallet_amount(&self, token: &str) -> f64 {
        *self.wallet.get(token).unwrap_or(&0.0)
    }

    pub fn committed_amount(&self, token: &str) -> f64 {
        *self.committed.get(token).unwrap_or(&0.0)
    }

    /// `max(0, wallet[t] - committed[t])`.
    pub fn available(&self, token: &str) -> f64 {
        (self.wallet_amount(token) - self.committed_amount(token)).max(0.0)
    }

    pub fn wallet_snapshot(&self) -> HashMap<String, f64> {
        self.wallet.clone()
    }

    pub fn position(&self, token: &str) -> Option<&Position> {
        self.positions.get(token)
    }

    pub fn positions_snapshot(&self) -> HashMap<String, Position> {
        self.positions.clone()
    }

    // -- pre-trade validation -------------------------------------------------

    pub fn can_buy(
        &self,
        token: &str,
        amount: f64,
        price: f64,
        leverage: u32,
        is_futures: bool,
    ) -> Result<(), PreTradeValidationError> {
        if amount <= 0.0 {
            return Err(PreTradeValidationError::NonPositiveAmount(amount));
        }
        if token == self.base_token {
            return Err(PreTradeValidationError::BaseTokenNotTradable(token.to_string()));
        }
        self.check_segment_and_leverage(is_futures, leverage)?;
        let required = if is_futures {
            amount * price / leverage as f64
        } else {
            amount * price
        };
        let available = self.available(&self.base_token);
        if available + EPSILON < required {
            return Err(PreTradeValidationError::InsufficientBalance {
                token: self.base_token.clone(),
                required,
                available,
            });
        }
        Ok(())
    }

    pub fn can_sell(
        &self,
        token: &str,
        amount: f64,
        is_futures: bool,
    ) -> Result<(), PreTradeValidationError> {
        if amount <= 0.0 {
            return Err(PreTradeValidationError::NonPositiveAmount(amount));
        }
        if token == self.base_token {
            return Err(PreTradeValidationError::BaseTokenNotTradable(token.to_string()));
        }
        if !is_futures {
            let available = self.available(token);
            if available + EPSILON < amount {
                return Err(PreTradeValidationError::InsufficientHoldings {
                    token: token.to_string(),
                    amount,
                    available,
                });
            }
            return Ok(());
        }
        // Futures: closing a long is always allowed up to its size; margin
        // check for opening/extending short is deferred to commit time.
        if let Some(pos) = self.positions.get(token) {
            if pos.is_long() && amount > pos.amount + EPSILON {
                return Err(PreTradeValidationError::InsufficientHoldings {
                    token: token.to_string(),
                    amount,
                    available: pos.amount,
                });
            }
        }
        Ok(())
    }

    /// Whether the given segment is enabled at all, independent of leverage.
    pub fn check_segment_enabled(&self, is_futures: bool) -> bool {
        if is_futures {
            self.settings.futures_enabled
        } else {
            self.settings.spot_enabled
        }
    }

    fn check_segment_and_leverage(
        &self,
        is_futures: bool,
        leverage: u32,
    ) -> Result<(), PreTradeValidationError> {
        if is_futures {
            if !self.settings.futures_enabled {
                return Err(PreTradeValidationError::FuturesDisabled);
            }
            if !self.settings.futures_leverage_options.contains(&leverage) {
                return Err(PreTradeValidationError::DisallowedLeverage {
                    leverage,
                    allowed: self.settings.futures_leverage_options.clone(),
                });
            }
        } else {
            if !self.settings.spot_enabled {
                return Err(PreTradeValidationError::SpotDisabled);
            }
            if !self.settings.spot_leverage_options.contains(&leverage) {
                return Err(PreTradeValidationError::DisallowedLeverage {
                    leverage,
                    allowed: self.settings.spot_leverage_options.clone(),
                });
            }
        }
        Ok(())
    }

    // -- commitment reservation -----------------------------------------------

    /// Reserve the capital a buy order will need once filled.
    pub fn commit_buy(&mut self, amount: f64, price: f64, leverage: u32, is_futures: bool) {
        let required = if is_futures {
            amount * price / leverage as f64
        } else {
            amount * price
        };
        *self.committed.entry(self.base_token.clone()).or_insert(0.0) += required;
    }

    /// Reserve the capital a sell order will need once filled. Returns the
    /// amount actually reserved (0 for a futures long-close, which needs no
    /// fresh margin since it is releasing existing margin instead).
    pub fn commit_sell(
        &mut self,
        token: &str,
        amount: f64,
        price: f64,
        leverage: u32,
        is_futures: bool,
    ) -> f64 {
        if !is_futures {
            *self.committed.entry(token.to_string()).or_insert(0.0) += amount;
            return amount;
        }
        let closing_long = self
            .positions
            .get(token)
            .map(|p| p.is_long())
            .unwrap_or(false);
        if closing_long {
            return 0.0;
        }
        let required = amount * price / leverage as f64;
        *self.committed.entry(self.base_token.clone()).or_insert(0.0) += required;
        required
    }

    /// Release a previously-committed reservation (cancel, reject, or the
    /// proportional share of a partial fill).
    pub fn release(&mut self, token: &str, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        if let Some(c) = self.committed.get_mut(token) {
            *c = (*c - amount).max(0.0);
        }
    }

    // -- execution --------------------------------------------------------------

    /// Apply a fill of `delta` units bought at `price`.
    pub fn execute_buy(
        &mut self,
        token: &str,
        delta: f64,
        price: f64,
        leverage: u32,
        is_futures: bool,
        now: Millis,
    ) -> ExecutionOutcome {
        if !is_futures {
            // Commitment release for this fill is the caller's
            // responsibility (proportional to the order's remaining
            // commitment, not this raw delta*price) - see
            // `SimulatedOrder::commitment_release_for_fill`. Releasing here
            // too would double-release on every fill.
            *self.wallet.entry(self.base_token.clone()).or_insert(0.0) -= delta * price;
            *self.wallet.entry(token.to_string()).or_insert(0.0) += delta;
            return ExecutionOutcome::default();
        }
        self.execute_futures_side(token, OrderAction::Buy, delta, price, leverage, now)
    }

    /// Apply a fill of `delta` units sold at `price`.
    pub fn execute_sell(
        &mut self,
        token: &str,
        delta: f64,
        price: f64,
        leverage: u32,
        is_futures: bool,
        now: Millis,
    ) -> ExecutionOutcome {
        if !is_futures {
            // See the matching comment in `execute_buy`: the caller
            // releases the proportional commitment, not this method.
            *self.wallet.entry(token.to_string()).or_insert(0.0) -= delta;
            *self.wallet.entry(self.base_token.clone()).or_insert(0.0) += delta * price;
            return ExecutionOutcome::default();
        }
        self.execute_futures_side(token, OrderAction::Sell, delta, price, leverage, now)
    }

    fn execute_futures_side(
        &mut self,
        token: &str,
        action: OrderAction,
        delta: f64,
        price: f64,
        leverage: u32,
        now: Millis,
    ) -> ExecutionOutcome {
        let opposite_side_amount = self.positions.get(token).map(|p| p.amount).unwrap_or(0.0);
        // A buy closes an existing short (amount < 0); a sell closes an existing long (amount > 0).
        let has_opposite = match action {
            OrderAction::Buy => opposite_side_amount < -EPSILON,
            OrderAction::Sell => opposite_side_amount > EPSILON,
        };

        let mut realized_pnl = None;
        let mut residual = delta;

        if has_opposite {
            let pos = self.positions.get(token).cloned().unwrap();
            let close = delta.min(pos.amount.abs());
            let pnl = match action {
                OrderAction::Buy => close * (pos.entry_price - price),
                OrderAction::Sell => close * (price - pos.entry_price),
            };
            let margin_returned = close * pos.entry_price / pos.leverage as f64;
            *self.wallet.entry(self.base_token.clone()).or_insert(0.0) += margin_returned + pnl;
            realized_pnl = Some(pnl);
            residual = (delta - close).max(0.0);

            let new_amount = match action {
                OrderAction::Buy => pos.amount + close,
                OrderAction::Sell => pos.amount - close,
            };
            let new_margin = pos.margin_used - margin_returned;
            if new_amount.abs() < EPSILON && residual <= EPSILON {
                self.positions.remove(token);
            } else {
                let mut updated = pos;
                updated.amount = new_amount;
                updated.margin_used = new_margin.max(0.0);
                self.positions.insert(token.to_string(), updated);
            }
        }

        if residual > EPSILON {
            self.open_or_extend(token, action, residual, price, leverage, now);
        }

        ExecutionOutcome { realized_pnl }
    }

    fn open_or_extend(
        &mut self,
        token: &str,
        action: OrderAction,
        amount: f64,
        price: f64,
        leverage: u32,
        now: Millis,
    ) {
        let margin = amount * price / leverage as f64;
        *self.wallet.entry(self.base_token.clone()).or_insert(0.0) -= margin;
        let signed = match action {
            OrderAction::Buy => amount,
            OrderAction::Sell => -amount,
        };
        match self.positions.get_mut(token) {
            Some(pos) => {
                let total_cost = pos.entry_price * pos.amount.abs() + price * amount;
                let new_amount = pos.amount + signed;
                pos.entry_price = total_cost / new_amount.abs();
                pos.amount = new_amount;
                pos.margin_used += margin;
            }
            None => {
                self.positions.insert(
                    token.to_string(),
                    Position {
                        token: token.to_string(),
                        amount: signed,
                        entry_price: price,
                        leverage,
                        margin_used: margin,
                        stop_loss: None,
                        profit_target: None,
                        created_at: now,
                    },
                );
            }
        }
    }

    pub fn set_position_triggers(
        &mut self,
        token: &str,
        stop_loss: Option<TriggerConfig>,
        profit_target: Option<TriggerConfig>,
    ) {
        if let Some(pos) = self.positions.get_mut(token) {
            pos.stop_loss = stop_loss;
            pos.profit_target = profit_target;
        }
    }

    /// Check whether `current_price` crosses the position's configured
    /// stop-loss/profit-target. Stop-loss takes precedence when both fire
    /// in the same tick.
    pub fn check_position_triggers(&self, token: &str, current_price: f64) -> TriggersHit {
        let Some(pos) = self.positions.get(token) else {
            return TriggersHit::default();
        };
        let long = pos.is_long();

        let stop_hit = pos.stop_loss.map_or(false, |cfg| {
            let threshold = match cfg {
                TriggerConfig::Percentage(p) => {
                    if long {
                        pos.entry_price * (1.0 - p / 100.0)
                    } else {
                        pos.entry_price * (1.0 + p / 100.0)
                    }
                }
                TriggerConfig::Price(v) => v,
            };
            if long {
                current_price <= threshold
            } else {
                current_price >= threshold
            }
        });

        let target_hit = pos.profit_target.map_or(false, |cfg| {
            let threshold = match cfg {
                TriggerConfig::Percentage(p) => {
                    if long {
                        pos.entry_price * (1.0 + p / 100.0)
                    } else {
                        pos.entry_price * (1.0 - p / 100.0)
                    }
                }
                TriggerConfig::Price(v) => v,
            };
            if long {
                current_price >= threshold
            } else {
                current_price <= threshold
            }
        });

        TriggersHit {
            stop_loss: stop_hit,
            profit_target: !stop_hit && target_hit,
        }
    }

    /// Close every remaining position at the given reference price and
    /// credit the base token. Unknown prices are skipped with a warning.
    ///
    /// Iterates tokens in sorted order - `positions` is a `HashMap`, and
    /// floating-point addition is not associative, so an unordered walk
    /// would make the resulting wallet balance depend on hash iteration
    /// order instead of being byte-reproducible across runs.
    pub fn liquidate_all(&mut self, last_prices: &HashMap<String, f64>) {
        let mut tokens: Vec<String> = self.positions.keys().cloned().collect();
        tokens.sort_unstable();
        for token in tokens {
            let Some(&price) = last_prices.get(&token) else {
                warn!(token = %token, "liquidate_all: no known price, skipping position");
                continue;
            };
            let pos = self.positions.remove(&token).expect("token came from positions keys");
            let value = pos.margin_used + (price - pos.entry_price) * pos.amount;
            *self.wallet.entry(self.base_token.clone()).or_insert(0.0) += value;
        }
    }

    /// Total base-token value of the account if every position and spot
    /// holding were marked to `prices` and closed. Used by the report for
    /// liquidated-balance snapshots.
    ///
    /// Both `positions` and `wallet` are `HashMap`s with an unspecified,
    /// run-to-run-stable-but-arbitrary iteration order; since float
    /// addition isn't associative, summing in hash order would make
    /// `liquidated_after` (and everything chained from it in the trade
    /// report) depend on that order rather than being byte-reproducible.
    /// Sort token keys first so the sum is always accumulated the same way.
    pub fn liquidated_balance(&self, prices: &HashMap<String, f64>) -> f64 {
        let mut total = self.wallet_amount(&self.base_token);

        let mut position_tokens: Vec<&String> = self.positions.keys().collect();
        position_tokens.sort_unstable();
        for token in position_tokens {
            let pos = &self.positions[token];
            if let Some(&price) = prices.get(&pos.token) {
                total += pos.margin_used + (price - pos.entry_price) * pos.amount;
            }
        }

        let mut spot_tokens: Vec<&String> = self.wallet.keys().collect();
        spot_tokens.sort_unstable();
        for token in spot_tokens {
            let amount = self.wallet[token];
            if token == &self.base_token || amount == 0.0 {
                continue;
            }
            if self.positions.contains_key(token) {
                continue;
            }
            if let Some(&price) = prices.get(token) {
                total += amount * price;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(usdc: f64) -> HashMap<String, f64> {
        let mut w = HashMap::new();
        w.insert("USDC".to_string(), usdc);
        w
    }

    #[test]
    fn spot_round_trip_returns_to_start() {
        let mut acc = Accountant::new("USDC".to_string(), wallet(10000.0), ExchangeSettings::default());
        acc.commit_buy(10.0, 100.0, 1, false);
        acc.execute_buy("BTC", 10.0, 100.0, 1, false, 0);
        // Release is the caller's job (proportional to the order's fill),
        // not `execute_buy`'s - a real caller does this via
        // `SimulatedOrder::commitment_release_for_fill`.
        acc.release("USDC", 10.0 * 100.0);
        assert!((acc.wallet_amount("BTC") - 10.0).abs() < EPSILON);
        assert!((acc.wallet_amount("USDC") - 9000.0).abs() < EPSILON);

        acc.commit_sell("BTC", 10.0, 100.0, 1, false);
        acc.execute_sell("BTC", 10.0, 100.0, 1, false, 60_000);
        acc.release("BTC", 10.0);
        assert!((acc.wallet_amount("BTC")).abs() < EPSILON);
        assert!((acc.wallet_amount("USDC") - 10000.0).abs() < 1e-6);
        assert!((acc.committed_amount("USDC")).abs() < EPSILON);
        assert!((acc.committed_amount("BTC")).abs() < EPSILON);
    }

    #[test]
    fn futures_long_open_and_profit_target() {
        let mut acc = Accountant::new("USDC".to_string(), wallet(1000.0), ExchangeSettings::default());
        acc.commit_buy(1.0, 100.0, 5, true);
        acc.execute_buy("BTC", 1.0, 100.0, 5, true, 0);
        let pos = acc.position("BTC").unwrap();
        assert!((pos.margin_used - 20.0).abs() < EPSILON);
        assert!((acc.wallet_amount("USDC") - 980.0).abs() < EPSILON);

        let hit = acc.check_position_triggers("BTC", 112.0);
        // no triggers configured yet
        assert!(!hit.stop_loss && !hit.profit_target);

        acc.set_position_triggers(
            "BTC",
            None,
            Some(TriggerConfig::Percentage(10.0)),
        );
        let hit = acc.check_position_triggers("BTC", 112.0);
        assert!(hit.profit_target);

        let outcome = acc.execute_sell("BTC", 1.0, 112.0, 5, true, 2000);
        assert!((outcome.realized_pnl.unwrap() - 12.0).abs() < EPSILON);
        assert!(acc.position("BTC").is_none());
        assert!((acc.wallet_amount("USDC") - 1012.0).abs() < 1e-6);
    }

    #[test]
    fn stop_loss_precedes_profit_target_on_tie() {
        let mut acc = Accountant::new("USDC".to_string(), wallet(1000.0), ExchangeSettings::default());
        acc.commit_buy(1.0, 100.0, 1, true);
        acc.execute_buy("BTC", 1.0, 100.0, 1, true, 0);
        acc.set_position_triggers(
            "BTC",
            Some(TriggerConfig::Percentage(5.0)),
            Some(TriggerConfig::Percentage(5.0)),
        );
        let hit = acc.check_position_triggers("BTC", 95.0);
        assert!(hit.stop_loss);
        assert!(!hit.profit_target);
    }

    #[test]
    fn reversing_position_crosses_atomically() {
        let mut acc = Accountant::new("USDC".to_string(), wallet(1000.0), ExchangeSettings::default());
        acc.commit_buy(2.0, 100.0, 1, true);
        acc.execute_buy("BTC", 2.0, 100.0, 1, true, 0);
        // sell 3: closes the long 2 and opens a short 1
        acc.commit_sell("BTC", 3.0, 100.0, 1, true);
        let outcome = acc.execute_sell("BTC", 3.0, 100.0, 1, true, 1000);
        assert!(outcome.realized_pnl.is_some());
        let pos = acc.position("BTC").unwrap();
        assert!((pos.amount + 1.0).abs() < EPSILON);
    }

    #[test]
    fn liquidate_all_skips_unknown_price() {
        let mut acc = Accountant::new("USDC".to_string(), wallet(1000.0), ExchangeSettings::default());
        acc.commit_buy(1.0, 100.0, 1, true);
        acc.execute_buy("BTC", 1.0, 100.0, 1, true, 0);
        acc.liquidate_all(&HashMap::new());
        assert!(acc.position("BTC").is_some());
    }

    #[test]
    fn available_never_negative() {
        let mut acc = Accountant::new("USDC".to_string(), wallet(100.0), ExchangeSettings::default());
        acc.commit_buy(1.0, 1000.0, 1, false);
        assert_eq!(acc.available("USDC"), 0.0);
    }
}
