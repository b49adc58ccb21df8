//! Position Monitor
//!
//! Runs after the order processor on each tick: scans open positions for a
//! configured stop-loss/profit-target crossing and emits a synthetic market
//! close when one fires. Stop-loss takes precedence over profit-target in
//! the same tick (enforced by `Accountant::check_position_triggers`).

use crate::accountant::Accountant;
use crate::clock::Millis;
use crate::oracle::Oracle;
use crate::types::OrderAction;

/// Which trigger fired and the position amount that must now be closed.
#[derive(Debug, Clone, Copy)]
pub struct PositionTriggerEvent {
    pub token: String,
    pub stop_loss: bool,
    pub profit_target: bool,
    pub close_amount: f64,
    pub close_action: OrderAction,
    pub leverage: u32,
    pub at: Millis,
}

pub struct PositionMonitor {
    audit_log: Vec<PositionTriggerEvent>,
}

impl PositionMonitor {
    pub fn new() -> Self {
        Self {
            audit_log: Vec::new(),
        }
    }

    /// Scan every position with a configured trigger and return the set of
    /// closes the scheduler must now execute via the trade API.
    pub fn tick(&mut self, now: Millis, oracle: &mut Oracle, accountant: &Accountant) -> Vec<PositionTriggerEvent> {
        let mut events = Vec::new();
        for pos in accountant.positions_snapshot().values() {
            if pos.stop_loss.is_none() && pos.profit_target.is_none() {
                continue;
            }
            let Some(quote) = oracle.current_price(&pos.token) else {
                continue;
            };
            let hit = accountant.check_position_triggers(&pos.token, quote.price);
            if !hit.stop_loss && !hit.profit_target {
                continue;
            }
            let event = PositionTriggerEvent {
                token: pos.token.clone(),
                stop_loss: hit.stop_loss,
                profit_target: hit.profit_target,
                close_amount: pos.amount.abs(),
                close_action: if pos.is_long() {
                    OrderAction::Sell
                } else {
                    OrderAction::Buy
                },
                leverage: pos.leverage,
                at: now,
            };
            self.audit_log.push(event);
            events.push(event);
        }
        events
    }

    pub fn audit_log(&self) -> &[PositionTriggerEvent] {
        &self.audit_log
    }
}

impl Default for PositionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExchangeSettings, TriggerConfig};
    use std::collections::HashMap;

    #[test]
    fn emits_one_event_on_stop_loss_tie() {
        let mut wallet = HashMap::new();
        wallet.insert("USDC".to_string(), 1000.0);
        let mut acc = Accountant::new("USDC".to_string(), wallet, ExchangeSettings::default());
        acc.commit_buy(1.0, 100.0, 1, true);
        acc.execute_buy("BTC", 1.0, 100.0, 1, true, 0);
        acc.set_position_triggers(
            "BTC",
            Some(TriggerConfig::Percentage(5.0)),
            Some(TriggerConfig::Percentage(5.0)),
        );

        let mut oracle = Oracle::new(0.0, 1);
        oracle.update("BTC", 95.0, 1000);

        let mut monitor = PositionMonitor::new();
        let events = monitor.tick(1000, &mut oracle, &acc);
        assert_eq!(events.len(), 1);
        assert!(events[0].stop_loss);
        assert!(!events[0].profit_target);
        assert_eq!(events[0].close_action, OrderAction::Sell);
    }

    #[test]
    fn no_event_without_triggers_configured() {
        let mut wallet = HashMap::new();
        wallet.insert("USDC".to_string(), 1000.0);
        let mut acc = Accountant::new("USDC".to_string(), wallet, ExchangeSettings::default());
        acc.commit_buy(1.0, 100.0, 1, true);
        acc.execute_buy("BTC", 1.0, 100.0, 1, true, 0);

        let mut oracle = Oracle::new(0.0, 1);
        oracle.update("BTC", 50.0, 1000);

        let mut monitor = PositionMonitor::new();
        let events = monitor.tick(1000, &mut oracle, &acc);
        assert!(events.is_empty());
    }
}
