//! Order Book & Lifecycle
//!
//! Owns every `SimulatedOrder` by id and an insertion-ordered index so the
//! trade report reads in creation order. Not concurrent - all access is
//! serialized by the scheduler; nothing here locks.

use crate::clock::Millis;
use crate::types::{OrderAction, OrderStatus, OrderType, Segment, TriggerConfig, EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type OrderId = Uuid;

/// A single simulated order. Owned exclusively by the `OrderBook`; other
/// components hold `OrderId` keys only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedOrder {
    pub id: OrderId,
    pub action: OrderAction,
    pub token: String,
    pub base_token: String,
    pub requested_amount: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub order_type: OrderType,
    pub requested_price: Option<f64>,
    pub execution_price: Option<f64>,
    pub leverage: u32,
    pub is_futures: bool,
    pub status: OrderStatus,
    pub created_at: Millis,
    pub last_updated_at: Millis,
    pub scheduled_fill_time: Option<Millis>,
    pub total_cost: f64,
    pub reason: Option<String>,
    /// Token the commitment reservation for this order sits in (the base
    /// token for buys and futures short-opens, `token` itself for spot
    /// sells, unset for a futures long-close which reserves nothing new).
    pub committed_token: String,
    /// Total amount reserved in `committed_token` when the order was
    /// placed. Released proportionally as fills land (see
    /// `order_processor`), and in full on cancel/reject.
    pub committed_reserve: f64,
    /// Stop-loss/profit-target requested alongside a futures order.
    /// Carried on the order (rather than attached to the position at
    /// placement time) because under `delayed`/`gradual` fill strategies
    /// the position this order will open does not exist yet - it is
    /// attached to the position once a fill actually opens or extends it.
    pub stop_loss: Option<TriggerConfig>,
    pub profit_target: Option<TriggerConfig>,
}

impl SimulatedOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        action: OrderAction,
        token: String,
        base_token: String,
        requested_amount: f64,
        order_type: OrderType,
        requested_price: Option<f64>,
        leverage: u32,
        is_futures: bool,
        created_at: Millis,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            token,
            base_token,
            requested_amount,
            filled_amount: 0.0,
            remaining_amount: requested_amount,
            order_type,
            requested_price,
            execution_price: None,
            leverage,
            is_futures,
            status: OrderStatus::Pending,
            created_at,
            last_updated_at: created_at,
            scheduled_fill_time: None,
            total_cost: 0.0,
            reason: None,
            committed_token: String::new(),
            committed_reserve: 0.0,
            stop_loss: None,
            profit_target: None,
        }
    }

    /// Record the commitment reservation taken for this order at placement.
    pub fn set_commitment(&mut self, token: impl Into<String>, amount: f64) {
        self.committed_token = token.into();
        self.committed_reserve = amount;
    }

    /// Share of the original commitment still outstanding, proportional to
    /// what remains unfilled.
    pub fn outstanding_commitment(&self) -> f64 {
        if self.requested_amount <= 0.0 {
            0.0
        } else {
            self.committed_reserve * self.remaining_amount / self.requested_amount
        }
    }

    /// Share of the original commitment released by a fill of `delta` units.
    pub fn commitment_release_for_fill(&self, delta: f64) -> f64 {
        if self.requested_amount <= 0.0 {
            0.0
        } else {
            self.committed_reserve * delta / self.requested_amount
        }
    }

    pub fn segment(&self) -> Segment {
        if self.is_futures {
            Segment::Futures
        } else {
            Segment::Spot
        }
    }

    /// `filled / requested`, `0.0` for a zero-size order.
    pub fn fill_progress(&self) -> f64 {
        if self.requested_amount <= 0.0 {
            0.0
        } else {
            self.filled_amount / self.requested_amount
        }
    }

    /// Apply a fill of `delta` units at `price`. Commutative per order:
    /// repeated partial fills accumulate into a volume-weighted average
    /// execution price. Updates status to `Filled` once the remainder is
    /// within `EPSILON` of zero, otherwise `Partial`.
    pub fn apply_fill(&mut self, delta: f64, price: f64, now: Millis) {
        debug_assert!(delta > 0.0, "fill delta must be positive");
        self.filled_amount += delta;
        self.total_cost += delta * price;
        self.execution_price = Some(self.total_cost / self.filled_amount);
        self.remaining_amount = (self.requested_amount - self.filled_amount).max(0.0);
        self.status = if self.remaining_amount < EPSILON {
            self.remaining_amount = 0.0;
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.last_updated_at = now;
    }

    pub fn mark_open(&mut self, now: Millis) {
        self.status = OrderStatus::Open;
        self.last_updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: Millis, reason: impl Into<String>) {
        self.status = OrderStatus::Cancelled;
        self.reason = Some(reason.into());
        self.last_updated_at = now;
    }

    pub fn mark_rejected(&mut self, now: Millis, reason: impl Into<String>) {
        self.status = OrderStatus::Rejected;
        self.reason = Some(reason.into());
        self.last_updated_at = now;
    }
}

/// Owns every order, keyed by id, plus an append-only creation-order index.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: HashMap<OrderId, SimulatedOrder>,
    sequence: Vec<OrderId>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, order: SimulatedOrder) -> OrderId {
        let id = order.id;
        self.sequence.push(id);
        self.orders.insert(id, order);
        id
    }

    /// Replace the order with the same id. Panics if the id is unknown -
    /// callers always `get` before `update`.
    pub fn update(&mut self, order: SimulatedOrder) {
        let id = order.id;
        self.orders
            .insert(id, order)
            .expect("update called on an order not previously added");
    }

    pub fn get(&self, id: OrderId) -> Option<&SimulatedOrder> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut SimulatedOrder> {
        self.orders.get_mut(&id)
    }

    /// Orders not yet in a terminal state, in creation order.
    pub fn active_orders(&self) -> impl Iterator<Item = &SimulatedOrder> {
        self.sequence
            .iter()
            .filter_map(move |id| self.orders.get(id))
            .filter(|o| o.status.is_active())
    }

    /// Active order ids, in creation order (stable to iterate while mutating).
    pub fn active_order_ids(&self) -> Vec<OrderId> {
        self.active_orders().map(|o| o.id).collect()
    }

    pub fn filled_orders(&self) -> impl Iterator<Item = &SimulatedOrder> {
        self.sequence
            .iter()
            .filter_map(move |id| self.orders.get(id))
            .filter(|o| o.status == OrderStatus::Filled)
    }

    pub fn all_in_order(&self) -> impl Iterator<Item = &SimulatedOrder> {
        self.sequence.iter().filter_map(move |id| self.orders.get(id))
    }
}
