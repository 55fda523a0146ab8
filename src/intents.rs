use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::{Direction, Side};

/// Reason a `Cancel` intent was raised, per §4.3's reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    SideMismatch,
    OutsideGrid,
    Rebuild,
}

/// An action the engine wants taken against the exchange. Intents are
/// pure data, the executor (§4.4) is the only component that talks to
/// the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Intent {
    PlaceLimit(PlaceLimitIntent),
    Cancel(CancelIntent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceLimitIntent {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub grid_level: i32,
    pub direction: Direction,
    pub reduce_only: bool,
    pub client_order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelIntent {
    pub symbol: String,
    pub order_id: String,
    pub reason: CancelReason,
}

/// Status of a tracked order, per §3. Transitions are one-way except
/// that reconciler injection starts directly at `Placed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatusTracked {
    Pending,
    Placed,
    Filled,
    Cancelled,
    Failed,
}

/// A locally tracked order, created when an intent is dispatched or
/// injected by the reconciler from the exchange's open-orders view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedOrder {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub intent: Option<Intent>,
    pub status: OrderStatusTracked,
    pub placed_ts: DateTime<Utc>,
}

impl TrackedOrder {
    pub fn new_pending(client_order_id: String, intent: Intent, now: DateTime<Utc>) -> Self {
        Self {
            client_order_id,
            exchange_order_id: None,
            intent: Some(intent),
            status: OrderStatusTracked::Pending,
            placed_ts: now,
        }
    }

    /// Reconciler injection path: an order discovered on the exchange
    /// with no corresponding local intent starts life already `Placed`.
    pub fn new_injected(client_order_id: String, exchange_order_id: String, now: DateTime<Utc>) -> Self {
        Self {
            client_order_id,
            exchange_order_id: Some(exchange_order_id),
            intent: None,
            status: OrderStatusTracked::Placed,
            placed_ts: now,
        }
    }

    pub fn mark_placed(&mut self, exchange_order_id: String) {
        self.exchange_order_id = Some(exchange_order_id);
        self.status = OrderStatusTracked::Placed;
    }

    pub fn mark_filled(&mut self) {
        self.status = OrderStatusTracked::Filled;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = OrderStatusTracked::Cancelled;
    }

    pub fn mark_failed(&mut self) {
        self.status = OrderStatusTracked::Failed;
    }

    /// Orders with `Pending` or `Placed` status block re-dispatch of an
    /// intent carrying the same `client_order_id` (idempotency, §9).
    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, OrderStatusTracked::Pending | OrderStatusTracked::Placed)
    }
}
