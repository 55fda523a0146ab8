use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side as reported by the exchange ("Buy"/"Sell"), distinct from
/// a grid level's `GridSide` (which also has `Wait`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Position direction. A strategy always runs one long and one short
/// position manager, linked to each other (see `crate::position`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// Order status as reported by the exchange's private order stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Normalized market/account event consumed by the grid engine. All
/// variants carry `symbol`/`exchange_ts`/`local_ts`; normalization from
/// Bybit wire messages to this type happens in the external gateway
/// (out of scope here, see SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Ticker(TickerEvent),
    Execution(ExecutionEvent),
    OrderUpdate(OrderUpdateEvent),
    /// Consumed by the auxiliary recorder, not by the core engine.
    PublicTrade(PublicTradeEvent),
}

impl Event {
    pub fn symbol(&self) -> &str {
        match self {
            Event::Ticker(e) => &e.symbol,
            Event::Execution(e) => &e.symbol,
            Event::OrderUpdate(e) => &e.symbol,
            Event::PublicTrade(e) => &e.symbol,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerEvent {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub local_ts: DateTime<Utc>,
    pub last_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub bid_price: Option<Decimal>,
    pub ask_price: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub local_ts: DateTime<Utc>,
    pub exec_id: String,
    pub order_id: String,
    pub order_link_id: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub closed_pnl: Decimal,
    pub leaves_qty: Decimal,
    pub closed_size: Decimal,
}

impl ExecutionEvent {
    /// A fully filled execution leaves nothing resting on the book.
    pub fn is_fully_filled(&self) -> bool {
        self.leaves_qty.is_zero()
    }

    /// Whether this execution closed (part of) a position, per §4.6.
    pub fn is_closing(&self) -> bool {
        !self.closed_size.is_zero()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdateEvent {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub local_ts: DateTime<Utc>,
    pub order_id: String,
    pub order_link_id: String,
    pub status: OrderStatus,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub leaves_qty: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicTradeEvent {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub local_ts: DateTime<Utc>,
    pub trade_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}
