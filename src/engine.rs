//! Grid Engine: the stateful event processor that drives a `Grid` ladder
//! from market/account events and emits place/cancel intents. Grounded on
//! `packages/gridcore/gridcore/engine.py` and its tests in the retrieval
//! pack's original-source material.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::decimal_ext::{percent_distance_from, round_to_tick};
use crate::events::{Direction, Event, OrderStatus, Side};
use crate::grid::{Grid, GridSide};
use crate::ids::client_order_id;
use crate::intents::{CancelIntent, CancelReason, Intent, PlaceLimitIntent};
use crate::position::AmountMultiplier;

/// An order the exchange reports as currently open, as seen by the
/// engine's reconciliation pass (§4.3). `direction` disambiguates the
/// two parallel (long, short) intents a single grid level can carry.
#[derive(Debug, Clone)]
pub struct ExistingOrder {
    pub order_id: String,
    pub price: Decimal,
    pub side: Side,
    pub direction: Direction,
}

/// Quantities and multipliers needed to size intents at emission time.
/// Kept separate from `PositionRiskManager` so the engine stays testable
/// without constructing a linked risk pair (§8 "Engine behavior" tests
/// exercise intent counts/ids, not sizing).
#[derive(Debug, Clone, Copy)]
pub struct GridSizing {
    pub base_qty: Decimal,
    pub long_multiplier: AmountMultiplier,
    pub short_multiplier: AmountMultiplier,
    /// Already resolved by the caller (1.0 if the long_koef guard doesn't
    /// apply this tick); applied only to the long direction's Buy (open)
    /// quantity, per §4.2's "long-biasing coefficient".
    pub long_koef_effective: f64,
}

impl GridSizing {
    fn qty_for(&self, level_side: GridSide, direction: Direction) -> Decimal {
        let (multiplier, koef) = match direction {
            Direction::Long => (self.long_multiplier, self.long_koef_effective),
            Direction::Short => (self.short_multiplier, 1.0),
        };
        let side_multiplier = match level_side {
            GridSide::Buy => multiplier.buy,
            GridSide::Sell => multiplier.sell,
            GridSide::Wait => return Decimal::ZERO,
        };
        let scale = side_multiplier * koef;
        (self.base_qty * Decimal::try_from(scale).unwrap_or(Decimal::ONE)).max(Decimal::ZERO)
    }
}

/// Whether `direction` treats `side` as opening a new position or
/// reducing an existing one, per §4.3's reduce-only rule.
fn is_reduce_only(direction: Direction, side: Side) -> bool {
    match (direction, side) {
        (Direction::Long, Side::Sell) => true,
        (Direction::Long, Side::Buy) => false,
        (Direction::Short, Side::Buy) => true,
        (Direction::Short, Side::Sell) => false,
    }
}

fn grid_side_to_order_side(side: GridSide) -> Option<Side> {
    match side {
        GridSide::Buy => Some(Side::Buy),
        GridSide::Sell => Some(Side::Sell),
        GridSide::Wait => None,
    }
}

/// Stateful per-symbol grid processor: `{grid ladder, last_close?,
/// last_filled_price?, pending_orders}` per §4.3.
pub struct GridEngine {
    pub symbol: String,
    grid: Grid,
    last_close: Option<Decimal>,
    last_filled_price: Option<Decimal>,
    /// `client_order_id -> exchange_order_id`, tracked purely from
    /// OrderUpdate/Execution bookkeeping (§4.3's three event contracts).
    pending_orders: HashMap<String, String>,
}

impl GridEngine {
    pub fn new(symbol: impl Into<String>, grid: Grid) -> Self {
        Self { symbol: symbol.into(), grid, last_close: None, last_filled_price: None, pending_orders: HashMap::new() }
    }

    /// The original build center, surviving fills that shift the Wait
    /// band, delegates to the ladder, which only resets this on a
    /// direct `build_grid` call (never from `update_grid`'s internal
    /// out-of-bounds rebuild).
    pub fn get_anchor_price(&self) -> Option<Decimal> {
        self.grid.anchor_price()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.last_close
    }

    pub fn record_order_placed(&mut self, client_order_id: String, exchange_order_id: String) {
        self.pending_orders.insert(client_order_id, exchange_order_id);
    }

    /// Dispatches one normalized event, returning the intents it
    /// produces (empty for Execution/OrderUpdate per §4.3).
    pub fn handle_event(&mut self, event: &Event, existing_orders: &[ExistingOrder], sizing: &GridSizing) -> Vec<Intent> {
        match event {
            Event::Ticker(t) => self.on_ticker(t.last_price, existing_orders, sizing),
            Event::Execution(e) => {
                self.on_execution(e.price, e.order_link_id.clone());
                Vec::new()
            }
            Event::OrderUpdate(o) => {
                self.on_order_update(o.order_link_id.clone(), o.status);
                Vec::new()
            }
            Event::PublicTrade(_) => Vec::new(),
        }
    }

    fn on_execution(&mut self, price: Decimal, order_link_id: String) {
        self.last_filled_price = Some(price);
        self.pending_orders.remove(&order_link_id);
        if self.last_close.is_some() {
            self.grid.update_grid(self.last_filled_price, self.last_close);
        }
    }

    fn on_order_update(&mut self, order_link_id: String, status: OrderStatus) {
        match status {
            OrderStatus::New | OrderStatus::PartiallyFilled => {
                self.pending_orders.entry(order_link_id).or_insert_with(String::new);
            }
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => {
                self.pending_orders.remove(&order_link_id);
            }
        }
    }

    fn on_ticker(&mut self, last_price: Decimal, existing_orders: &[ExistingOrder], sizing: &GridSizing) -> Vec<Intent> {
        if self.grid.is_empty() {
            let center = self.grid.anchor_price().unwrap_or(last_price);
            self.grid.build_grid(center);
        }
        self.last_close = Some(last_price);
        let last_close = last_price;

        let grid_count = self.grid.config.grid_count;
        if existing_orders.len() as i32 > grid_count + 10 {
            let intents = existing_orders
                .iter()
                .map(|o| Intent::Cancel(CancelIntent { symbol: self.symbol.clone(), order_id: o.order_id.clone(), reason: CancelReason::Rebuild }))
                .collect();
            self.grid.build_grid(last_close);
            return intents;
        }

        let order_count = existing_orders.len() as i32;
        if order_count > 0 && order_count < grid_count {
            self.grid.update_grid(self.last_filled_price, Some(last_close));
        }

        let mut intents = Vec::new();
        let tick_size = self.grid.tick_size;
        let grid_step = self.grid.config.grid_step;

        // (price, side, direction) slots already scheduled by a step-3
        // side-mismatch replacement, so step 4 doesn't re-emit them: the
        // stale order still reflects the old side, so a naive "covered"
        // check against `existing_orders` would miss these.
        let mut replaced_slots: Vec<(Decimal, Side, Direction)> = Vec::new();

        for order in existing_orders {
            let matched = self
                .grid
                .levels()
                .iter()
                .find(|level| round_to_tick(level.price, tick_size) == round_to_tick(order.price, tick_size));
            match matched {
                None => {
                    intents.push(Intent::Cancel(CancelIntent {
                        symbol: self.symbol.clone(),
                        order_id: order.order_id.clone(),
                        reason: CancelReason::OutsideGrid,
                    }));
                }
                Some(level) => {
                    let expected_side = grid_side_to_order_side(level.side);
                    if expected_side != Some(order.side) {
                        intents.push(Intent::Cancel(CancelIntent {
                            symbol: self.symbol.clone(),
                            order_id: order.order_id.clone(),
                            reason: CancelReason::SideMismatch,
                        }));
                        if let Some(correct_side) = expected_side {
                            intents.push(self.place_intent_for(level.price, correct_side, order.direction, sizing));
                            replaced_slots.push((round_to_tick(level.price, tick_size), correct_side, order.direction));
                        }
                    }
                }
            }
        }

        for level in self.grid.levels() {
            let Some(side) = grid_side_to_order_side(level.side) else { continue };
            let distance = percent_distance_from(level.price, last_close);
            let clears_distance = distance > grid_step / 2.0;
            let correct_direction_side = match side {
                Side::Buy => level.price < last_close,
                Side::Sell => level.price > last_close,
            };
            if !clears_distance || !correct_direction_side {
                continue;
            }
            let level_price = round_to_tick(level.price, tick_size);
            for direction in [Direction::Long, Direction::Short] {
                if replaced_slots.contains(&(level_price, side, direction)) {
                    continue;
                }
                let covered = existing_orders
                    .iter()
                    .any(|o| round_to_tick(o.price, tick_size) == level_price && o.side == side && o.direction == direction);
                if !covered {
                    intents.push(self.place_intent_for(level.price, side, direction, sizing));
                }
            }
        }

        intents
    }

    fn place_intent_for(&self, price: Decimal, side: Side, direction: Direction, sizing: &GridSizing) -> Intent {
        let grid_level = self.grid.levels().iter().position(|l| l.price == price).map(|i| i as i32 - self.grid.config.grid_count / 2).unwrap_or(0);
        let side_label = match side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        };
        let level_side = match side {
            Side::Buy => GridSide::Buy,
            Side::Sell => GridSide::Sell,
        };
        let qty = sizing.qty_for(level_side, direction);
        let id = client_order_id(&self.symbol, side_label, price, grid_level, direction);
        Intent::PlaceLimit(PlaceLimitIntent {
            symbol: self.symbol.clone(),
            side,
            price,
            qty,
            grid_level,
            direction,
            reduce_only: is_reduce_only(direction, side),
            client_order_id: id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridConfig;
    use rust_decimal_macros::dec;

    fn sizing() -> GridSizing {
        GridSizing {
            base_qty: dec!(0.001),
            long_multiplier: AmountMultiplier { buy: 1.0, sell: 1.0 },
            short_multiplier: AmountMultiplier { buy: 1.0, sell: 1.0 },
            long_koef_effective: 1.0,
        }
    }

    fn engine() -> GridEngine {
        let grid = Grid::new(dec!(0.1), GridConfig { grid_count: 50, grid_step: 0.2, rebalance_threshold: 0.3 });
        GridEngine::new("BTCUSDT", grid)
    }

    #[test]
    fn test_ticker_on_empty_ladder_builds_around_last_price() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        assert_eq!(e.get_anchor_price(), Some(dec!(100000.0)));
    }

    #[test]
    fn test_ticker_builds_around_anchor_hint_not_last_price() {
        let mut e = engine();
        // Simulate a restart: anchor already known from persisted state,
        // ladder not yet rebuilt in memory.
        e.grid.build_grid(dec!(99000.0));
        let anchor_before = e.get_anchor_price();
        e.on_ticker(dec!(105000.0), &[], &sizing());
        assert_eq!(e.get_anchor_price(), anchor_before);
    }

    #[test]
    fn test_too_many_orders_triggers_rebuild_cancel_all() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        let fake_orders: Vec<ExistingOrder> = (0..70)
            .map(|i| ExistingOrder { order_id: format!("o{i}"), price: dec!(100000.0) + Decimal::from(i), side: Side::Buy, direction: Direction::Long })
            .collect();
        let intents = e.on_ticker(dec!(105000.0), &fake_orders, &sizing());
        let cancels = intents.iter().filter(|i| matches!(i, Intent::Cancel(c) if c.reason == CancelReason::Rebuild)).count();
        assert_eq!(cancels, 70);
        assert_eq!(e.grid.levels().len(), 51);
    }

    #[test]
    fn test_side_mismatch_yields_cancel_and_replacement() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        let buy_level = e.grid.levels().iter().find(|l| l.side == GridSide::Buy).unwrap().price;
        let existing = vec![ExistingOrder { order_id: "o1".into(), price: buy_level, side: Side::Sell, direction: Direction::Long }];
        let intents = e.on_ticker(dec!(100000.0), &existing, &sizing());
        let cancel = intents.iter().any(|i| matches!(i, Intent::Cancel(c) if c.reason == CancelReason::SideMismatch && c.order_id == "o1"));
        assert!(cancel);
        let replace = intents.iter().any(|i| matches!(i, Intent::PlaceLimit(p) if p.price == buy_level && p.side == Side::Buy));
        assert!(replace);
    }

    #[test]
    fn test_side_mismatch_replacement_is_not_duplicated_by_placement_pass() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        let buy_level = e.grid.levels().iter().find(|l| l.side == GridSide::Buy).unwrap().price;
        let existing = vec![ExistingOrder { order_id: "o1".into(), price: buy_level, side: Side::Sell, direction: Direction::Long }];
        let intents = e.on_ticker(dec!(100000.0), &existing, &sizing());
        let replacements = intents
            .iter()
            .filter(|i| matches!(i, Intent::PlaceLimit(p) if p.price == buy_level && p.side == Side::Buy && p.direction == Direction::Long))
            .count();
        assert_eq!(replacements, 1);
    }

    #[test]
    fn test_order_outside_grid_yields_single_cancel() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        let existing = vec![ExistingOrder { order_id: "o1".into(), price: dec!(1.0), side: Side::Buy, direction: Direction::Long }];
        let intents = e.on_ticker(dec!(100000.0), &existing, &sizing());
        let cancels: Vec<_> = intents.iter().filter(|i| matches!(i, Intent::Cancel(c) if c.order_id == "o1")).collect();
        assert_eq!(cancels.len(), 1);
        assert!(matches!(cancels[0], Intent::Cancel(c) if c.reason == CancelReason::OutsideGrid));
    }

    #[test]
    fn test_no_place_within_min_distance_of_last_close() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        // Wait level itself (price == last_close) must never be placed.
        let intents = e.on_ticker(dec!(100000.0), &[], &sizing());
        let at_close = intents.iter().any(|i| matches!(i, Intent::PlaceLimit(p) if p.price == dec!(100000.0)));
        assert!(!at_close);
    }

    #[test]
    fn test_execution_generates_no_intents() {
        let mut e = engine();
        e.on_ticker(dec!(100000.0), &[], &sizing());
        let ev = Event::Execution(crate::events::ExecutionEvent {
            symbol: "BTCUSDT".into(),
            exchange_ts: chrono::Utc::now(),
            local_ts: chrono::Utc::now(),
            exec_id: "e1".into(),
            order_id: "o1".into(),
            order_link_id: "o1".into(),
            side: Side::Buy,
            price: dec!(99800.0),
            qty: dec!(0.001),
            fee: Decimal::ZERO,
            closed_pnl: Decimal::ZERO,
            leaves_qty: Decimal::ZERO,
            closed_size: Decimal::ZERO,
        });
        let intents = e.handle_event(&ev, &[], &sizing());
        assert!(intents.is_empty());
        assert_eq!(e.last_filled_price, Some(dec!(99800.0)));
    }
}
