//! Grid Ladder: a pure sorted price-level data structure with Buy/Sell/Wait
//! tagging. Grounded on `packages/gridcore/tests/test_grid.py` in the
//! retrieval pack's original-source material.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal_ext::{is_too_close, round_to_tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridSide {
    Buy,
    Wait,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridLevel {
    pub price: Decimal,
    pub side: GridSide,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    pub grid_count: i32,
    pub grid_step: f64,
    pub rebalance_threshold: f64,
}

/// Sorted price ladder around an anchor. `anchor_price` is set only by
/// an explicit `build_grid()` call; the internal rebuild triggered from
/// `update_grid()` when `last_close` escapes the ladder range does NOT
/// touch it, per §4.1/§9 "anchor preservation across fills", the engine
/// layer relies on this to answer `get_anchor_price()` with the original
/// build center even after fills have shifted the Wait band.
#[derive(Debug, Clone)]
pub struct Grid {
    pub tick_size: Decimal,
    pub config: GridConfig,
    levels: Vec<GridLevel>,
    anchor_price: Option<Decimal>,
}

impl Grid {
    pub fn new(tick_size: Decimal, config: GridConfig) -> Self {
        Self { tick_size, config, levels: Vec::new(), anchor_price: None }
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn anchor_price(&self) -> Option<Decimal> {
        self.anchor_price
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn min_price(&self) -> Option<Decimal> {
        self.levels.first().map(|l| l.price)
    }

    pub fn max_price(&self) -> Option<Decimal> {
        self.levels.last().map(|l| l.price)
    }

    /// Builds `grid_count + 1` levels centered on `last_price`. Always
    /// resets the recorded anchor to the new center, a direct call to
    /// `build_grid` always re-anchors, unlike the internal rebuild path
    /// inside `update_grid`.
    pub fn build_grid(&mut self, last_price: Decimal) {
        self.levels = self.build_levels_around(last_price);
        self.anchor_price = Some(round_to_tick(last_price, self.tick_size));
    }

    fn build_levels_around(&self, center: Decimal) -> Vec<GridLevel> {
        let half = self.config.grid_count / 2;
        let mut levels = Vec::with_capacity((self.config.grid_count + 1) as usize);
        for i in -half..=half {
            let side = if i < 0 {
                GridSide::Buy
            } else if i > 0 {
                GridSide::Sell
            } else {
                GridSide::Wait
            };
            let multiplier = 1.0 + (i as f64) * self.config.grid_step / 100.0;
            let raw_price = center * Decimal::try_from(multiplier).unwrap_or(Decimal::ONE);
            levels.push(GridLevel { price: round_to_tick(raw_price, self.tick_size), side });
        }
        levels
    }

    /// `is_price_sorted`: strictly ascending, no duplicates.
    pub fn is_price_sorted(&self) -> bool {
        self.levels.windows(2).all(|w| w[0].price < w[1].price)
    }

    /// `is_grid_correct`: the side sequence matches
    /// `Buy+ (Wait+ Sell+ | Sell+) | Wait+ Sell+`, grouped by run, the
    /// valid shapes are exactly `[Buy, Wait, Sell]`, `[Buy, Sell]`, or
    /// `[Wait, Sell]`. An all-one-kind ladder fails.
    pub fn is_grid_correct(&self) -> bool {
        if !self.is_price_sorted() {
            return false;
        }
        let mut groups: Vec<GridSide> = Vec::new();
        for level in &self.levels {
            if groups.last() != Some(&level.side) {
                groups.push(level.side);
            }
        }
        matches!(
            groups.as_slice(),
            [GridSide::Buy, GridSide::Wait, GridSide::Sell] | [GridSide::Buy, GridSide::Sell] | [GridSide::Wait, GridSide::Sell]
        )
    }

    /// Update on fill (§4.1). Rebuilds around `last_close` if it has
    /// escaped the ladder's range (preserving the original anchor);
    /// otherwise re-tags sides and evaluates recentering. No-op if the
    /// ladder is empty or `last_close` is unknown.
    pub fn update_grid(&mut self, last_filled_price: Option<Decimal>, last_close: Option<Decimal>) {
        let Some(last_close) = last_close else { return };
        if self.levels.is_empty() {
            return;
        }

        let (min_price, max_price) = (self.min_price().unwrap(), self.max_price().unwrap());
        if last_close < min_price || last_close > max_price {
            self.levels = self.build_levels_around(last_close);
            return;
        }

        self.retag_sides(last_filled_price, last_close);
        self.recenter_if_imbalanced(last_close);
    }

    fn retag_sides(&mut self, last_filled_price: Option<Decimal>, last_close: Decimal) {
        for level in &mut self.levels {
            let too_close_to_close = is_too_close(level.price, last_close, self.config.grid_step);
            let too_close_to_fill = last_filled_price
                .map(|p| is_too_close(level.price, p, self.config.grid_step))
                .unwrap_or(false);
            level.side = if too_close_to_close || too_close_to_fill {
                GridSide::Wait
            } else if level.price < last_close {
                GridSide::Buy
            } else {
                GridSide::Sell
            };
        }
    }

    /// Recenter at most once per update: if the Buy/Sell imbalance
    /// exceeds `rebalance_threshold`, shift the ladder one level toward
    /// the heavier side (append a new level at that end, drop one from
    /// the opposite end), then re-tag. The anchor is never shifted.
    fn recenter_if_imbalanced(&mut self, last_close: Decimal) {
        let buys = self.levels.iter().filter(|l| l.side == GridSide::Buy).count();
        let sells = self.levels.iter().filter(|l| l.side == GridSide::Sell).count();
        let total = buys + sells;
        if total == 0 {
            return;
        }
        let imbalance = (buys as f64 - sells as f64).abs() / total as f64;
        if imbalance <= self.config.rebalance_threshold {
            return;
        }

        if buys > sells {
            // Heavier on the buy (low) side: extend further down, drop the top.
            let min_price = self.min_price().unwrap();
            let step = Decimal::try_from(1.0 - self.config.grid_step / 100.0).unwrap_or(Decimal::ONE);
            let new_price = round_to_tick(min_price * step, self.tick_size);
            self.levels.insert(0, GridLevel { price: new_price, side: GridSide::Buy });
            self.levels.pop();
        } else {
            // Heavier on the sell (high) side: extend further up, drop the bottom.
            let max_price = self.max_price().unwrap();
            let step = Decimal::try_from(1.0 + self.config.grid_step / 100.0).unwrap_or(Decimal::ONE);
            let new_price = round_to_tick(max_price * step, self.tick_size);
            self.levels.push(GridLevel { price: new_price, side: GridSide::Sell });
            self.levels.remove(0);
        }

        self.retag_sides(None, last_close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> GridConfig {
        GridConfig { grid_count: 50, grid_step: 0.2, rebalance_threshold: 0.3 }
    }

    #[test]
    fn test_build_grid_has_51_levels_centered_on_wait() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        assert_eq!(grid.levels().len(), 51);
        assert_eq!(grid.anchor_price(), Some(dec!(100000.0)));
        let center = grid.levels()[25];
        assert_eq!(center.side, GridSide::Wait);
        assert_eq!(center.price, dec!(100000.0));
        assert_eq!(grid.levels()[0].side, GridSide::Buy);
        assert_eq!(grid.levels()[50].side, GridSide::Sell);
    }

    #[test]
    fn test_build_grid_is_correct_and_sorted() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        assert!(grid.is_price_sorted());
        assert!(grid.is_grid_correct());
    }

    #[test]
    fn test_build_idempotent_on_same_args() {
        let mut a = Grid::new(dec!(0.1), config());
        a.build_grid(dec!(100000.0));
        let mut b = Grid::new(dec!(0.1), config());
        b.build_grid(dec!(100000.0));
        assert_eq!(a.levels().len(), b.levels().len());
        for (la, lb) in a.levels().iter().zip(b.levels().iter()) {
            assert_eq!(la.price, lb.price);
            assert_eq!(la.side, lb.side);
        }
    }

    #[test]
    fn test_rebuild_centers_on_new_price_and_resets_anchor() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        grid.build_grid(dec!(105000.0));
        assert_eq!(grid.anchor_price(), Some(dec!(105000.0)));
    }

    #[test]
    fn test_update_grid_out_of_bounds_preserves_anchor() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        let original_anchor = grid.anchor_price();
        let far_price = grid.max_price().unwrap() + dec!(1000.0);
        grid.update_grid(None, Some(far_price));
        // Ladder rebuilt around far_price...
        assert!(grid.min_price().unwrap() <= far_price);
        assert!(grid.max_price().unwrap() >= far_price);
        // ...but the Grid-level anchor field is untouched by the internal rebuild.
        assert_eq!(grid.anchor_price(), original_anchor);
    }

    #[test]
    fn test_update_grid_retags_without_rebuild_when_in_range() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        let before_len = grid.levels().len();
        grid.update_grid(Some(dec!(99900.0)), Some(dec!(99950.0)));
        assert_eq!(grid.levels().len(), before_len);
        assert!(grid.is_grid_correct());
    }

    #[test]
    fn test_update_grid_none_last_close_is_noop() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        let before = grid.levels().to_vec();
        grid.update_grid(Some(dec!(99900.0)), None);
        assert_eq!(grid.levels().iter().map(|l| l.price).collect::<Vec<_>>(), before.iter().map(|l| l.price).collect::<Vec<_>>());
    }

    #[test]
    fn test_too_close_levels_become_wait() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        // last_filled_price equal to a level's own price must mark it Wait.
        let some_price = grid.levels()[10].price;
        grid.update_grid(Some(some_price), Some(dec!(100000.0)));
        let level = grid.levels().iter().find(|l| l.price == some_price).unwrap();
        assert_eq!(level.side, GridSide::Wait);
    }

    #[test]
    fn test_all_one_kind_sequence_is_invalid() {
        let mut grid = Grid::new(dec!(0.1), config());
        grid.build_grid(dec!(100000.0));
        for level in grid.levels.iter_mut() {
            level.side = GridSide::Buy;
        }
        assert!(!grid.is_grid_correct());
    }

    proptest::proptest! {
        #[test]
        fn prop_build_always_sorted_and_correct(
            grid_count in (2i32..200).prop_map(|n| n - n % 2),
            grid_step in 0.01f64..5.0,
            tick in 1i64..1000,
            anchor in 1000i64..500_000,
        ) {
            let tick_size = Decimal::new(tick, 2);
            let mut grid = Grid::new(tick_size, GridConfig { grid_count, grid_step, rebalance_threshold: 0.3 });
            grid.build_grid(Decimal::new(anchor, 0));
            prop_assert!(grid.is_price_sorted());
            prop_assert!(grid.is_grid_correct());
            prop_assert_eq!(grid.levels().len() as i32, grid_count + 1);
        }
    }
}
