//! Risk-Managed Position Multiplier: a linked long/short pair of rule
//! tables producing per-side order quantity multipliers from position
//! imbalance, liquidation proximity, and margin utilization. Grounded on
//! `packages/gridcore/tests/test_position.py` in the retrieval pack's
//! original-source material.

use std::cell::RefCell;
use std::rc::Rc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::events::Direction;

const OPPOSITE_MARGIN_EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskConfig {
    pub min_liq_ratio: f64,
    pub max_liq_ratio: f64,
    pub max_margin: f64,
    pub min_total_margin: f64,
    pub increase_same_position_on_low_margin: bool,
}

/// Per-direction snapshot built fresh from exchange data on each
/// position-update tick. `margin` is a *fraction of wallet balance*
/// (`position_value / wallet_balance`), not an absolute currency figure
///, easy to misread from the field name alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionState {
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub margin: f64,
    pub liquidation_price: Decimal,
    pub leverage: u32,
    pub position_value: Decimal,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AmountMultiplier {
    pub buy: f64,
    pub sell: f64,
}

/// One side (long or short) of a linked risk-manager pair. Construct
/// pairs ONLY through `create_linked_pair`, per §9's guidance against
/// raw mutual pointers, the opposite reference is a shared, reference-
/// counted interior-mutable cell rather than a pointer each side owns
/// independently.
pub struct PositionRiskManager {
    pub direction: Direction,
    pub risk_config: RiskConfig,
    multiplier: AmountMultiplier,
    opposite: Option<Rc<RefCell<PositionRiskManager>>>,
}

impl PositionRiskManager {
    fn new(direction: Direction, risk_config: RiskConfig) -> Self {
        Self {
            direction,
            risk_config,
            multiplier: AmountMultiplier { buy: 1.0, sell: 1.0 },
            opposite: None,
        }
    }

    /// Builds a linked long/short pair, each holding a shared handle to
    /// the other. `short_config` defaults to `long_config` when omitted.
    pub fn create_linked_pair(
        long_config: RiskConfig,
        short_config: Option<RiskConfig>,
    ) -> (Rc<RefCell<PositionRiskManager>>, Rc<RefCell<PositionRiskManager>>) {
        let long = Rc::new(RefCell::new(PositionRiskManager::new(Direction::Long, long_config)));
        let short = Rc::new(RefCell::new(PositionRiskManager::new(
            Direction::Short,
            short_config.unwrap_or(long_config),
        )));
        long.borrow_mut().opposite = Some(short.clone());
        short.borrow_mut().opposite = Some(long.clone());
        (long, short)
    }

    pub fn reset_amount_multiplier(&mut self) {
        self.multiplier = AmountMultiplier { buy: 1.0, sell: 1.0 };
    }

    pub fn get_amount_multiplier(&self) -> AmountMultiplier {
        self.multiplier
    }

    /// Evaluates this direction's rule table (§4.2) against its own and
    /// the opposite's current `PositionState`. The caller must already
    /// have reset both directions' multipliers this tick, evaluation
    /// never resets internally, since some rules write to the opposite
    /// side and an internal reset would clobber that write.
    pub fn calculate_amount_multiplier(
        &mut self,
        own: &PositionState,
        opposite: &PositionState,
        last_close: f64,
    ) -> Result<AmountMultiplier, CoreError> {
        let opposite_handle = self
            .opposite
            .clone()
            .ok_or_else(|| CoreError::RiskManagerNotLinked(direction_label(self.direction).to_string()))?;

        let entry_price = match own.entry_price {
            Some(p) if !p.is_zero() => p,
            _ => return Ok(self.multiplier),
        };
        let _ = entry_price;
        if last_close <= 0.0 {
            return Ok(self.multiplier);
        }

        let own_margin = own.margin;
        let opposite_margin = opposite.margin;
        let ratio = own_margin / opposite_margin.max(OPPOSITE_MARGIN_EPSILON);
        let total_margin = own_margin + opposite_margin;
        let liq_ratio = to_f64(own.liquidation_price) / last_close;
        let unrealized_pct = to_f64(own.unrealized_pnl);

        match self.direction {
            Direction::Long => self.apply_long_rules(liq_ratio, ratio, total_margin, unrealized_pct, &opposite_handle),
            Direction::Short => self.apply_short_rules(liq_ratio, ratio, total_margin, unrealized_pct, &opposite_handle),
        }

        Ok(self.multiplier)
    }

    fn apply_long_rules(
        &mut self,
        liq_ratio: f64,
        ratio: f64,
        total_margin: f64,
        unrealized_pct: f64,
        opposite: &Rc<RefCell<PositionRiskManager>>,
    ) {
        let cfg = self.risk_config;
        if liq_ratio > 1.05 * cfg.min_liq_ratio {
            self.multiplier.sell = 1.5;
        } else if liq_ratio > cfg.min_liq_ratio {
            opposite.borrow_mut().multiplier.sell = 0.5;
        } else if ratio > 0.94 && ratio < 1.05 && total_margin < cfg.min_total_margin {
            if cfg.increase_same_position_on_low_margin {
                self.multiplier.buy = 2.0;
            } else {
                opposite.borrow_mut().multiplier.sell = 0.5;
            }
        } else if ratio < 0.5 && unrealized_pct < 0.0 {
            self.multiplier.buy = 2.0;
        } else if ratio < 0.20 {
            self.multiplier.buy = 2.0;
        }
    }

    fn apply_short_rules(
        &mut self,
        liq_ratio: f64,
        ratio: f64,
        total_margin: f64,
        unrealized_pct: f64,
        opposite: &Rc<RefCell<PositionRiskManager>>,
    ) {
        let cfg = self.risk_config;
        if liq_ratio > 0.95 * cfg.max_liq_ratio {
            self.multiplier.buy = 1.5;
        } else if liq_ratio > 0.0 && liq_ratio < cfg.max_liq_ratio {
            opposite.borrow_mut().multiplier.sell = 0.5;
        } else if ratio > 0.94 && ratio < 1.05 && total_margin < cfg.min_total_margin {
            if cfg.increase_same_position_on_low_margin {
                self.multiplier.sell = 2.0;
            } else {
                self.multiplier.buy = 0.5;
            }
        } else if ratio > 2.0 && unrealized_pct < 0.0 {
            self.multiplier.sell = 2.0;
        } else if ratio > 5.0 {
            self.multiplier.sell = 2.0;
        }
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "long",
        Direction::Short => "short",
    }
}

fn to_f64(d: Decimal) -> f64 {
    d.to_string().parse::<f64>().unwrap_or(0.0)
}
