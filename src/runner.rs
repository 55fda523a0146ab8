//! Strategy Runner: the per-strategy aggregate tying together the grid
//! engine, the linked long/short risk pair, tracked orders, and the
//! same-order detector. Grounded directly on
//! `apps/gridbot/src/gridbot/runner.py` in the retrieval pack's
//! original-source material, the closest 1:1 source for this module.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::engine::{ExistingOrder, GridEngine, GridSizing};
use crate::error::CoreError;
use crate::events::{Event, Side};
use crate::executor::{ExecutionOutcome, IntentExecutor, RawPosition};
use crate::intents::{Intent, TrackedOrder};
use crate::position::{AmountMultiplier, PositionRiskManager, PositionState, RiskConfig};
use crate::retry::RetryQueue;

/// One entry in a same-order detector buffer: a fully-filled execution,
/// classified by direction, most-recent-first.
#[derive(Debug, Clone)]
struct FillRecord {
    order_id: String,
    price: Decimal,
    side: Side,
    exchange_ts: DateTime<Utc>,
}

/// Two length-2 buffers (long, short) of fully-filled executions, used
/// to detect grid-duplication ("same-order error") per §4.6/§9. Both
/// buffers are always evaluated on every fill, the ordering constraint
/// is load-bearing: short-circuiting after the first buffer's reset
/// would silently drop a still-active error on the other buffer.
#[derive(Debug, Default)]
pub struct SameOrderDetector {
    long_buffer: Vec<FillRecord>,
    short_buffer: Vec<FillRecord>,
    long_error: bool,
    short_error: bool,
}

impl SameOrderDetector {
    /// Routes a fully-filled execution into a buffer and re-evaluates
    /// both buffers. Partial fills (`leaves_qty > 0`) are not passed in
    /// at all by the caller.
    pub fn on_fully_filled_execution(&mut self, order_id: &str, price: Decimal, side: Side, closing: bool, exchange_ts: DateTime<Utc>) -> bool {
        let is_long_buffer = (side == Side::Buy && !closing) || (side == Side::Sell && closing);
        let record = FillRecord { order_id: order_id.to_string(), price, side, exchange_ts };
        if is_long_buffer {
            Self::prepend_capped(&mut self.long_buffer, record);
        } else {
            Self::prepend_capped(&mut self.short_buffer, record);
        }

        // Evaluate BOTH buffers unconditionally, OR-ing the outcome.
        // Never early-exit once one buffer's flag is known (§9).
        let long_dup = Self::is_duplicate(&self.long_buffer);
        let short_dup = Self::is_duplicate(&self.short_buffer);
        self.long_error = long_dup;
        self.short_error = short_dup;
        self.long_error || self.short_error
    }

    fn prepend_capped(buffer: &mut Vec<FillRecord>, record: FillRecord) {
        buffer.insert(0, record);
        buffer.truncate(2);
    }

    fn is_duplicate(buffer: &[FillRecord]) -> bool {
        if buffer.len() < 2 {
            return false;
        }
        let (a, b) = (&buffer[0], &buffer[1]);
        a.price == b.price && a.side == b.side && a.order_id != b.order_id
    }

    pub fn is_halted(&self) -> bool {
        self.long_error || self.short_error
    }
}

/// Bundled wallet/position inputs for one position-update tick, already
/// fetched by the orchestrator (WS cache or REST fallback).
pub struct PositionUpdateInputs {
    pub long_raw: RawPosition,
    pub short_raw: RawPosition,
    pub wallet_balance: Decimal,
    pub last_close: Decimal,
}

fn build_position_state(raw: &RawPosition, wallet_balance: Decimal) -> PositionState {
    let margin = if wallet_balance > Decimal::ZERO {
        (raw.position_value / wallet_balance).to_string().parse::<f64>().unwrap_or(0.0)
    } else {
        0.0
    };
    PositionState {
        size: raw.size,
        entry_price: raw.entry_price,
        unrealized_pnl: raw.unrealized_pnl,
        margin,
        liquidation_price: raw.liquidation_price,
        leverage: raw.leverage,
        position_value: raw.position_value,
    }
}

/// `long_size / max(short_size, eps)`, resolving the zero-short-size
/// open question: `short_size > 0` divides normally; `short_size == 0 &&
/// long_size > 0` is infinity; both zero is 1.0. Pinned from
/// `runner.py::on_position_update`'s exact branch.
fn position_ratio(long_size: Decimal, short_size: Decimal) -> f64 {
    if short_size > Decimal::ZERO {
        (long_size / short_size).to_string().parse::<f64>().unwrap_or(1.0)
    } else if long_size > Decimal::ZERO {
        f64::INFINITY
    } else {
        1.0
    }
}

/// Resolves the long-biasing coefficient: applies only when the
/// position ratio is strictly within `(1.1, 10.0)` AND both liquidation
/// prices are exactly zero, the literal guard from §9's second open
/// question, preserved without inferring "no real position" any other
/// way.
fn resolve_long_koef(position_ratio: f64, long_liq: Decimal, short_liq: Decimal, configured_koef: f64) -> f64 {
    if position_ratio > 1.1 && position_ratio < 10.0 && long_liq.is_zero() && short_liq.is_zero() {
        configured_koef
    } else {
        1.0
    }
}

pub struct StrategyRunner {
    pub strat_id: String,
    pub symbol: String,
    engine: GridEngine,
    long_risk: Rc<RefCell<PositionRiskManager>>,
    short_risk: Rc<RefCell<PositionRiskManager>>,
    tracked_orders: HashMap<String, TrackedOrder>,
    detector: SameOrderDetector,
    base_qty: Decimal,
    long_koef_configured: f64,
    long_koef_effective: f64,
    executor: Rc<IntentExecutor>,
    retry_queue: Rc<RetryQueue>,
}

impl StrategyRunner {
    pub fn new(
        strat_id: impl Into<String>,
        symbol: impl Into<String>,
        engine: GridEngine,
        risk_config: RiskConfig,
        short_risk_config: Option<RiskConfig>,
        base_qty: Decimal,
        long_koef_configured: f64,
        executor: Rc<IntentExecutor>,
        retry_queue: Rc<RetryQueue>,
    ) -> Self {
        let (long_risk, short_risk) = PositionRiskManager::create_linked_pair(risk_config, short_risk_config);
        Self {
            strat_id: strat_id.into(),
            symbol: symbol.into(),
            engine,
            long_risk,
            short_risk,
            tracked_orders: HashMap::new(),
            detector: SameOrderDetector::default(),
            base_qty,
            long_koef_configured,
            long_koef_effective: 1.0,
            executor,
            retry_queue,
        }
    }

    pub fn anchor_price(&self) -> Option<Decimal> {
        self.engine.get_anchor_price()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.engine.last_close()
    }

    /// Handles one normalized event: updates the same-order detector on
    /// fully-filled executions, then lets the engine produce intents
    /// (suppressed entirely while a same-order error is active, per
    /// §4.6/§7 kind 6).
    pub async fn on_event(&mut self, event: &Event, existing_orders: &[ExistingOrder]) -> Result<Vec<Intent>, CoreError> {
        if let Event::Execution(e) = event {
            if e.is_fully_filled() {
                self.detector.on_fully_filled_execution(&e.order_id, e.price, e.side, e.is_closing(), e.exchange_ts);
            }
        }

        if self.detector.is_halted() {
            let zero = self.zero_sizing();
            self.engine.handle_event(event, existing_orders, &zero);
            return Err(CoreError::SameOrderHalted { strat_id: self.strat_id.clone() });
        }

        let sizing = self.current_sizing();
        let intents = self.engine.handle_event(event, existing_orders, &sizing);
        for intent in &intents {
            self.track_intent(intent);
        }
        Ok(intents)
    }

    fn zero_sizing(&self) -> GridSizing {
        GridSizing { base_qty: Decimal::ZERO, long_multiplier: AmountMultiplier::default(), short_multiplier: AmountMultiplier::default(), long_koef_effective: 1.0 }
    }

    fn current_sizing(&self) -> GridSizing {
        GridSizing {
            base_qty: self.base_qty,
            long_multiplier: self.long_risk.borrow().get_amount_multiplier(),
            short_multiplier: self.short_risk.borrow().get_amount_multiplier(),
            long_koef_effective: self.long_koef_effective,
        }
    }

    fn track_intent(&mut self, intent: &Intent) {
        if let Intent::PlaceLimit(p) = intent {
            self.tracked_orders.entry(p.client_order_id.clone()).or_insert_with(|| TrackedOrder::new_pending(p.client_order_id.clone(), intent.clone(), Utc::now()));
        }
    }

    /// Periodic position-update tick (not event-driven): resets both
    /// directions' multipliers, evaluates long then short (long may
    /// write into short), and resolves the long-biasing coefficient for
    /// the next round of intent sizing.
    pub fn on_position_update(&mut self, inputs: &PositionUpdateInputs) -> Result<(), CoreError> {
        let long_state = build_position_state(&inputs.long_raw, inputs.wallet_balance);
        let short_state = build_position_state(&inputs.short_raw, inputs.wallet_balance);

        self.long_risk.borrow_mut().reset_amount_multiplier();
        self.short_risk.borrow_mut().reset_amount_multiplier();

        let last_close = inputs.last_close.to_string().parse::<f64>().unwrap_or(0.0);
        self.long_risk.borrow_mut().calculate_amount_multiplier(&long_state, &short_state, last_close)?;
        self.short_risk.borrow_mut().calculate_amount_multiplier(&short_state, &long_state, last_close)?;

        let ratio = position_ratio(long_state.size, short_state.size);
        self.long_koef_effective = resolve_long_koef(ratio, long_state.liquidation_price, short_state.liquidation_price, self.long_koef_configured);
        Ok(())
    }

    /// Dispatches each produced intent through the executor, routing
    /// failures to the strategy's own retry queue.
    pub async fn dispatch_intents(&mut self, intents: Vec<Intent>) {
        for intent in intents {
            let outcome = match &intent {
                Intent::PlaceLimit(p) => self.executor.execute_place(p).await,
                Intent::Cancel(c) => self.executor.execute_cancel(c).await,
            };
            match outcome {
                ExecutionOutcome::Placed { client_order_id, exchange_order_id } => {
                    self.engine.record_order_placed(client_order_id.clone(), exchange_order_id.clone());
                    if let Some(tracked) = self.tracked_orders.get_mut(&client_order_id) {
                        tracked.mark_placed(exchange_order_id);
                    }
                }
                ExecutionOutcome::Cancelled { .. } | ExecutionOutcome::BenignCancelRace { .. } | ExecutionOutcome::AlreadyPlaced { .. } => {}
                ExecutionOutcome::Failed(e) => {
                    self.retry_queue.enqueue(intent, Some(e)).await;
                }
            }
        }
    }
}
