//! Intent Executor: a stateless translator from `Intent`s to exchange
//! REST calls. Grounded on the teacher's `exchange.rs` (`ExchangeClient`
//! trait, `Live`/`Sim` split), generalized from Hyperliquid's order
//! surface to the Bybit-shaped operation list in SPEC_FULL.md §6.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::intents::{CancelIntent, PlaceLimitIntent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub order_link_id: String,
    pub symbol: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: crate::events::Side,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPosition {
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub position_value: Decimal,
    pub liquidation_price: Decimal,
    pub leverage: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskLimitTier {
    pub max_value: Option<Decimal>,
    pub mmr_rate: Decimal,
    pub mm_deduction: Decimal,
    pub imr_rate: Decimal,
}

/// The external gateway this core consumes but does not implement: the
/// Bybit REST surface named in SPEC_FULL.md §6. Wire-level signing and
/// transport belong to whatever concretely implements this trait, not
/// to the core.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn place_order(&self, intent: &PlaceLimitIntent) -> Result<String, ExchangeError>;
    async fn cancel_order(&self, intent: &CancelIntent) -> Result<(), ExchangeError>;
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;
    async fn get_positions(&self, symbol: &str) -> Result<(RawPosition, RawPosition), ExchangeError>;
    async fn get_wallet_balance(&self) -> Result<Decimal, ExchangeError>;
    async fn get_risk_limit(&self, symbol: &str) -> Result<Vec<RiskLimitTier>, ExchangeError>;
}

/// Outcome of dispatching a single intent, surfaced to the runner so it
/// can update `TrackedOrder` state and route failures to the retry
/// queue.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Placed { client_order_id: String, exchange_order_id: String },
    Cancelled { order_id: String },
    /// A cancel raced a fill/cancel already applied exchange-side:
    /// treated as success, no retry (§4.4).
    BenignCancelRace { order_id: String },
    /// A place raced a prior successful placement of the same deterministic
    /// id: treated as success, no retry (§9 idempotency under retries).
    AlreadyPlaced { client_order_id: String },
    Failed(ExchangeError),
}

/// Thin, stateless translator (per its 8% share of the system): holds
/// only the exchange client and the `shadow_mode` flag.
pub struct IntentExecutor {
    client: Box<dyn ExchangeClient>,
    shadow_mode: bool,
}

impl IntentExecutor {
    pub fn new(client: Box<dyn ExchangeClient>, shadow_mode: bool) -> Self {
        Self { client, shadow_mode }
    }

    pub async fn execute_place(&self, intent: &PlaceLimitIntent) -> ExecutionOutcome {
        if self.shadow_mode {
            return ExecutionOutcome::Placed {
                client_order_id: intent.client_order_id.clone(),
                exchange_order_id: format!("shadow-{}", intent.client_order_id),
            };
        }
        match self.client.place_order(intent).await {
            Ok(exchange_order_id) => ExecutionOutcome::Placed { client_order_id: intent.client_order_id.clone(), exchange_order_id },
            Err(ExchangeError::DuplicateOrderId(_)) => ExecutionOutcome::AlreadyPlaced { client_order_id: intent.client_order_id.clone() },
            Err(e) => ExecutionOutcome::Failed(e),
        }
    }

    pub async fn execute_cancel(&self, intent: &CancelIntent) -> ExecutionOutcome {
        if self.shadow_mode {
            return ExecutionOutcome::Cancelled { order_id: intent.order_id.clone() };
        }
        match self.client.cancel_order(intent).await {
            Ok(()) => ExecutionOutcome::Cancelled { order_id: intent.order_id.clone() },
            Err(ExchangeError::BenignCancelRace(_)) => ExecutionOutcome::BenignCancelRace { order_id: intent.order_id.clone() },
            Err(e) => ExecutionOutcome::Failed(e),
        }
    }
}

/// Always-succeeds, in-memory stand-in used when `shadow_mode` backs a
/// whole account rather than a single executor (backtest/dry-run),
/// mirroring the teacher's `SimExchange`.
pub struct ShadowExchangeClient;

#[async_trait]
impl ExchangeClient for ShadowExchangeClient {
    async fn place_order(&self, intent: &PlaceLimitIntent) -> Result<String, ExchangeError> {
        Ok(format!("shadow-{}", intent.client_order_id))
    }
    async fn cancel_order(&self, _intent: &CancelIntent) -> Result<(), ExchangeError> {
        Ok(())
    }
    async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
    async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(Vec::new())
    }
    async fn get_positions(&self, _symbol: &str) -> Result<(RawPosition, RawPosition), ExchangeError> {
        Ok((RawPosition::default(), RawPosition::default()))
    }
    async fn get_wallet_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(Decimal::ZERO)
    }
    async fn get_risk_limit(&self, _symbol: &str) -> Result<Vec<RiskLimitTier>, ExchangeError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, Side};
    use crate::intents::CancelReason;
    use rust_decimal_macros::dec;

    fn place_intent() -> PlaceLimitIntent {
        PlaceLimitIntent {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: dec!(99800.0),
            qty: dec!(0.001),
            grid_level: -1,
            direction: Direction::Long,
            reduce_only: false,
            client_order_id: "abc123".into(),
        }
    }

    #[tokio::test]
    async fn test_shadow_mode_place_never_touches_client() {
        let executor = IntentExecutor::new(Box::new(ShadowExchangeClient), true);
        let outcome = executor.execute_place(&place_intent()).await;
        assert!(matches!(outcome, ExecutionOutcome::Placed { .. }));
    }

    #[tokio::test]
    async fn test_shadow_mode_cancel_always_succeeds() {
        let executor = IntentExecutor::new(Box::new(ShadowExchangeClient), true);
        let cancel = CancelIntent { symbol: "BTCUSDT".into(), order_id: "o1".into(), reason: CancelReason::Rebuild };
        let outcome = executor.execute_cancel(&cancel).await;
        assert!(matches!(outcome, ExecutionOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_live_place_propagates_client_order_id() {
        let executor = IntentExecutor::new(Box::new(ShadowExchangeClient), false);
        let outcome = executor.execute_place(&place_intent()).await;
        match outcome {
            ExecutionOutcome::Placed { client_order_id, .. } => assert_eq!(client_order_id, "abc123"),
            other => panic!("expected Placed, got {other:?}"),
        }
    }

    struct DuplicateIdClient;

    #[async_trait]
    impl ExchangeClient for DuplicateIdClient {
        async fn place_order(&self, _intent: &PlaceLimitIntent) -> Result<String, ExchangeError> {
            Err(ExchangeError::classify_place_failure("duplicate order id"))
        }
        async fn cancel_order(&self, _intent: &CancelIntent) -> Result<(), ExchangeError> {
            unimplemented!()
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
            unimplemented!()
        }
        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
            unimplemented!()
        }
        async fn get_positions(&self, _symbol: &str) -> Result<(RawPosition, RawPosition), ExchangeError> {
            unimplemented!()
        }
        async fn get_wallet_balance(&self) -> Result<Decimal, ExchangeError> {
            unimplemented!()
        }
        async fn get_risk_limit(&self, _symbol: &str) -> Result<Vec<RiskLimitTier>, ExchangeError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_duplicate_order_id_is_benign_already_placed() {
        let executor = IntentExecutor::new(Box::new(DuplicateIdClient), false);
        let outcome = executor.execute_place(&place_intent()).await;
        match outcome {
            ExecutionOutcome::AlreadyPlaced { client_order_id } => assert_eq!(client_order_id, "abc123"),
            other => panic!("expected AlreadyPlaced, got {other:?}"),
        }
    }
}
