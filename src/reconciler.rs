//! Reconciler: reconciles in-memory tracked-order state against the
//! authoritative exchange open-orders view, in two modes. Grounded on
//! §4.7 and the `orchestrator.py` call sites that invoke startup vs.
//! periodic reconciliation.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::ExchangeError;
use crate::executor::{ExchangeClient, OpenOrder};
use crate::intents::{OrderStatusTracked, TrackedOrder};

/// Result of a startup reconciliation pass: every open order is
/// injected unconditionally, so there are no orphans by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupReport {
    pub orders_fetched: usize,
    pub orders_injected: usize,
    pub orphan_orders: usize,
}

/// Result of a periodic reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodicReport {
    pub orders_fetched: usize,
    pub orders_injected: usize,
    pub orphan_orders: usize,
    pub errors: usize,
}

pub struct Reconciler {
    symbol: String,
}

impl Reconciler {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into() }
    }

    /// Injects every exchange-reported open order as a tracked order in
    /// `placed` state, so the engine observes it on its next
    /// reconciliation pass. Orphans are impossible in this mode, there
    /// is no prior in-memory state to compare against.
    pub async fn reconcile_startup(&self, client: &dyn ExchangeClient, tracked: &mut HashMap<String, TrackedOrder>) -> Result<StartupReport, ExchangeError> {
        let open_orders = client.get_open_orders(&self.symbol).await?;
        let fetched = open_orders.len();
        let mut injected = 0;
        let now = Utc::now();
        for order in open_orders {
            tracked.entry(order.order_link_id.clone()).or_insert_with(|| {
                injected += 1;
                TrackedOrder::new_injected(order.order_link_id, order.order_id, now)
            });
        }
        Ok(StartupReport { orders_fetched: fetched, orders_injected: injected, orphan_orders: 0 })
    }

    /// Injects exchange orders missing locally; marks in-memory `placed`
    /// orders absent from the exchange view as orphans WITHOUT
    /// cancelling them, the engine issues a fresh place on its next
    /// pass if the ladder still calls for one there.
    pub async fn reconcile_periodic(&self, client: &dyn ExchangeClient, tracked: &mut HashMap<String, TrackedOrder>) -> PeriodicReport {
        let open_orders = match client.get_open_orders(&self.symbol).await {
            Ok(orders) => orders,
            Err(_) => return PeriodicReport { errors: 1, ..Default::default() },
        };
        let fetched = open_orders.len();
        let exchange_ids: std::collections::HashSet<&str> = open_orders.iter().map(|o| o.order_link_id.as_str()).collect();

        let mut injected = 0;
        let now = Utc::now();
        for order in &open_orders {
            tracked.entry(order.order_link_id.clone()).or_insert_with(|| {
                injected += 1;
                TrackedOrder::new_injected(order.order_link_id.clone(), order.order_id.clone(), now)
            });
        }

        let mut orphans = 0;
        for (client_order_id, entry) in tracked.iter() {
            if entry.status == OrderStatusTracked::Placed && !exchange_ids.contains(client_order_id.as_str()) {
                orphans += 1;
            }
        }

        PeriodicReport { orders_fetched: fetched, orders_injected: injected, orphan_orders: orphans, errors: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::executor::{OpenOrder, RawPosition, RiskLimitTier};
    use crate::intents::{CancelIntent, PlaceLimitIntent};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct FakeClient {
        orders: Vec<OpenOrder>,
    }

    #[async_trait]
    impl ExchangeClient for FakeClient {
        async fn place_order(&self, _intent: &PlaceLimitIntent) -> Result<String, ExchangeError> {
            unimplemented!()
        }
        async fn cancel_order(&self, _intent: &CancelIntent) -> Result<(), ExchangeError> {
            unimplemented!()
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
            unimplemented!()
        }
        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
            Ok(self.orders.clone())
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

    fn order(id: &str) -> OpenOrder {
        OpenOrder { order_id: format!("ex-{id}"), order_link_id: id.to_string(), symbol: "BTCUSDT".into(), price: dec!(100000.0), qty: dec!(0.001), side: crate::events::Side::Buy }
    }

    #[tokio::test]
    async fn test_startup_injects_all_with_no_orphans() {
        let client = FakeClient { orders: vec![order("a"), order("b")] };
        let reconciler = Reconciler::new("BTCUSDT");
        let mut tracked = HashMap::new();
        let report = reconciler.reconcile_startup(&client, &mut tracked).await.unwrap();
        assert_eq!(report.orders_fetched, 2);
        assert_eq!(report.orders_injected, 2);
        assert_eq!(report.orphan_orders, 0);
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked["a"].status, OrderStatusTracked::Placed);
    }

    #[tokio::test]
    async fn test_periodic_injects_missing_and_flags_orphan() {
        let client = FakeClient { orders: vec![order("a")] };
        let reconciler = Reconciler::new("BTCUSDT");
        let mut tracked = HashMap::new();
        tracked.insert("stale".to_string(), TrackedOrder::new_injected("stale".into(), "ex-stale".into(), Utc::now()));
        let report = reconciler.reconcile_periodic(&client, &mut tracked).await;
        assert_eq!(report.orders_fetched, 1);
        assert_eq!(report.orders_injected, 1);
        assert_eq!(report.orphan_orders, 1);
        assert_eq!(report.errors, 0);
        assert!(tracked.contains_key("a"));
    }

    #[tokio::test]
    async fn test_periodic_does_not_reinject_already_tracked() {
        let client = FakeClient { orders: vec![order("a")] };
        let reconciler = Reconciler::new("BTCUSDT");
        let mut tracked = HashMap::new();
        tracked.insert("a".to_string(), TrackedOrder::new_injected("a".into(), "ex-a".into(), Utc::now()));
        let report = reconciler.reconcile_periodic(&client, &mut tracked).await;
        assert_eq!(report.orders_injected, 0);
        assert_eq!(report.orphan_orders, 0);
    }
}
