//! Orchestrator: lifecycle owner. Constructs per-account resources,
//! builds the symbol/account routing indexes, runs startup
//! reconciliation, routes normalized events to strategy runners, and
//! drives the periodic position-check/health-check/order-sync tasks.
//! Grounded directly on `apps/gridbot/src/gridbot/orchestrator.py` in
//! the retrieval pack's original-source material; task-spawning and
//! shutdown idiom follow the teacher's `main.rs`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};

use crate::config::OrchestratorConfig;
use crate::engine::ExistingOrder;
use crate::error::ExchangeError;
use crate::events::Event;
use crate::executor::{ExchangeClient, RawPosition};
use crate::notifier::Notifier;
use crate::reconciler::Reconciler;
use crate::runner::{PositionUpdateInputs, StrategyRunner};

/// Connectivity surface the health-check loop drives. Not an exchange
/// operation, kept separate from `ExchangeClient`, which is pure REST.
#[async_trait]
pub trait WsConnection: Send + Sync {
    async fn is_connected(&self) -> bool;
    async fn connect(&self) -> Result<(), ExchangeError>;
    async fn disconnect(&self);
    async fn resubscribe(&self) -> Result<(), ExchangeError>;
}

struct WalletCacheEntry {
    balance: Decimal,
    cached_at: Instant,
}

/// Single mutex guarding a per-account `{balance, cached_at}`. The
/// mutex is held across the REST call on a cache miss, so concurrent
/// callers within the same tick queue behind the fetch and observe the
/// freshly cached value rather than each issuing their own call.
struct WalletCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, WalletCacheEntry>>,
}

impl WalletCache {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    async fn get_or_fetch(&self, account: &str, client: &dyn ExchangeClient) -> Result<Decimal, ExchangeError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(account) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(entry.balance);
            }
        }
        let balance = client.get_wallet_balance().await?;
        entries.insert(account.to_string(), WalletCacheEntry { balance, cached_at: Instant::now() });
        Ok(balance)
    }
}

pub struct AccountContext {
    pub client: Arc<dyn ExchangeClient>,
    pub public_feed: Arc<dyn WsConnection>,
    pub private_feed: Arc<dyn WsConnection>,
}

struct StrategyEntry {
    account: String,
    symbol: String,
    runner: StrategyRunner,
    reconciler: Reconciler,
    tracked_order_ids: HashMap<String, crate::intents::TrackedOrder>,
}

/// `account -> symbol -> (long, short)` raw positions, written only by
/// WS position-update callbacks, read by the position-check task.
type PositionCache = Mutex<HashMap<String, HashMap<String, (Option<RawPosition>, Option<RawPosition>)>>>;

pub struct Orchestrator {
    accounts: HashMap<String, AccountContext>,
    strategies: Vec<RefCell<StrategyEntry>>,
    symbol_index: HashMap<String, Vec<usize>>,
    account_index: HashMap<String, Vec<usize>>,
    wallet_cache: WalletCache,
    position_cache: PositionCache,
    notifier: Arc<dyn Notifier>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(notifier: Arc<dyn Notifier>, config: OrchestratorConfig) -> Self {
        Self {
            accounts: HashMap::new(),
            strategies: Vec::new(),
            symbol_index: HashMap::new(),
            account_index: HashMap::new(),
            wallet_cache: WalletCache::new(Duration::from_secs(config.wallet_cache_interval_secs.max(0) as u64)),
            position_cache: Mutex::new(HashMap::new()),
            notifier,
            config,
        }
    }

    pub fn add_account(&mut self, account: impl Into<String>, ctx: AccountContext) {
        self.accounts.insert(account.into(), ctx);
    }

    pub fn add_strategy(&mut self, account: impl Into<String>, symbol: impl Into<String>, runner: StrategyRunner) {
        let account = account.into();
        let symbol = symbol.into();
        let reconciler = Reconciler::new(symbol.clone());
        let idx = self.strategies.len();
        self.strategies.push(RefCell::new(StrategyEntry { account: account.clone(), symbol: symbol.clone(), runner, reconciler, tracked_order_ids: HashMap::new() }));
        self.symbol_index.entry(symbol).or_default().push(idx);
        self.account_index.entry(account).or_default().push(idx);
    }

    /// Runs startup reconciliation for every registered strategy, every
    /// open exchange order is injected as `placed`, regardless of prior
    /// local state (§4.7).
    pub async fn reconcile_all_startup(&self) {
        for entry in &self.strategies {
            let (account, symbol) = {
                let e = entry.borrow();
                (e.account.clone(), e.symbol.clone())
            };
            let Some(account_ctx) = self.accounts.get(&account) else { continue };
            let mut e = entry.borrow_mut();
            match e.reconciler.reconcile_startup(&*account_ctx.client, &mut e.tracked_order_ids).await {
                Ok(report) => log::info!("{symbol}@{account}: startup reconciliation fetched={} injected={}", report.orders_fetched, report.orders_injected),
                Err(err) => self.notifier.alert_exception("startup reconciliation", &err, "reconcile_startup_failed"),
            }
        }
    }

    /// Connects every registered account's public/private feeds.
    pub async fn connect_all(&self) {
        for (account, ctx) in &self.accounts {
            if let Err(err) = ctx.public_feed.connect().await {
                self.notifier.alert_exception("public feed connect", &err, &format!("ws_connect_failed:{account}"));
            }
            if let Err(err) = ctx.private_feed.connect().await {
                self.notifier.alert_exception("private feed connect", &err, &format!("ws_connect_failed:{account}"));
            }
        }
    }

    /// Records a position snapshot delivered by a private WS callback.
    /// The only writer of the position cache, callers MUST be the
    /// event-loop-owned drain task, never a raw WS thread (§5).
    pub async fn update_position_cache(&self, account: &str, symbol: &str, long: RawPosition, short: RawPosition) {
        let mut cache = self.position_cache.lock().await;
        cache.entry(account.to_string()).or_default().insert(symbol.to_string(), (Some(long), Some(short)));
    }

    /// Routes one normalized event to the runners interested in it, per
    /// §4.8's event-routing table. `account` is `None` for Ticker/
    /// PublicTrade (symbol-addressed, account-agnostic); `Some` for
    /// Order/Execution (must also match the owning account).
    pub async fn route_event(&self, account: Option<&str>, event: Event) {
        let symbol = event.symbol().to_string();
        let Some(indices) = self.symbol_index.get(&symbol) else { return };
        for &idx in indices {
            let matches_account = {
                let e = self.strategies[idx].borrow();
                account.map(|a| a == e.account).unwrap_or(true)
            };
            if !matches_account {
                continue;
            }
            let mut e = self.strategies[idx].borrow_mut();
            let existing: Vec<ExistingOrder> = Vec::new();
            match e.runner.on_event(&event, &existing).await {
                Ok(intents) => e.runner.dispatch_intents(intents).await,
                Err(err) => self.notifier.alert_exception("event handling", &err, &format!("runner_error:{}", e.symbol)),
            }
        }
    }

    /// Position-check tick: prefers the WS cache, falls back to REST at
    /// most once per account per tick when either side is missing.
    pub async fn position_check_tick(&self) {
        for (account, ctx) in &self.accounts {
            let wallet_balance = match self.wallet_cache.get_or_fetch(account, &*ctx.client).await {
                Ok(b) => b,
                Err(err) => {
                    self.notifier.alert_exception("wallet balance fetch", &err, &format!("wallet_fetch_failed:{account}"));
                    continue;
                }
            };

            let mut fetched_rest_this_tick = false;
            let Some(indices) = self.account_index.get(account) else { continue };
            for &idx in indices {
                let symbol = self.strategies[idx].borrow().symbol.clone();
                let cached = {
                    let cache = self.position_cache.lock().await;
                    cache.get(account).and_then(|m| m.get(&symbol)).cloned()
                };
                let (long_raw, short_raw) = match cached {
                    Some((Some(l), Some(s))) => (l, s),
                    _ if !fetched_rest_this_tick => {
                        fetched_rest_this_tick = true;
                        match ctx.client.get_positions(&symbol).await {
                            Ok((l, s)) => {
                                self.update_position_cache(account, &symbol, l.clone(), s.clone()).await;
                                (l, s)
                            }
                            Err(err) => {
                                self.notifier.alert_exception("position REST fallback", &err, &format!("position_fetch_failed:{account}:{symbol}"));
                                continue;
                            }
                        }
                    }
                    _ => continue,
                };

                let last_close = self.strategies[idx].borrow().runner.last_close();
                let Some(last_close) = last_close else { continue };
                let inputs = PositionUpdateInputs { long_raw, short_raw, wallet_balance, last_close };
                if let Err(err) = self.strategies[idx].borrow_mut().runner.on_position_update(&inputs) {
                    self.notifier.alert_exception("position update", &err, &format!("position_update_failed:{account}:{symbol}"));
                }
            }
        }
    }

    /// Health-check tick: no backoff, next tick re-evaluates. Distinct
    /// error keys per account so a persistent outage doesn't drown
    /// unrelated alerts in dedup.
    pub async fn health_check_tick(&self) {
        for (account, ctx) in &self.accounts {
            for (label, feed) in [("public", &ctx.public_feed), ("private", &ctx.private_feed)] {
                if feed.is_connected().await {
                    continue;
                }
                feed.disconnect().await;
                if let Err(err) = feed.connect().await {
                    self.notifier.alert_exception(&format!("{label} feed reconnect"), &err, &format!("ws_reconnect_failed:{account}:{label}"));
                    continue;
                }
                if let Err(err) = feed.resubscribe().await {
                    self.notifier.alert_exception(&format!("{label} feed resubscribe"), &err, &format!("ws_resubscribe_failed:{account}:{label}"));
                }
            }
        }
    }

    /// Order-sync tick: runs the reconciler's periodic mode per
    /// strategy. Disabled entirely when the configured interval is
    /// `<= 0`.
    pub async fn order_sync_tick(&self) {
        if self.config.order_sync_interval_secs <= 0 {
            return;
        }
        for entry in &self.strategies {
            let (account, symbol) = {
                let e = entry.borrow();
                (e.account.clone(), e.symbol.clone())
            };
            let Some(account_ctx) = self.accounts.get(&account) else { continue };
            let mut e = entry.borrow_mut();
            let report = e.reconciler.reconcile_periodic(&*account_ctx.client, &mut e.tracked_order_ids).await;
            if report.errors > 0 {
                self.notifier.alert(&format!("{symbol}@{account}: order-sync fetch failed"), &format!("order_sync_failed:{account}:{symbol}"));
            } else if report.orphan_orders > 0 {
                self.notifier.alert(&format!("{symbol}@{account}: {} orphan order(s) detected", report.orphan_orders), &format!("order_sync_orphans:{account}:{symbol}"));
            }
        }
    }

    /// Drives all three periodic tasks until `shutdown` signals true.
    /// Each task checks the signal at every suspension point; in-flight
    /// REST calls are allowed to finish rather than being aborted mid-
    /// flight (§5's cancellation policy).
    pub async fn run_periodic_tasks(&self, mut shutdown: watch::Receiver<bool>) {
        let mut position_check = tokio::time::interval(Duration::from_secs(self.config.position_check_interval_secs.max(1)));
        let mut health_check = tokio::time::interval(Duration::from_secs(self.config.health_check_interval_secs.max(1)));
        let order_sync_secs = if self.config.order_sync_interval_secs > 0 { self.config.order_sync_interval_secs as u64 } else { u64::MAX };
        let mut order_sync = tokio::time::interval(Duration::from_secs(order_sync_secs.max(1)));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = position_check.tick() => {
                    if *shutdown.borrow() { break; }
                    self.position_check_tick().await;
                }
                _ = health_check.tick() => {
                    if *shutdown.borrow() { break; }
                    self.health_check_tick().await;
                }
                _ = order_sync.tick(), if self.config.order_sync_interval_secs > 0 => {
                    if *shutdown.borrow() { break; }
                    self.order_sync_tick().await;
                }
            }
        }
    }

    /// Graceful shutdown: disconnects every account's feeds. Stopping
    /// retry queues and clearing the running flag are the caller's
    /// responsibility (they own the `watch::Sender` and the queues).
    pub async fn shutdown(&self) {
        for ctx in self.accounts.values() {
            ctx.public_feed.disconnect().await;
            ctx.private_feed.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::notifier::LogNotifier;

    #[tokio::test]
    async fn test_wallet_cache_reuses_value_within_ttl() {
        use crate::error::ExchangeError;
        use crate::executor::{OpenOrder, RiskLimitTier};
        use crate::intents::{CancelIntent, PlaceLimitIntent};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            calls: AtomicU32,
        }

        #[async_trait]
        impl ExchangeClient for CountingClient {
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
                unimplemented!()
            }
            async fn get_positions(&self, _symbol: &str) -> Result<(RawPosition, RawPosition), ExchangeError> {
                unimplemented!()
            }
            async fn get_wallet_balance(&self) -> Result<Decimal, ExchangeError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Decimal::from(1000))
            }
            async fn get_risk_limit(&self, _symbol: &str) -> Result<Vec<RiskLimitTier>, ExchangeError> {
                unimplemented!()
            }
        }
        let cache = WalletCache::new(Duration::from_secs(60));
        let client = CountingClient { calls: AtomicU32::new(0) };
        let a = cache.get_or_fetch("acct", &client).await.unwrap();
        let b = cache.get_or_fetch("acct", &client).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_orchestrator_has_no_strategies() {
        let orch = Orchestrator::new(Arc::new(LogNotifier), OrchestratorConfig::default());
        assert!(orch.strategies.is_empty());
    }
}
