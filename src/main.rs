mod anchor;
mod config;
mod decimal_ext;
mod engine;
mod error;
mod events;
mod executor;
mod grid;
mod ids;
mod intents;
mod notifier;
mod orchestrator;
mod position;
mod reconciler;
mod retry;
mod risk_limit_cache;
mod runner;

use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use config::{AccountConfig, OrchestratorConfig, StrategyConfig};
use engine::GridEngine;
use error::ExchangeError;
use executor::{IntentExecutor, ShadowExchangeClient};
use grid::{Grid, GridConfig};
use notifier::LogNotifier;
use orchestrator::{AccountContext, Orchestrator, WsConnection};
use retry::{RetryPolicy, RetryQueue};
use runner::StrategyRunner;

/// Always-connected stand-in used when no real WebSocket gateway is
/// wired in (shadow mode). A live deployment supplies its own
/// `WsConnection` over a real Bybit socket, that wiring is external
/// gateway plumbing the core consumes but does not implement (§6).
struct NoopWsConnection;

#[async_trait]
impl WsConnection for NoopWsConnection {
    async fn is_connected(&self) -> bool {
        true
    }
    async fn connect(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
    async fn disconnect(&self) {}
    async fn resubscribe(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

fn strategy_config_from_env() -> StrategyConfig {
    use config::AmountSpec;
    use position::RiskConfig;

    let symbol = std::env::var("GRID_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string());
    let tick_size: Decimal = std::env::var("GRID_TICK_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(dec!(0.1));
    let grid_count: i32 = std::env::var("GRID_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(50);
    let grid_step: f64 = std::env::var("GRID_STEP").ok().and_then(|v| v.parse().ok()).unwrap_or(0.2);
    let base_qty: Decimal = std::env::var("GRID_BASE_QTY").ok().and_then(|v| v.parse().ok()).unwrap_or(dec!(0.001));

    StrategyConfig {
        strat_id: std::env::var("GRID_STRAT_ID").unwrap_or_else(|_| format!("{symbol}-grid")),
        account: std::env::var("GRID_ACCOUNT").unwrap_or_else(|_| "default".to_string()),
        symbol,
        tick_size,
        grid_count,
        grid_step,
        rebalance_threshold: 0.3,
        shadow_mode: std::env::var("GRID_SHADOW_MODE").map(|v| v != "false" && v != "0").unwrap_or(true),
        amount: AmountSpec { base_qty },
        long_risk: RiskConfig { min_liq_ratio: 0.8, max_liq_ratio: 1.2, max_margin: 5.0, min_total_margin: 1.0, increase_same_position_on_low_margin: false },
        short_risk: None,
        long_koef: 1.0,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("grid-bot-core starting");

    // The event loop owns every strategy runner's authoritative state
    // on a single task (§5), `Rc`/`RefCell` inside `StrategyRunner`
    // require this to run on the current-thread flavor, not a
    // multi-threaded work-stealing runtime.
    let local = tokio::task::LocalSet::new();
    local.run_until(run()).await;
}

async fn run() {
    let notifier = Arc::new(LogNotifier);
    let orchestrator_config = OrchestratorConfig::default();
    let mut orchestrator = Orchestrator::new(notifier.clone(), orchestrator_config);

    let strategy_config = strategy_config_from_env();
    log::info!(
        "configuring strategy {} on {} (symbol={}, shadow_mode={})",
        strategy_config.strat_id, strategy_config.account, strategy_config.symbol, strategy_config.shadow_mode
    );

    let account_config = AccountConfig {
        account: strategy_config.account.clone(),
        api_key: std::env::var("BYBIT_API_KEY").unwrap_or_default(),
        api_secret: std::env::var("BYBIT_API_SECRET").unwrap_or_default(),
        testnet: std::env::var("BYBIT_TESTNET").map(|v| v != "false" && v != "0").unwrap_or(true),
    };

    if !strategy_config.shadow_mode {
        log::warn!(
            "live trading requested for account {} but this binary only ships a shadow exchange client; \
             a real ExchangeClient/WsConnection implementation must be linked in for live mode",
            account_config.account
        );
    }

    orchestrator.add_account(
        account_config.account.clone(),
        AccountContext {
            client: Arc::new(ShadowExchangeClient),
            public_feed: Arc::new(NoopWsConnection),
            private_feed: Arc::new(NoopWsConnection),
        },
    );

    let grid = Grid::new(strategy_config.tick_size, GridConfig {
        grid_count: strategy_config.grid_count,
        grid_step: strategy_config.grid_step,
        rebalance_threshold: strategy_config.rebalance_threshold,
    });
    let engine = GridEngine::new(strategy_config.symbol.clone(), grid);

    let executor = Rc::new(IntentExecutor::new(Box::new(ShadowExchangeClient), strategy_config.shadow_mode));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let retry_queue = Rc::new(RetryQueue::spawn(
        Arc::new(IntentExecutor::new(Box::new(ShadowExchangeClient), strategy_config.shadow_mode)),
        RetryPolicy::default(),
        shutdown_rx.clone(),
        |intent, err| {
            log::error!("intent exhausted retry budget: {intent:?}: {err}");
        },
    ));

    let runner = StrategyRunner::new(
        strategy_config.strat_id.clone(),
        strategy_config.symbol.clone(),
        engine,
        strategy_config.long_risk,
        strategy_config.short_risk,
        strategy_config.amount.base_qty,
        strategy_config.long_koef,
        executor,
        retry_queue,
    );
    orchestrator.add_strategy(strategy_config.account.clone(), strategy_config.symbol.clone(), runner);

    orchestrator.reconcile_all_startup().await;
    orchestrator.connect_all().await;

    log::info!("orchestrator running; awaiting shutdown signal");
    let periodic = orchestrator.run_periodic_tasks(shutdown_rx);

    tokio::select! {
        _ = periodic => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    }

    orchestrator.shutdown().await;
    log::info!("grid-bot-core stopped");
}
