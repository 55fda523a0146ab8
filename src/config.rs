//! Typed configuration surface. Loading (env/file/CLI) is out of scope
//! for the core, these are the shapes the orchestrator is constructed
//! from. Grounded on the teacher's `MmEngineConfig`/`MmAssetConfig` in
//! `execution.rs`/`market_maker.rs`.

use serde::{Deserialize, Serialize};

use crate::position::RiskConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account: String,
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
}

/// Per-direction order quantity spec: a base quantity scaled by the
/// risk multiplier at emission time (§4.3/§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AmountSpec {
    pub base_qty: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strat_id: String,
    pub account: String,
    pub symbol: String,
    pub tick_size: rust_decimal::Decimal,
    pub grid_count: i32,
    pub grid_step: f64,
    pub rebalance_threshold: f64,
    pub shadow_mode: bool,
    pub amount: AmountSpec,
    pub long_risk: RiskConfig,
    pub short_risk: Option<RiskConfig>,
    pub long_koef: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub position_check_interval_secs: u64,
    /// `<= 0` disables order-sync.
    pub order_sync_interval_secs: i64,
    /// `<= 0` disables wallet-balance caching (every call hits REST).
    pub wallet_cache_interval_secs: i64,
    pub health_check_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            position_check_interval_secs: 60,
            order_sync_interval_secs: 60,
            wallet_cache_interval_secs: 30,
            health_check_interval_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_defaults_match_spec_intervals() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.position_check_interval_secs, 60);
        assert_eq!(cfg.order_sync_interval_secs, 60);
        assert_eq!(cfg.health_check_interval_secs, 10);
    }
}
