use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use trinity_instrument::ExchangeId;
use trinity_risk::{RiskGuardConfig, RiskLimits};
use trinity_strategy::{ExecutionConfig, TradingParams};

/// Single typed configuration struct the core depends on (§6). Loading it from a file with an
/// environment overlay, and credential management, are external collaborators: this type is
/// the narrow interface the engine consumes instead of reaching for module-level singletons.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub risk_limits: RiskLimits,
    pub trading_params: TradingParams,
    pub execution: ExecutionConfig,
    pub risk_guard: RiskGuardConfig,
    /// Venues this process trades, in priority order.
    pub enabled_exchanges: Vec<ExchangeId>,
    /// Configured leverage per venue; a venue absent from this map defaults to 1x.
    pub leverage_by_exchange: HashMap<ExchangeId, u32>,
    pub paper_trading: bool,
    pub dry_run: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            risk_limits: RiskLimits::default(),
            trading_params: TradingParams::default(),
            execution: ExecutionConfig::default(),
            risk_guard: RiskGuardConfig::default(),
            enabled_exchanges: Vec::new(),
            leverage_by_exchange: HashMap::new(),
            paper_trading: false,
            dry_run: false,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_every_sub_config_default() {
        let config = Config::default();
        assert_eq!(config.risk_limits, RiskLimits::default());
        assert_eq!(config.trading_params, TradingParams::default());
        assert!(config.enabled_exchanges.is_empty());
    }
}
