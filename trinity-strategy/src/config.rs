use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Corresponds to the `trading_params` configuration section (§6).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TradingParams {
    pub min_funding_spread_pct: Decimal,
    pub min_immediate_spread_pct: Decimal,
    pub min_net_pct: Decimal,
    pub slippage_buffer_pct: Decimal,
    pub safety_buffer_pct: Decimal,
    pub basis_buffer_pct: Decimal,
    pub max_entry_window_minutes: u32,
    pub cooldown_after_orphan_hours: u64,
    pub hold_min_spread_pct: Decimal,
    pub upgrade_spread_delta_pct: Decimal,
    pub upgrade_cooldown_seconds: u64,
    pub execute_only_best_opportunity: bool,
    /// Not in the upstream section table, but required to bound how long a `Hold` trade waits
    /// for the next funding cycle before the exit monitor forces an exit regardless of spread.
    pub hold_max_wait_seconds: i64,
    pub entry_offset_seconds: i64,
}

impl Default for TradingParams {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            min_funding_spread_pct: dec!(0.5),
            min_immediate_spread_pct: dec!(0.5),
            min_net_pct: dec!(0.5),
            slippage_buffer_pct: dec!(0.02),
            safety_buffer_pct: dec!(0.02),
            basis_buffer_pct: dec!(0.01),
            max_entry_window_minutes: 15,
            cooldown_after_orphan_hours: 2,
            hold_min_spread_pct: dec!(0.3),
            upgrade_spread_delta_pct: dec!(0.2),
            upgrade_cooldown_seconds: 3_600,
            execute_only_best_opportunity: true,
            hold_max_wait_seconds: 12 * 3_600,
            entry_offset_seconds: 15 * 60,
        }
    }
}

/// Corresponds to the `execution` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ExecutionConfig {
    pub concurrent_opportunities: usize,
    pub order_timeout_ms: u64,
    pub scan_parallelism: usize,
    pub scan_interval_sec: u64,
    pub exit_monitor_interval_sec: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrent_opportunities: 5,
            order_timeout_ms: 5_000,
            scan_parallelism: 10,
            scan_interval_sec: 15,
            exit_monitor_interval_sec: 30,
        }
    }
}
