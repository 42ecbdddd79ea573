use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sizing and delta limits shared between the execution controller and the risk guard.
/// Corresponds to the `risk_limits` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RiskLimits {
    /// Fraction of free balance allowed to be committed as margin across all open trades.
    pub max_margin_usage: Decimal,
    /// Hard cap on any single trade's notional, in quote currency.
    pub max_position_size_usd: Decimal,
    /// Absolute base-currency-quantity threshold a symbol's net signed position may deviate
    /// from zero before the fast loop logs a breach. Deliberately an absolute quantity rather
    /// than a percentage: the source computed this inconsistently (raw quantity in one place,
    /// an implicit per-symbol normalization in another), and an absolute threshold is the only
    /// reading precise enough to make "breach" a yes/no fact per symbol.
    pub delta_threshold_pct: Decimal,
    /// Fraction of `min(long_free, short_free)` used as margin when sizing a new trade.
    pub position_size_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            max_margin_usage: dec!(0.80),
            max_position_size_usd: dec!(5000),
            delta_threshold_pct: dec!(0.001),
            position_size_pct: dec!(0.70),
        }
    }
}

/// Corresponds to the `risk_guard` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RiskGuardConfig {
    pub fast_loop_interval_sec: u64,
    pub deep_loop_interval_sec: u64,
    pub enable_panic_close: bool,
    /// Width of the grace window after `mark_trade_opened`, in seconds. Fixed at 30 by the
    /// specification rather than made configurable: it exists to absorb leg-opening latency,
    /// not to be tuned per deployment.
    pub grace_period_sec: u64,
    /// Cooldown applied to a symbol after a successful panic-close, mirroring the orphan
    /// cooldown used by the execution controller.
    pub panic_close_cooldown_hours: u64,
}

impl Default for RiskGuardConfig {
    fn default() -> Self {
        Self {
            fast_loop_interval_sec: 5,
            deep_loop_interval_sec: 60,
            enable_panic_close: true,
            grace_period_sec: 30,
            panic_close_cooldown_hours: 2,
        }
    }
}
