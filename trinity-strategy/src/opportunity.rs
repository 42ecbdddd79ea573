use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trinity_instrument::{ExchangeId, Symbol};

/// Whether an [`Opportunity`] should be entered for a sustained hold across multiple funding
/// cycles, or entered only to collect one imminent payment and exit before the cost side fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityMode {
    Hold,
    CherryPick,
}

/// A ranked, ephemeral funding-arbitrage candidate produced by one scan tick (§3). Never
/// persisted: a [`crate::trade::TradeRecord`] is created from one only on successful dual-leg
/// fill, and the Opportunity itself is discarded at the end of the tick that produced it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Opportunity {
    pub symbol: Symbol,
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
    pub long_rate: Decimal,
    pub short_rate: Decimal,
    pub immediate_spread_pct: Decimal,
    pub funding_spread_pct: Decimal,
    /// Net-of-cost spread used for ranking and the qualification gate; for `Hold` this is the
    /// imminent-window spread net of total cost, for `CherryPick` it is the single-payment net.
    pub immediate_net_pct: Decimal,
    pub gross_edge_pct: Decimal,
    pub fees_pct: Decimal,
    pub net_edge_pct: Decimal,
    pub suggested_qty: Decimal,
    pub reference_price: Decimal,
    pub min_interval_hours: u32,
    pub hourly_rate_pct: Decimal,
    pub next_funding_ms: i64,
    pub mode: OpportunityMode,
    /// Only set for `CherryPick`: `cost_next_ts - 120s`.
    pub exit_before_ms: Option<i64>,
    pub n_collections: u32,
    pub qualified: bool,
}

impl Opportunity {
    pub fn exchange_pair(&self) -> (ExchangeId, ExchangeId) {
        (self.long_exchange, self.short_exchange)
    }
}
