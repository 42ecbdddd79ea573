use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trinity_instrument::{ExchangeId, Symbol};

use crate::{error::StrategyError, opportunity::OpportunityMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Open,
    Closing,
    Closed,
    Error,
}

/// One funding payment actually observed on an open trade, retained for the per-payment
/// history an operator can audit a closed/errored trade against.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum TradeLeg {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FundingPayment {
    pub leg: TradeLeg,
    pub rate: Decimal,
    pub paid_at: DateTime<Utc>,
}

/// Generate a 12-hex-character trade id. Not a cryptographic identifier: collisions only need
/// to be astronomically unlikely within one process's lifetime of open trades.
pub fn new_trade_id() -> String {
    let mut bytes = [0u8; 6];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The mutable, KV-persisted record of one delta-neutral pair (§3). Exclusively owned by the
/// execution controller; the discovery scanner and risk guard never mutate one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub symbol: Symbol,
    pub state: TradeState,
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
    pub long_qty: Decimal,
    pub short_qty: Decimal,
    pub entry_edge_pct: Decimal,
    pub long_rate_at_open: Decimal,
    pub short_rate_at_open: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub mode: OpportunityMode,
    pub exit_before_ms: Option<i64>,
    pub next_funding_long_ms: i64,
    pub next_funding_short_ms: i64,
    pub long_paid: bool,
    pub short_paid: bool,
    pub cumulative_funding_collected_pct: Decimal,
    pub payments: Vec<FundingPayment>,
}

impl TradeRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: Symbol,
        long_exchange: ExchangeId,
        short_exchange: ExchangeId,
        long_qty: Decimal,
        short_qty: Decimal,
        entry_edge_pct: Decimal,
        long_rate_at_open: Decimal,
        short_rate_at_open: Decimal,
        mode: OpportunityMode,
        exit_before_ms: Option<i64>,
        next_funding_long_ms: i64,
        next_funding_short_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: new_trade_id(),
            symbol,
            state: TradeState::Open,
            long_exchange,
            short_exchange,
            long_qty,
            short_qty,
            entry_edge_pct,
            long_rate_at_open,
            short_rate_at_open,
            opened_at: now,
            closed_at: None,
            mode,
            exit_before_ms,
            next_funding_long_ms,
            next_funding_short_ms,
            long_paid: false,
            short_paid: false,
            cumulative_funding_collected_pct: Decimal::ZERO,
            payments: Vec::new(),
        }
    }

    /// |long_qty - short_qty| must never exceed one lot step while open (§3 invariant).
    pub fn qty_delta(&self) -> Decimal {
        (self.long_qty - self.short_qty).abs()
    }

    pub fn record_payment(&mut self, leg: TradeLeg, rate: Decimal, now: DateTime<Utc>) {
        self.cumulative_funding_collected_pct += rate.abs() * Decimal::from(100);
        self.payments.push(FundingPayment { leg, rate, paid_at: now });
        match leg {
            TradeLeg::Long => self.long_paid = true,
            TradeLeg::Short => self.short_paid = true,
        }
    }

    pub fn transition_to_closing(&mut self) -> Result<(), StrategyError> {
        self.require(TradeState::Open, "closing")?;
        self.state = TradeState::Closing;
        Ok(())
    }

    pub fn transition_to_closed(&mut self, now: DateTime<Utc>) -> Result<(), StrategyError> {
        self.require(TradeState::Closing, "closed")?;
        self.state = TradeState::Closed;
        self.closed_at = Some(now);
        Ok(())
    }

    pub fn transition_to_error(&mut self) {
        self.state = TradeState::Error;
    }

    fn require(&self, expected: TradeState, to: &'static str) -> Result<(), StrategyError> {
        if self.state != expected {
            return Err(StrategyError::InvalidTransition {
                trade_id: self.trade_id.clone(),
                from: state_name(self.state),
                to,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn state_name(state: TradeState) -> &'static str {
    match state {
        TradeState::Open => "open",
        TradeState::Closing => "closing",
        TradeState::Closed => "closed",
        TradeState::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> TradeRecord {
        TradeRecord::open(
            Symbol::from("BTC-USDT"),
            ExchangeId::Binance,
            ExchangeId::Bybit,
            dec!(0.01),
            dec!(0.01),
            dec!(0.5),
            dec!(0.0001),
            dec!(0.005),
            OpportunityMode::Hold,
            None,
            1_000,
            2_000,
            Utc::now(),
        )
    }

    #[test]
    fn round_trip_through_json_reproduces_record() {
        let trade = sample();
        let json = trade.to_json().unwrap();
        let reloaded = TradeRecord::from_json(&json).unwrap();
        assert_eq!(trade, reloaded);
    }

    #[test]
    fn open_close_closed_is_a_legal_path() {
        let mut trade = sample();
        trade.transition_to_closing().unwrap();
        trade.transition_to_closed(Utc::now()).unwrap();
        assert_eq!(trade.state, TradeState::Closed);
        assert!(trade.closed_at.is_some());
    }

    #[test]
    fn closing_directly_to_closed_without_closing_state_is_rejected() {
        let mut trade = sample();
        let err = trade.transition_to_closed(Utc::now()).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidTransition { .. }));
    }

    #[test]
    fn qty_delta_reflects_post_trim_quantities() {
        let mut trade = sample();
        trade.short_qty = dec!(0.007);
        trade.long_qty = dec!(0.007);
        assert_eq!(trade.qty_delta(), Decimal::ZERO);
    }
}
