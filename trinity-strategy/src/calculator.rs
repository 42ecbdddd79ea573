//! Pure funding-rate arithmetic (§4.2). Every function here is side-effect free and operates
//! on signed decimal rates; no adapter or clock dependency belongs in this module.

use rust_decimal::Decimal;

/// Which side(s) of a long/short pair receive funding income at the next payment.
///
/// Sign convention: a venue's funding rate is positive when longs pay shorts, negative when
/// shorts pay longs. So the long leg is income when its rate is negative, and the short leg is
/// income when its rate is positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerPaymentClassification {
    pub long_is_income: bool,
    pub short_is_income: bool,
}

impl PerPaymentClassification {
    pub fn both_cost(&self) -> bool {
        !self.long_is_income && !self.short_is_income
    }
}

pub fn classify(long_rate: Decimal, short_rate: Decimal) -> PerPaymentClassification {
    PerPaymentClassification {
        long_is_income: long_rate < Decimal::ZERO,
        short_is_income: short_rate > Decimal::ZERO,
    }
}

/// PnL percentage that would accrue at the next single payment on each leg, with no
/// cross-venue interval normalisation.
pub fn immediate_spread_pct(long_rate: Decimal, short_rate: Decimal) -> Decimal {
    (-long_rate + short_rate) * Decimal::from(100)
}

/// Immediate spread normalised to a common 8-hour cadence, for comparing venues whose funding
/// intervals differ (e.g. a 1 h venue against an 8 h venue).
pub fn normalized_spread_8h_pct(
    long_rate: Decimal,
    long_interval_hours: u32,
    short_rate: Decimal,
    short_interval_hours: u32,
) -> Decimal {
    let eight = Decimal::from(8);
    let long_hours = Decimal::from(long_interval_hours.max(1));
    let short_hours = Decimal::from(short_interval_hours.max(1));
    (-long_rate * eight / long_hours + short_rate * eight / short_hours) * Decimal::from(100)
}

/// Net-of-cost spread amortised per hour, using the shorter of the two funding intervals (the
/// cadence at which the engine can realistically re-evaluate whether to keep holding).
pub fn hourly_rate_pct(immediate_net_pct: Decimal, long_interval_hours: u32, short_interval_hours: u32) -> Decimal {
    let min_hours = Decimal::from(long_interval_hours.min(short_interval_hours).max(1));
    immediate_net_pct / min_hours
}

/// Edge from collecting `n` payments on one income leg, ignoring fees.
pub fn cherry_pick_edge_pct(income_rate_per_payment: Decimal, n: u32) -> Decimal {
    income_rate_per_payment.abs() * Decimal::from(n) * Decimal::from(100)
}

/// Taker-fee cost of opening and later closing both legs.
pub fn round_trip_fees_pct(long_taker_fee: Decimal, short_taker_fee: Decimal) -> Decimal {
    (long_taker_fee + short_taker_fee) * Decimal::from(2) * Decimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn immediate_spread_is_short_minus_long() {
        assert_eq!(immediate_spread_pct(dec!(0.0001), dec!(0.0050)), dec!(0.49));
    }

    #[test]
    fn equal_rates_produce_zero_spread() {
        assert_eq!(immediate_spread_pct(dec!(0.0003), dec!(0.0003)), Decimal::ZERO);
    }

    #[test]
    fn normalized_spread_accounts_for_differing_intervals() {
        // long pays 0.01% per 8h, short receives 0.05% per 1h -> short side is 8x more potent.
        let spread = normalized_spread_8h_pct(dec!(0.0001), 8, dec!(0.0005), 1);
        assert_eq!(spread, dec!(0.39));
    }

    #[test]
    fn classify_long_short_both_income_is_possible() {
        let c = classify(dec!(-0.0001), dec!(0.0005));
        assert!(c.long_is_income);
        assert!(c.short_is_income);
        assert!(!c.both_cost());
    }

    #[test]
    fn classify_both_cost_when_long_positive_and_short_negative() {
        let c = classify(dec!(0.0003), dec!(-0.0001));
        assert!(!c.long_is_income);
        assert!(!c.short_is_income);
        assert!(c.both_cost());
    }

    #[test]
    fn cherry_pick_edge_uses_absolute_value() {
        assert_eq!(cherry_pick_edge_pct(dec!(-0.0060), 1), dec!(0.60));
    }

    #[test]
    fn round_trip_fees_doubles_both_taker_legs() {
        assert_eq!(round_trip_fees_pct(dec!(0.0005), dec!(0.0005)), dec!(0.20));
    }

    #[test]
    fn hourly_rate_uses_shorter_interval() {
        assert_eq!(hourly_rate_pct(dec!(0.48), 8, 1), dec!(0.48));
    }
}
