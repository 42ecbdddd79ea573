//! Position sizing (§4.5). Shared between the discovery scanner (suggested size for display /
//! ranking) and the execution controller (authoritative size at open time, against freshly
//! refetched balances).

use rust_decimal::Decimal;
use trinity_instrument::InstrumentSpec;
use trinity_risk::RiskLimits;

pub fn round_lot_down(quantity: Decimal, lot_step: Decimal) -> Decimal {
    if lot_step.is_zero() {
        return quantity;
    }
    (quantity / lot_step).floor() * lot_step
}

/// Both legs are sized identically in base-currency units, using the coarser of the two lots
/// so neither venue ever needs a quantity finer than it supports.
pub fn harmonized_lot_step(long_spec: &InstrumentSpec, short_spec: &InstrumentSpec) -> Decimal {
    long_spec.lot_size.max(short_spec.lot_size)
}

/// `margin = min(long_free, short_free) * position_size_pct`, `notional = min(margin *
/// leverage, max_position_size_usd)`, `quantity = notional / reference_price` rounded down to
/// `lot_step`. Leverage is always the long leg's configured leverage.
pub fn size_trade(long_free: Decimal, short_free: Decimal, leverage: Decimal, reference_price: Decimal, lot_step: Decimal, limits: &RiskLimits) -> Decimal {
    if reference_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let margin = long_free.min(short_free) * limits.position_size_pct;
    let notional = (margin * leverage).min(limits.max_position_size_usd);
    round_lot_down(notional / reference_price, lot_step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sizes_to_the_lot_step_and_respects_the_usd_cap() {
        let limits = RiskLimits { max_margin_usage: dec!(0.8), max_position_size_usd: dec!(1000), delta_threshold_pct: dec!(0.001), position_size_pct: dec!(0.70) };
        // margin = min(800,800)*0.70 = 560; notional = min(560*5, 1000) = 1000; qty = 1000/50000 = 0.02
        let qty = size_trade(dec!(800), dec!(800), dec!(5), dec!(50_000), dec!(0.001), &limits);
        assert_eq!(qty, dec!(0.02));
    }

    #[test]
    fn zero_reference_price_sizes_to_zero_instead_of_dividing_by_zero() {
        let limits = RiskLimits::default();
        assert_eq!(size_trade(dec!(800), dec!(800), dec!(5), Decimal::ZERO, dec!(0.001), &limits), Decimal::ZERO);
    }
}
