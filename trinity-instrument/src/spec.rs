use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{exchange::ExchangeId, symbol::Symbol};

/// Trading rules for one instrument on one venue, as reported by the venue's market metadata.
///
/// All size/price rounding in the execution and strategy crates is derived from this.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Constructor)]
pub struct InstrumentSpec {
    /// Size of a single exchange-native contract, denominated in `base`.
    ///
    /// 1 for venues that quote quantity directly in base asset (Binance, Bybit); > 1 for
    /// inverse/coin-margined or contract-multiplier venues (OKX `SWAP` contracts).
    pub contract_size: Decimal,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_notional: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

impl InstrumentSpec {
    /// Round `quantity` (in base units) down to the nearest `lot_size` multiple.
    ///
    /// Never rounds up: over-rounding a quantity can push notional past what margin supports.
    pub fn round_lot_down(&self, quantity: Decimal) -> Decimal {
        if self.lot_size.is_zero() {
            return quantity;
        }
        (quantity / self.lot_size).floor() * self.lot_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct InstrumentKey {
    pub exchange: ExchangeId,
}

impl InstrumentKey {
    pub fn new(exchange: ExchangeId) -> Self {
        Self { exchange }
    }
}

/// Convenience pairing of a venue and the symbol traded there, used as a map key throughout
/// the discovery scanner and execution controller.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct VenueSymbol {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_lot_down_floors_to_increment() {
        let spec = InstrumentSpec::new(dec!(1), dec!(0.1), dec!(0.001), dec!(5), dec!(0.0002), dec!(0.0005));
        assert_eq!(spec.round_lot_down(dec!(1.2347)), dec!(1.234));
    }

    #[test]
    fn round_lot_down_is_noop_for_exact_multiple() {
        let spec = InstrumentSpec::new(dec!(1), dec!(0.1), dec!(0.01), dec!(5), dec!(0.0002), dec!(0.0005));
        assert_eq!(spec.round_lot_down(dec!(1.20)), dec!(1.20));
    }
}
