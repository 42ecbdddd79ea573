use rust_decimal::Decimal;

/// Result of a placed order as reported back by the venue. `filled_quantity` is always in base
/// units (already converted from exchange-native contract units), because position sizing,
/// delta checks and PnL all reason in base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillResult {
    pub filled_quantity: Decimal,
    pub average_price: Decimal,
}

impl FillResult {
    pub fn unfilled() -> Self {
        Self {
            filled_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.filled_quantity > Decimal::ZERO
    }
}
