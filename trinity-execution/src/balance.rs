use derive_more::Constructor;
use rust_decimal::Decimal;

/// Margin account balance for the settlement asset (USDT on every venue this engine trades).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Constructor)]
pub struct Balance {
    pub free: Decimal,
    pub total: Decimal,
}
