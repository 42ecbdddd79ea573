use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{exchange::ExchangeId, symbol::Symbol};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Open position on one venue, quantity already converted to base-asset units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Position {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

fn default_leverage() -> u32 {
    1
}

impl Position {
    /// Signed quantity: positive for long, negative for short. Used when summing exposure
    /// across venues to check delta-neutrality.
    pub fn signed_quantity(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.quantity,
            OrderSide::Sell => -self.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderRequest {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Which side of a hedged-mode position this order affects: `Buy` opens/adds to the long
    /// position, `Sell reduce_only` closes it, and symmetrically for `Sell`/`Buy reduce_only`
    /// on the short position. Only meaningful on venues running in hedged position mode, where
    /// long and short are tracked as two independent positions per symbol.
    pub fn hedge_affects_long(&self) -> bool {
        matches!(self.side, OrderSide::Buy) != self.reduce_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn request(side: OrderSide, reduce_only: bool) -> OrderRequest {
        OrderRequest::new(ExchangeId::Binance, Symbol::from("BTC-USDT"), side, Decimal::ONE, reduce_only)
    }

    #[test]
    fn hedge_affects_long_opens_on_buy_and_closes_on_reduce_only_sell() {
        assert!(request(OrderSide::Buy, false).hedge_affects_long());
        assert!(request(OrderSide::Sell, true).hedge_affects_long());
        assert!(!request(OrderSide::Sell, false).hedge_affects_long());
        assert!(!request(OrderSide::Buy, true).hedge_affects_long());
    }
}
