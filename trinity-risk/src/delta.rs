use std::collections::HashMap;

use rust_decimal::Decimal;
use trinity_instrument::{ExchangeId, Position, Symbol};

/// One symbol's net signed position across every venue, and the venues actually holding it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBreach {
    pub symbol: Symbol,
    pub net_quantity: Decimal,
    pub holding_exchanges: Vec<ExchangeId>,
}

/// Sums signed quantity per symbol across a full cross-exchange position snapshot.
///
/// Positive is long, negative is short (see [`trinity_instrument::Position::signed_quantity`]):
/// a perfectly delta-neutral pair sums to zero for its symbol.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    net: HashMap<Symbol, Decimal>,
    holders: HashMap<Symbol, Vec<ExchangeId>>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from scratch for one tick's snapshot. The tracker holds no state across ticks:
    /// delta is recomputed fresh every time from authoritative adapter data.
    pub fn rebuild(&mut self, positions: &[Position]) {
        self.net.clear();
        self.holders.clear();
        for position in positions {
            if position.quantity.is_zero() {
                continue;
            }
            *self.net.entry(position.symbol.clone()).or_insert(Decimal::ZERO) += position.signed_quantity();
            let holders = self.holders.entry(position.symbol.clone()).or_default();
            if !holders.contains(&position.exchange) {
                holders.push(position.exchange);
            }
        }
    }

    pub fn net_quantity(&self, symbol: &Symbol) -> Decimal {
        self.net.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// Every symbol whose absolute net quantity exceeds `threshold`.
    pub fn breaches(&self, threshold: Decimal) -> Vec<DeltaBreach> {
        self.net
            .iter()
            .filter(|(_, qty)| qty.abs() > threshold)
            .map(|(symbol, qty)| DeltaBreach {
                symbol: symbol.clone(),
                net_quantity: *qty,
                holding_exchanges: self.holders.get(symbol).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trinity_instrument::OrderSide;

    fn position(exchange: ExchangeId, symbol: &str, side: OrderSide, qty: Decimal) -> Position {
        Position::new(exchange, Symbol::from(symbol), side, qty, dec!(50_000), Decimal::ZERO, 5)
    }

    #[test]
    fn balanced_pair_nets_to_zero() {
        let mut tracker = DeltaTracker::new();
        tracker.rebuild(&[
            position(ExchangeId::Binance, "BTC-USDT", OrderSide::Buy, dec!(0.01)),
            position(ExchangeId::Bybit, "BTC-USDT", OrderSide::Sell, dec!(0.01)),
        ]);
        assert_eq!(tracker.net_quantity(&Symbol::from("BTC-USDT")), Decimal::ZERO);
        assert!(tracker.breaches(dec!(0.0001)).is_empty());
    }

    #[test]
    fn imbalanced_pair_breaches_threshold() {
        let mut tracker = DeltaTracker::new();
        tracker.rebuild(&[
            position(ExchangeId::Binance, "BTC-USDT", OrderSide::Buy, dec!(0.01)),
            position(ExchangeId::Bybit, "BTC-USDT", OrderSide::Sell, dec!(0.006)),
        ]);
        let breaches = tracker.breaches(dec!(0.001));
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].net_quantity, dec!(0.004));
        assert_eq!(breaches[0].holding_exchanges.len(), 2);
    }

    #[test]
    fn zero_quantity_positions_are_not_holders() {
        let mut tracker = DeltaTracker::new();
        tracker.rebuild(&[position(ExchangeId::Okx, "ETH-USDT", OrderSide::Buy, Decimal::ZERO)]);
        assert!(tracker.holders.get(&Symbol::from("ETH-USDT")).is_none());
    }
}
