use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Unique identifier for a perpetual-swap venue this engine knows how to trade.
///
/// Each variant corresponds to one `ExchangeAdapter` implementation in `trinity-execution`.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename = "exchange", rename_all = "snake_case")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Okx,
    Gateio,
    Kucoin,
    Kraken,
}

impl ExchangeId {
    /// Return the &str representation of this [`ExchangeId`], used as the KV key segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
            ExchangeId::Gateio => "gateio",
            ExchangeId::Kucoin => "kucoin",
            ExchangeId::Kraken => "kraken",
        }
    }

    pub const fn all() -> [ExchangeId; 6] {
        [
            ExchangeId::Binance,
            ExchangeId::Bybit,
            ExchangeId::Okx,
            ExchangeId::Gateio,
            ExchangeId::Kucoin,
            ExchangeId::Kraken,
        ]
    }
}

impl std::str::FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binance" => Ok(ExchangeId::Binance),
            "bybit" => Ok(ExchangeId::Bybit),
            "okx" => Ok(ExchangeId::Okx),
            "gateio" => Ok(ExchangeId::Gateio),
            "kucoin" => Ok(ExchangeId::Kucoin),
            "kraken" => Ok(ExchangeId::Kraken),
            other => Err(format!("unrecognised exchange id: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_de_exchange_id() {
        assert_eq!(
            serde_json::from_str::<ExchangeId>(r#""bybit""#).unwrap(),
            ExchangeId::Bybit
        );
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("deribit".parse::<ExchangeId>().is_err());
    }
}
