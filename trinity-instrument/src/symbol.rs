use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Canonical, venue-independent symbol for a perpetual-swap contract, e.g. `"BTC-USDT"`.
///
/// Adapters are responsible for translating to/from their own venue-native symbol spelling
/// (`BTCUSDT`, `BTC-USDT-SWAP`, ...) at the edge.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(transparent)]
pub struct Symbol(SmolStr);

impl Symbol {
    pub fn new(value: impl Into<SmolStr>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
