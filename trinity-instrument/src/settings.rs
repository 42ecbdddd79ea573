use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Venue margin mode, supplied per-exchange at adapter construction rather than through the
/// typed engine config (credentials and venue-account settings are environment-only, §6).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    Cross,
    Isolated,
}

/// Whether a venue's account tracks one net position per symbol (`OneWay`) or a separate long
/// and short position per symbol (`Hedged`). Account-wide on every supported venue, not
/// per-symbol, so it is fixed at adapter construction rather than threaded through each call.
///
/// `Hedged` requires `place_order` to attach a venue-specific position-side parameter so the
/// venue knows which side of the hedge an order applies to; `OneWay` sends no such parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    OneWay,
    Hedged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_mode_round_trips_through_json() {
        let json = serde_json::to_string(&PositionMode::Hedged).unwrap();
        assert_eq!(json, r#""hedged""#);
        assert_eq!(serde_json::from_str::<PositionMode>(&json).unwrap(), PositionMode::Hedged);
    }
}
