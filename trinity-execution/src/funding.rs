use rust_decimal::Decimal;

/// Most recently observed funding rate for one instrument, plus enough metadata to know when
/// the next payment lands and reason about partial-interval rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingCacheEntry {
    pub rate: Decimal,
    /// Unix epoch millis of the next funding settlement.
    pub next_funding_ms: i64,
    pub interval_hours: u32,
}

impl FundingCacheEntry {
    /// Build a cache entry from raw venue data, forward-correcting `next_funding_ms` if it's
    /// already in the past relative to `now_ms` (§4.1: a watcher cycle can be delayed long
    /// enough that the venue's reported next-payment timestamp has already elapsed).
    pub fn from_venue(rate: Decimal, next_funding_ms: i64, interval_hours: u32, now_ms: i64) -> Self {
        let mut entry = Self { rate, next_funding_ms, interval_hours };
        entry.advance_past(now_ms);
        entry
    }

    /// Advance `next_funding_ms` forward by whole intervals until it is back in the future,
    /// relative to `now_ms`. Funding watchers that miss a cycle (a backoff pause, a slow poll)
    /// must not be left pointing at a settlement timestamp that has already passed.
    pub fn advance_past(&mut self, now_ms: i64) {
        let interval_ms = i64::from(self.interval_hours) * 3_600_000;
        if interval_ms <= 0 {
            return;
        }
        while self.next_funding_ms <= now_ms {
            self.next_funding_ms += interval_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn advance_past_skips_multiple_missed_intervals() {
        let mut entry = FundingCacheEntry {
            rate: dec!(0.0001),
            next_funding_ms: 0,
            interval_hours: 8,
        };
        entry.advance_past(20 * 3_600_000);
        assert_eq!(entry.next_funding_ms, 24 * 3_600_000);
    }

    #[test]
    fn advance_past_is_noop_when_already_future() {
        let mut entry = FundingCacheEntry {
            rate: dec!(0.0001),
            next_funding_ms: 100_000,
            interval_hours: 8,
        };
        entry.advance_past(0);
        assert_eq!(entry.next_funding_ms, 100_000);
    }
}
