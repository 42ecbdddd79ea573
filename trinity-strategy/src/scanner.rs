use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};
use trinity_execution::{ExchangeAdapter, FundingCacheEntry};
use trinity_instrument::{ExchangeId, Symbol};
use trinity_integration::KvStore;
use trinity_risk::RiskLimits;

use crate::{
    calculator::{classify, cherry_pick_edge_pct, hourly_rate_pct, immediate_spread_pct, normalized_spread_8h_pct, round_trip_fees_pct},
    config::TradingParams,
    opportunity::{Opportunity, OpportunityMode},
    sizing::{harmonized_lot_step, size_trade},
};

pub type AdapterMap = HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>;

const SUMMARY_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_DISPLAY: usize = 5;
/// Mirrors §4.4's orphan-close / CHERRY_PICK exit margin: the cost leg must be at least this
/// far out before a cherry-pick is worth opening at all.
const CHERRY_PICK_MIN_COST_LEAD_MS: i64 = 30 * 60_000;
const CHERRY_PICK_EXIT_MARGIN_MS: i64 = 120_000;

/// Output of one scan tick: the best qualified candidate per exchange pair (ranked, for the
/// controller to consume), plus a padded display list (qualified first, then near-misses) for
/// operator visibility.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub qualified: Vec<Opportunity>,
    pub display: Vec<Opportunity>,
}

/// Fuses per-adapter funding caches into ranked [`Opportunity`] values every scan tick (§4.3).
pub struct Scanner {
    adapters: AdapterMap,
    kv: Arc<dyn KvStore>,
    params: TradingParams,
    risk_limits: RiskLimits,
    leverage_by_exchange: HashMap<ExchangeId, u32>,
    scan_parallelism: usize,
    last_summary_log: Mutex<Option<Instant>>,
}

impl Scanner {
    pub fn new(
        adapters: AdapterMap,
        kv: Arc<dyn KvStore>,
        params: TradingParams,
        risk_limits: RiskLimits,
        leverage_by_exchange: HashMap<ExchangeId, u32>,
        scan_parallelism: usize,
    ) -> Self {
        Self {
            adapters,
            kv,
            params,
            risk_limits,
            leverage_by_exchange,
            scan_parallelism: scan_parallelism.max(1),
            last_summary_log: Mutex::new(None),
        }
    }

    fn leverage_for(&self, exchange: ExchangeId) -> Decimal {
        Decimal::from(*self.leverage_by_exchange.get(&exchange).unwrap_or(&1))
    }

    /// Run one scan over `symbols` (the union of symbols known to at least one adapter).
    /// `now_ms` is unix-epoch milliseconds, passed in rather than read from the clock so the
    /// scanner stays deterministically testable.
    pub async fn scan(&self, symbols: &[Symbol], now_ms: i64) -> ScanResult {
        let per_symbol: Vec<Vec<Opportunity>> = stream::iter(symbols.iter().cloned())
            .map(|symbol| self.scan_symbol(symbol, now_ms))
            .buffer_unordered(self.scan_parallelism)
            .collect()
            .await;

        let all: Vec<Opportunity> = per_symbol.into_iter().flatten().collect();

        let mut best_per_pair: HashMap<(ExchangeId, ExchangeId), Opportunity> = HashMap::new();
        for opp in all.iter().filter(|o| o.qualified) {
            best_per_pair
                .entry(opp.exchange_pair())
                .and_modify(|existing| {
                    if opp.immediate_net_pct > existing.immediate_net_pct {
                        *existing = opp.clone();
                    }
                })
                .or_insert_with(|| opp.clone());
        }
        let mut qualified: Vec<Opportunity> = best_per_pair.into_values().collect();
        qualified.sort_by(|a, b| b.immediate_net_pct.cmp(&a.immediate_net_pct));

        let display = build_display_list(all);

        self.log_summary(&qualified);

        ScanResult { qualified, display }
    }

    async fn scan_symbol(&self, symbol: Symbol, now_ms: i64) -> Vec<Opportunity> {
        if self.kv.is_cooled_down(symbol.as_str()).await {
            return Vec::new();
        }

        let mut entries: Vec<(ExchangeId, FundingCacheEntry)> = Vec::new();
        for (exchange, adapter) in &self.adapters {
            if let Some(entry) = adapter.get_cached_funding(&symbol).await {
                entries.push((*exchange, entry));
            }
        }
        if entries.len() < 2 {
            return Vec::new();
        }

        let mut found = Vec::new();
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let (exchange_a, entry_a) = &entries[i];
                let (exchange_b, entry_b) = &entries[j];

                let forward = self.evaluate_direction(&symbol, *exchange_a, entry_a, *exchange_b, entry_b, now_ms).await;
                let reverse = self.evaluate_direction(&symbol, *exchange_b, entry_b, *exchange_a, entry_a, now_ms).await;

                if let Some(opp) = pick_better(forward, reverse) {
                    found.push(opp);
                }
            }
        }
        found
    }

    /// Evaluates one (long, short) direction for `symbol` against this tick's funding caches
    /// (§4.3 "Direction evaluation"). Returns `None` for `both_cost` or stale data; otherwise
    /// returns an `Opportunity`, qualified or not (unqualified-but-positive-spread candidates
    /// are kept as display-only near-misses).
    async fn evaluate_direction(
        &self,
        symbol: &Symbol,
        long_exchange: ExchangeId,
        long_entry: &FundingCacheEntry,
        short_exchange: ExchangeId,
        short_entry: &FundingCacheEntry,
        now_ms: i64,
    ) -> Option<Opportunity> {
        let long_rate = long_entry.rate;
        let short_rate = short_entry.rate;
        let classification = classify(long_rate, short_rate);
        if classification.both_cost() {
            return None;
        }

        // Reject stale: an income side whose next-payment has already passed.
        if classification.long_is_income && long_entry.next_funding_ms <= now_ms {
            return None;
        }
        if classification.short_is_income && short_entry.next_funding_ms <= now_ms {
            return None;
        }

        let long_adapter = self.adapters.get(&long_exchange)?;
        let short_adapter = self.adapters.get(&short_exchange)?;
        let long_spec = long_adapter.get_instrument_spec(symbol).await.ok()?;
        let short_spec = short_adapter.get_instrument_spec(symbol).await.ok()?;

        let reference_price = long_adapter.get_ticker(symbol).await.unwrap_or(Decimal::ZERO);
        let suggested_qty = match (long_adapter.get_balance().await, short_adapter.get_balance().await) {
            (Ok(long_balance), Ok(short_balance)) => size_trade(
                long_balance.free,
                short_balance.free,
                self.leverage_for(long_exchange),
                reference_price,
                harmonized_lot_step(&long_spec, &short_spec),
                &self.risk_limits,
            ),
            _ => Decimal::ZERO,
        };

        let immediate_spread = immediate_spread_pct(long_rate, short_rate);
        let funding_spread_8h = normalized_spread_8h_pct(long_rate, long_entry.interval_hours, short_rate, short_entry.interval_hours);
        let fees_pct = round_trip_fees_pct(long_spec.taker_fee, short_spec.taker_fee);
        let total_cost_pct = fees_pct + self.params.slippage_buffer_pct + self.params.safety_buffer_pct + self.params.basis_buffer_pct;

        let window_ms = i64::from(self.params.max_entry_window_minutes) * 60_000;
        let long_within_window = long_entry.next_funding_ms - now_ms <= window_ms;
        let short_within_window = short_entry.next_funding_ms - now_ms <= window_ms;

        let long_is_imminent_income = classification.long_is_income && long_within_window;
        let short_is_imminent_income = classification.short_is_income && short_within_window;

        let mut imminent_income_pct = Decimal::ZERO;
        if long_is_imminent_income {
            imminent_income_pct += long_rate.abs() * Decimal::from(100);
        }
        if short_is_imminent_income {
            imminent_income_pct += short_rate.abs() * Decimal::from(100);
        }

        let mut imminent_cost_pct = Decimal::ZERO;
        if !classification.long_is_income && long_within_window {
            imminent_cost_pct += long_rate.abs() * Decimal::from(100);
        }
        if !classification.short_is_income && short_within_window {
            imminent_cost_pct += short_rate.abs() * Decimal::from(100);
        }

        let imminent_spread = imminent_income_pct - imminent_cost_pct;
        let any_imminent = long_is_imminent_income || short_is_imminent_income;

        let closest_ms = [
            long_is_imminent_income.then_some(long_entry.next_funding_ms),
            short_is_imminent_income.then_some(short_entry.next_funding_ms),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or_else(|| long_entry.next_funding_ms.min(short_entry.next_funding_ms));

        let min_interval_hours = long_entry.interval_hours.min(short_entry.interval_hours);

        let hold_qualifies = any_imminent
            && imminent_spread >= self.params.min_funding_spread_pct
            && (imminent_spread - total_cost_pct) >= self.params.min_net_pct;

        if hold_qualifies {
            let net = imminent_spread - total_cost_pct;
            return Some(Opportunity {
                symbol: symbol.clone(),
                long_exchange,
                short_exchange,
                long_rate,
                short_rate,
                immediate_spread_pct: immediate_spread,
                funding_spread_pct: funding_spread_8h,
                immediate_net_pct: net,
                gross_edge_pct: imminent_spread,
                fees_pct: total_cost_pct,
                net_edge_pct: net,
                suggested_qty,
                reference_price,
                min_interval_hours,
                hourly_rate_pct: hourly_rate_pct(net, long_entry.interval_hours, short_entry.interval_hours),
                next_funding_ms: closest_ms,
                mode: OpportunityMode::Hold,
                exit_before_ms: None,
                n_collections: 0,
                qualified: true,
            });
        }

        // CHERRY_PICK: only when exactly one leg is income and the other is a cost leg.
        let exactly_one_income = classification.long_is_income != classification.short_is_income;
        if exactly_one_income {
            let (income_rate, income_next_ms, cost_next_ms) = if classification.long_is_income {
                (long_rate, long_entry.next_funding_ms, short_entry.next_funding_ms)
            } else {
                (short_rate, short_entry.next_funding_ms, long_entry.next_funding_ms)
            };

            let cost_far_enough = cost_next_ms - now_ms >= CHERRY_PICK_MIN_COST_LEAD_MS;
            let income_before_cost = income_next_ms < cost_next_ms;
            let income_within_window = income_next_ms - now_ms <= window_ms;

            if cost_far_enough && income_before_cost && income_within_window {
                let cp_gross = cherry_pick_edge_pct(income_rate, 1);
                let cp_net = cp_gross - total_cost_pct;

                if cp_gross >= self.params.min_funding_spread_pct && cp_net >= self.params.min_net_pct {
                    return Some(Opportunity {
                        symbol: symbol.clone(),
                        long_exchange,
                        short_exchange,
                        long_rate,
                        short_rate,
                        immediate_spread_pct: immediate_spread,
                        funding_spread_pct: funding_spread_8h,
                        immediate_net_pct: cp_net,
                        gross_edge_pct: cp_gross,
                        fees_pct: total_cost_pct,
                        net_edge_pct: cp_net,
                        suggested_qty,
                        reference_price,
                        min_interval_hours,
                        hourly_rate_pct: hourly_rate_pct(cp_net, long_entry.interval_hours, short_entry.interval_hours),
                        next_funding_ms: income_next_ms,
                        mode: OpportunityMode::CherryPick,
                        exit_before_ms: Some(cost_next_ms - CHERRY_PICK_EXIT_MARGIN_MS),
                        n_collections: 1,
                        qualified: true,
                    });
                }
            }
        }

        // Neither HOLD nor CHERRY_PICK qualified. Keep as a display-only near-miss when the
        // immediate spread is at least positive, so operators can see what almost worked.
        if immediate_spread <= Decimal::ZERO {
            return None;
        }

        let net = immediate_spread - total_cost_pct;
        Some(Opportunity {
            symbol: symbol.clone(),
            long_exchange,
            short_exchange,
            long_rate,
            short_rate,
            immediate_spread_pct: immediate_spread,
            funding_spread_pct: funding_spread_8h,
            immediate_net_pct: net,
            gross_edge_pct: immediate_spread,
            fees_pct: total_cost_pct,
            net_edge_pct: net,
            suggested_qty,
            reference_price,
            min_interval_hours,
            hourly_rate_pct: hourly_rate_pct(net, long_entry.interval_hours, short_entry.interval_hours),
            next_funding_ms: closest_ms,
            mode: OpportunityMode::Hold,
            exit_before_ms: None,
            n_collections: 0,
            qualified: false,
        })
    }

    fn log_summary(&self, qualified: &[Opportunity]) {
        let mut last = self.last_summary_log.lock();
        let due = last.is_none_or(|at| at.elapsed() >= SUMMARY_LOG_INTERVAL);
        if !due {
            return;
        }
        *last = Some(Instant::now());
        drop(last);

        match qualified.first() {
            Some(top) => info!(
                symbol = %top.symbol,
                long = %top.long_exchange,
                short = %top.short_exchange,
                net_edge_pct = %top.net_edge_pct,
                qualified_count = qualified.len(),
                "scan summary"
            ),
            None => info!(qualified_count = 0, "scan summary: no qualified opportunities"),
        }
    }
}

/// Prefers a qualified direction over an unqualified one; among equally-qualified directions,
/// prefers the higher `funding_spread_pct` (§4.3 step 5).
fn pick_better(a: Option<Opportunity>, b: Option<Opportunity>) -> Option<Opportunity> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if a.qualified != b.qualified {
                return Some(if a.qualified { a } else { b });
            }
            if a.funding_spread_pct >= b.funding_spread_pct { Some(a) } else { Some(b) }
        }
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn build_display_list(mut all: Vec<Opportunity>) -> Vec<Opportunity> {
    all.sort_by(|a, b| b.qualified.cmp(&a.qualified).then(b.hourly_rate_pct.cmp(&a.hourly_rate_pct)));
    all.truncate(MAX_DISPLAY);
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trinity_execution::client::mock::MockAdapter;
    use trinity_instrument::InstrumentSpec;
    use trinity_integration::MemoryStore;

    fn spec(taker_fee: Decimal) -> InstrumentSpec {
        InstrumentSpec::new(dec!(1), dec!(0.1), dec!(0.001), dec!(5), dec!(0.0002), taker_fee)
    }

    fn scanner_with(adapters: AdapterMap, params: TradingParams) -> Scanner {
        Scanner::new(adapters, Arc::new(MemoryStore::new()), params, RiskLimits::default(), HashMap::new(), 10)
    }

    #[tokio::test]
    async fn hold_qualifies_when_both_legs_imminent_and_net_positive() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec(dec!(0.0005))));
        binance.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0001), next_funding_ms: 5 * 60_000, interval_hours: 8 },
        );
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec(dec!(0.0005))));
        bybit.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0080), next_funding_ms: 5 * 60_000, interval_hours: 1 },
        );

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let scanner = scanner_with(adapters, TradingParams::default());
        let result = scanner.scan(&[Symbol::from("BTC-USDT")], 0).await;

        assert_eq!(result.qualified.len(), 1);
        let opp = &result.qualified[0];
        assert_eq!(opp.mode, OpportunityMode::Hold);
        assert_eq!(opp.long_exchange, ExchangeId::Binance);
        assert_eq!(opp.short_exchange, ExchangeId::Bybit);
        assert!(opp.net_edge_pct > Decimal::ZERO);
    }

    #[tokio::test]
    async fn below_net_threshold_produces_zero_qualified() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec(dec!(0.0005))));
        binance.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0001), next_funding_ms: 5 * 60_000, interval_hours: 8 },
        );
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec(dec!(0.0005))));
        bybit.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0003), next_funding_ms: 5 * 60_000, interval_hours: 8 },
        );

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let scanner = scanner_with(adapters, TradingParams::default());
        let result = scanner.scan(&[Symbol::from("BTC-USDT")], 0).await;
        assert!(result.qualified.is_empty());
    }

    #[tokio::test]
    async fn cherry_pick_qualifies_when_cost_leg_is_far_enough_out() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec(dec!(0.0005))));
        binance.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0010), next_funding_ms: 3 * 3_600_000, interval_hours: 8 },
        );
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec(dec!(0.0005))));
        bybit.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0080), next_funding_ms: 10 * 60_000, interval_hours: 1 },
        );

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let scanner = scanner_with(adapters, TradingParams::default());
        let result = scanner.scan(&[Symbol::from("BTC-USDT")], 0).await;

        assert_eq!(result.qualified.len(), 1);
        let opp = &result.qualified[0];
        assert_eq!(opp.mode, OpportunityMode::CherryPick);
        assert_eq!(opp.exit_before_ms, Some(10 * 60_000 - CHERRY_PICK_EXIT_MARGIN_MS));
        assert_eq!(opp.n_collections, 1);
    }

    #[tokio::test]
    async fn equal_rates_produce_zero_opportunities() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec(dec!(0.0005))));
        binance.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0003), next_funding_ms: 5 * 60_000, interval_hours: 8 },
        );
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec(dec!(0.0005))));
        bybit.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0003), next_funding_ms: 5 * 60_000, interval_hours: 8 },
        );

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let scanner = scanner_with(adapters, TradingParams::default());
        let result = scanner.scan(&[Symbol::from("BTC-USDT")], 0).await;
        assert!(result.qualified.is_empty());
        assert!(result.display.is_empty());
    }

    #[tokio::test]
    async fn cooled_down_symbol_is_skipped_entirely() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec(dec!(0.0005))));
        binance.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0001), next_funding_ms: 5 * 60_000, interval_hours: 8 },
        );
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec(dec!(0.0005))));
        bybit.set_funding(
            Symbol::from("BTC-USDT"),
            FundingCacheEntry { rate: dec!(0.0050), next_funding_ms: 5 * 60_000, interval_hours: 1 },
        );

        let kv = Arc::new(MemoryStore::new());
        kv.set_cooldown("BTC-USDT", 60).await;

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let scanner = Scanner::new(adapters, kv, TradingParams::default(), RiskLimits::default(), HashMap::new(), 10);
        let result = scanner.scan(&[Symbol::from("BTC-USDT")], 0).await;
        assert!(result.qualified.is_empty());
        assert!(result.display.is_empty());
    }
}
