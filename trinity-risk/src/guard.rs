use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};
use trinity_execution::ExchangeAdapter;
use trinity_instrument::{ExchangeId, OrderRequest, Symbol};
use trinity_integration::KvStore;

use crate::{
    config::{RiskGuardConfig, RiskLimits},
    delta::{DeltaBreach, DeltaTracker},
    error::RiskError,
};

/// Shared cancellation signal, mirroring [`trinity_execution::adapter::ShutdownSignal`].
pub type ShutdownSignal = watch::Receiver<bool>;

/// Continuously enforces delta-neutrality across every adapter and panic-closes a symbol that
/// drifts too far from flat. Reads positions directly from adapters; never consults the KV
/// store for trade bookkeeping (that belongs to the execution controller) but does publish
/// position snapshots and symbol cooldowns there for out-of-core observability and re-entry
/// blocking.
pub struct RiskGuard {
    adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
    kv: Arc<dyn KvStore>,
    limits: RiskLimits,
    config: RiskGuardConfig,
    grace_until: Mutex<HashMap<Symbol, Instant>>,
}

impl RiskGuard {
    pub fn new(
        adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
        kv: Arc<dyn KvStore>,
        limits: RiskLimits,
        config: RiskGuardConfig,
    ) -> Self {
        Self {
            adapters,
            kv,
            limits,
            config,
            grace_until: Mutex::new(HashMap::new()),
        }
    }

    /// Called by the execution controller immediately before placing a trade's first order.
    /// The fast loop ignores `symbol` for [`RiskGuardConfig::grace_period_sec`] afterwards, so
    /// the normal latency between opening the long and short legs never reads as a breach.
    pub fn mark_trade_opened(&self, symbol: Symbol) {
        let until = Instant::now() + Duration::from_secs(self.config.grace_period_sec);
        self.grace_until.lock().insert(symbol, until);
    }

    fn in_grace(&self, symbol: &Symbol) -> bool {
        self.grace_until
            .lock()
            .get(symbol)
            .is_some_and(|until| Instant::now() < *until)
    }

    /// Runs the fast loop (default every 5 s) until `shutdown` fires.
    pub async fn run_fast_loop(&self, mut shutdown: ShutdownSignal) {
        let interval = Duration::from_secs(self.config.fast_loop_interval_sec);
        loop {
            if *shutdown.borrow() {
                return;
            }
            if let Err(err) = self.fast_tick().await {
                warn!(%err, "risk guard skipped delta evaluation this tick");
            }
            if wait_or_shutdown(interval, &mut shutdown).await {
                return;
            }
        }
    }

    /// Runs the deep loop (default every 60 s) until `shutdown` fires, persisting a position
    /// snapshot per adapter for out-of-core observability.
    pub async fn run_deep_loop(&self, mut shutdown: ShutdownSignal) {
        let interval = Duration::from_secs(self.config.deep_loop_interval_sec);
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.deep_tick().await;
            if wait_or_shutdown(interval, &mut shutdown).await {
                return;
            }
        }
    }

    /// One fast-loop tick: fetch positions from every adapter, sum signed quantity per symbol,
    /// and panic-close (if enabled) any symbol breaching `delta_threshold_pct` outside its
    /// grace window.
    ///
    /// Critical safety property: a failed position fetch on any single adapter aborts the
    /// *entire* tick. Delta is never evaluated against an incomplete cross-exchange snapshot.
    pub async fn fast_tick(&self) -> Result<Vec<DeltaBreach>, RiskError> {
        let mut snapshot = Vec::new();
        for (exchange, adapter) in &self.adapters {
            let positions = adapter
                .get_positions(None)
                .await
                .map_err(|source| RiskError::MissingSnapshot { exchange: *exchange, source })?;
            snapshot.extend(positions);
        }

        let mut tracker = DeltaTracker::new();
        tracker.rebuild(&snapshot);

        let breaches = tracker.breaches(self.limits.delta_threshold_pct);
        let mut reported = Vec::with_capacity(breaches.len());

        for breach in breaches {
            if self.in_grace(&breach.symbol) {
                continue;
            }

            warn!(
                symbol = %breach.symbol,
                net_quantity = %breach.net_quantity,
                threshold = %self.limits.delta_threshold_pct,
                "delta-neutrality breach"
            );

            if self.config.enable_panic_close {
                self.panic_close(&breach.symbol, &breach.holding_exchanges).await;
            }

            reported.push(breach);
        }

        Ok(reported)
    }

    /// Reduce-only closes `symbol`'s position on every exchange in `holding_exchanges`, then
    /// sets a cooldown on the symbol so the controller doesn't immediately re-open it.
    pub async fn panic_close(&self, symbol: &Symbol, holding_exchanges: &[ExchangeId]) {
        let mut any_closed = false;

        for exchange in holding_exchanges {
            let Some(adapter) = self.adapters.get(exchange) else { continue };

            let positions = match adapter.get_positions(Some(symbol)).await {
                Ok(positions) => positions,
                Err(err) => {
                    error!(%exchange, %symbol, %err, "panic close: failed to re-fetch position");
                    continue;
                }
            };

            for position in positions.into_iter().filter(|p| !p.quantity.is_zero()) {
                let request = OrderRequest::new(*exchange, symbol.clone(), position.side.opposite(), position.quantity, true);
                match adapter.place_order(request).await {
                    Ok(fill) => {
                        any_closed = true;
                        info!(%exchange, %symbol, filled = %fill.filled_quantity, "panic close filled");
                    }
                    Err(err) => error!(%exchange, %symbol, %err, "panic close order failed"),
                }
            }
        }

        if any_closed {
            self.kv
                .set_cooldown(symbol.as_str(), self.config.panic_close_cooldown_hours * 3_600)
                .await;
        }
    }

    async fn deep_tick(&self) {
        for (exchange, adapter) in &self.adapters {
            match adapter.get_positions(None).await {
                Ok(positions) => {
                    if let Ok(json) = serde_json::to_string(&PositionsSnapshot { positions }) {
                        self.kv.set_position_snapshot(exchange.as_str(), &json).await;
                    }
                }
                Err(err) => warn!(%exchange, %err, "deep loop: position snapshot failed"),
            }
        }
    }
}

#[derive(serde::Serialize)]
struct PositionsSnapshot {
    positions: Vec<trinity_instrument::Position>,
}

async fn wait_or_shutdown(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use trinity_execution::client::mock::MockAdapter;
    use trinity_instrument::{InstrumentSpec, OrderSide, Position};
    use trinity_integration::MemoryStore;

    fn spec() -> InstrumentSpec {
        InstrumentSpec::new(dec!(1), dec!(0.1), dec!(0.001), dec!(5), dec!(0.0002), dec!(0.0005))
    }

    fn guard_with(adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>) -> RiskGuard {
        RiskGuard::new(adapters, Arc::new(MemoryStore::new()), RiskLimits::default(), RiskGuardConfig::default())
    }

    #[tokio::test]
    async fn fast_tick_reports_no_breach_when_balanced() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec()));
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec()));
        binance.set_positions(vec![Position::new(
            ExchangeId::Binance,
            Symbol::from("BTC-USDT"),
            OrderSide::Buy,
            dec!(0.01),
            dec!(50_000),
            Decimal::ZERO,
            5,
        )]);
        bybit.set_positions(vec![Position::new(
            ExchangeId::Bybit,
            Symbol::from("BTC-USDT"),
            OrderSide::Sell,
            dec!(0.01),
            dec!(50_000),
            Decimal::ZERO,
            5,
        )]);

        let mut adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let guard = guard_with(adapters);
        let breaches = guard.fast_tick().await.unwrap();
        assert!(breaches.is_empty());
    }

    #[tokio::test]
    async fn fast_tick_aborts_entirely_on_partial_snapshot() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec()));
        binance.set_positions(vec![Position::new(
            ExchangeId::Binance,
            Symbol::from("BTC-USDT"),
            OrderSide::Buy,
            dec!(0.01),
            dec!(50_000),
            Decimal::ZERO,
            5,
        )]);
        // Bybit's leg is missing on purpose: its position fetch fails, so the snapshot is
        // incomplete and the whole tick must abort rather than reasoning about the lone
        // Binance leg as if it were a genuine breach.
        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec()));
        bybit.fail_positions();

        let mut adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let guard = guard_with(adapters);
        let err = guard.fast_tick().await.unwrap_err();
        assert!(matches!(err, RiskError::MissingSnapshot { exchange: ExchangeId::Bybit, .. }));
    }

    #[tokio::test]
    async fn unbalanced_single_adapter_position_reports_a_breach() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec()));
        binance.set_positions(vec![Position::new(
            ExchangeId::Binance,
            Symbol::from("BTC-USDT"),
            OrderSide::Buy,
            dec!(0.01),
            dec!(50_000),
            Decimal::ZERO,
            5,
        )]);
        let mut adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);

        let guard = guard_with(adapters);
        let breaches = guard.fast_tick().await.unwrap();
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].symbol, Symbol::from("BTC-USDT"));
    }

    #[tokio::test]
    async fn grace_window_suppresses_breach_until_it_expires() {
        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec()));
        binance.set_positions(vec![Position::new(
            ExchangeId::Binance,
            Symbol::from("BTC-USDT"),
            OrderSide::Buy,
            dec!(0.01),
            dec!(50_000),
            Decimal::ZERO,
            5,
        )]);
        let mut adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);

        let mut config = RiskGuardConfig::default();
        config.grace_period_sec = 3600;
        let guard = RiskGuard::new(adapters, Arc::new(MemoryStore::new()), RiskLimits::default(), config);

        guard.mark_trade_opened(Symbol::from("BTC-USDT"));
        assert!(guard.fast_tick().await.unwrap().is_empty());

        guard.grace_until.lock().clear();
        let breaches = guard.fast_tick().await.unwrap();
        assert_eq!(breaches.len(), 1);
    }
}
