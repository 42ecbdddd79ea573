//! Wires the discovery scanner, execution controller and risk guard into the long-lived task
//! set described in §5: a scan loop, an exit-monitor loop, and the risk guard's fast and deep
//! loops, all honoring a shared shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use trinity_execution::ShutdownSignal;
use trinity_instrument::Symbol;
use trinity_integration::KvStore;
use trinity_risk::RiskGuard;
use trinity_strategy::{AdapterMap, Controller, Scanner};

use crate::config::Config;

/// Owns the three engines and the symbol universe they scan. Cheap to clone (every field is an
/// `Arc`), so each long-lived loop can be spawned onto its own task.
#[derive(Clone)]
pub struct Engine {
    scanner: Arc<Scanner>,
    controller: Arc<Controller>,
    risk_guard: Arc<RiskGuard>,
    symbols: Vec<Symbol>,
    scan_interval: Duration,
    execute_only_best_opportunity: bool,
}

impl Engine {
    pub fn new(adapters: AdapterMap, kv: Arc<dyn KvStore>, config: Config, symbols: Vec<Symbol>) -> Self {
        let risk_guard = Arc::new(RiskGuard::new(adapters.clone(), kv.clone(), config.risk_limits, config.risk_guard));

        let scanner = Arc::new(Scanner::new(
            adapters.clone(),
            kv.clone(),
            config.trading_params,
            config.risk_limits,
            config.leverage_by_exchange.clone(),
            config.execution.scan_parallelism,
        ));

        let controller = Arc::new(Controller::new(
            adapters,
            kv,
            risk_guard.clone(),
            config.trading_params,
            config.execution,
            config.risk_limits,
            config.leverage_by_exchange,
        ));

        Self {
            scanner,
            controller,
            risk_guard,
            symbols,
            scan_interval: Duration::from_secs(config.execution.scan_interval_sec),
            execute_only_best_opportunity: config.trading_params.execute_only_best_opportunity,
        }
    }

    /// Recovers persisted trades, then runs every long-lived loop until `shutdown` fires.
    /// Returns once all four loops have exited.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        self.controller.recover().await;

        let scan_task = tokio::spawn(run_scan_loop(
            self.scanner.clone(),
            self.controller.clone(),
            self.symbols.clone(),
            self.scan_interval,
            self.execute_only_best_opportunity,
            shutdown.clone(),
        ));
        let exit_task = tokio::spawn({
            let controller = self.controller.clone();
            let shutdown = shutdown.clone();
            async move { controller.run_exit_monitor(shutdown).await }
        });
        let fast_task = tokio::spawn({
            let risk_guard = self.risk_guard.clone();
            let shutdown = shutdown.clone();
            async move { risk_guard.run_fast_loop(shutdown).await }
        });
        let deep_task = tokio::spawn({
            let risk_guard = self.risk_guard.clone();
            async move { risk_guard.run_deep_loop(shutdown).await }
        });

        let _ = tokio::join!(scan_task, exit_task, fast_task, deep_task);
    }

    /// Closes every open trade, honoring the controller's stop-time policy, and returns.
    pub async fn stop(&self, close_all_on_stop: bool) {
        self.controller.stop(close_all_on_stop).await;
    }
}

/// Spawns a task that flips the returned signal once the process receives Ctrl+C, for wiring
/// `Engine::run` up to OS-level process termination.
pub fn ctrl_c_shutdown_signal() -> ShutdownSignal {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_scan_loop(
    scanner: Arc<Scanner>,
    controller: Arc<Controller>,
    symbols: Vec<Symbol>,
    interval: Duration,
    execute_only_best_opportunity: bool,
    mut shutdown: ShutdownSignal,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let now_ms = Utc::now().timestamp_millis();
        let result = scanner.scan(&symbols, now_ms).await;
        controller.publish_opportunities(result.qualified.clone());

        for opportunity in result.qualified {
            let symbol = opportunity.symbol.clone();
            if let Err(err) = controller.handle_opportunity(opportunity).await {
                debug!(%symbol, %err, "opportunity not taken this tick");
            }
            if execute_only_best_opportunity {
                break;
            }
        }

        if wait_or_shutdown(interval, &mut shutdown).await {
            return;
        }
    }
}

async fn wait_or_shutdown(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;
    use trinity_execution::client::mock::MockAdapter;
    use trinity_execution::{balance::Balance, funding::FundingCacheEntry};
    use trinity_instrument::{ExchangeId, InstrumentSpec};
    use trinity_integration::MemoryStore;

    use super::*;

    fn spec() -> InstrumentSpec {
        InstrumentSpec::new(dec!(1), dec!(0.1), dec!(0.001), dec!(5), dec!(0.0002), dec!(0.0005))
    }

    #[tokio::test]
    async fn one_scan_and_handle_cycle_opens_a_trade_end_to_end() {
        let symbol = Symbol::from("BTC-USDT");

        let binance = Arc::new(MockAdapter::new(ExchangeId::Binance, spec()));
        binance.set_balance(Balance { free: dec!(10_000), total: dec!(10_000) });
        binance.set_ticker(symbol.clone(), dec!(50_000));
        binance.set_funding(symbol.clone(), FundingCacheEntry { rate: dec!(0.0001), next_funding_ms: 5 * 60_000, interval_hours: 8 });

        let bybit = Arc::new(MockAdapter::new(ExchangeId::Bybit, spec()));
        bybit.set_balance(Balance { free: dec!(10_000), total: dec!(10_000) });
        bybit.set_ticker(symbol.clone(), dec!(50_000));
        bybit.set_funding(symbol.clone(), FundingCacheEntry { rate: dec!(0.0080), next_funding_ms: 5 * 60_000, interval_hours: 1 });

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let kv = Arc::new(MemoryStore::new());
        let engine = Engine::new(adapters, kv, Config::default(), vec![symbol.clone()]);

        let result = engine.scanner.scan(&engine.symbols, 0).await;
        assert_eq!(result.qualified.len(), 1);

        for opportunity in result.qualified {
            engine.controller.handle_opportunity(opportunity).await.unwrap();
        }
        assert_eq!(engine.controller.active_trade_count(), 1);

        engine.stop(false).await;
    }
}
