//! Execution Controller (§4.4): opens, monitors, upgrades, and closes delta-neutral trades,
//! with orphan protection, partial-fill correction, timeout-bounded orders and crash-recoverable
//! state persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use trinity_execution::{AdapterError, ExchangeAdapter, ShutdownSignal};
use trinity_instrument::{ExchangeId, OrderRequest, OrderSide, Symbol};
use trinity_integration::KvStore;
use trinity_risk::{RiskGuard, RiskLimits};

use crate::{
    calculator::immediate_spread_pct,
    config::{ExecutionConfig, TradingParams},
    error::{Result, StrategyError},
    opportunity::{Opportunity, OpportunityMode},
    scanner::AdapterMap,
    sizing::{harmonized_lot_step, size_trade},
    trade::{TradeRecord, TradeState},
};

const CLOSE_LEG_MAX_ATTEMPTS: u32 = 3;
const CLOSE_LEG_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Owns every active [`TradeRecord`], serially processes incoming opportunities, and runs the
/// exit-monitor loop. Exclusively mutates trade state; the scanner and risk guard only read
/// adapters and never touch a `TradeRecord`.
pub struct Controller {
    adapters: AdapterMap,
    kv: Arc<dyn KvStore>,
    risk_guard: Arc<RiskGuard>,
    params: TradingParams,
    exec: ExecutionConfig,
    risk_limits: RiskLimits,
    leverage_by_exchange: HashMap<ExchangeId, u32>,
    active: Mutex<HashMap<Symbol, TradeRecord>>,
    upgrade_cooldowns: Mutex<HashMap<Symbol, Instant>>,
    latest_qualified: Mutex<Vec<Opportunity>>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapters: AdapterMap,
        kv: Arc<dyn KvStore>,
        risk_guard: Arc<RiskGuard>,
        params: TradingParams,
        exec: ExecutionConfig,
        risk_limits: RiskLimits,
        leverage_by_exchange: HashMap<ExchangeId, u32>,
    ) -> Self {
        Self {
            adapters,
            kv,
            risk_guard,
            params,
            exec,
            risk_limits,
            leverage_by_exchange,
            active: Mutex::new(HashMap::new()),
            upgrade_cooldowns: Mutex::new(HashMap::new()),
            latest_qualified: Mutex::new(Vec::new()),
        }
    }

    fn leverage_for(&self, exchange: ExchangeId) -> Decimal {
        Decimal::from(*self.leverage_by_exchange.get(&exchange).unwrap_or(&1))
    }

    fn adapter_for(&self, exchange: ExchangeId) -> Result<&Arc<dyn ExchangeAdapter>> {
        self.adapters
            .get(&exchange)
            .ok_or_else(|| StrategyError::Adapter(AdapterError::IncompatibleVenue(format!("no adapter registered for {exchange}"))))
    }

    pub fn active_trade_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Replaces the ranked qualified-opportunity list the upgrade check compares against. Called
    /// by the owning process once per scan tick.
    pub fn publish_opportunities(&self, opportunities: Vec<Opportunity>) {
        *self.latest_qualified.lock() = opportunities;
    }

    /// Reconstructs active trades from the KV store on process start (§4.6). `OPEN` trades
    /// resume normal monitoring; `CLOSING` trades are immediately re-attempted; `ERROR` trades
    /// are logged but never auto-resumed.
    pub async fn recover(&self) {
        for (trade_id, json) in self.kv.get_all_trades().await {
            let trade = match TradeRecord::from_json(&json) {
                Ok(trade) => trade,
                Err(err) => {
                    error!(%trade_id, %err, "failed to deserialize persisted trade; skipping");
                    continue;
                }
            };

            match trade.state {
                TradeState::Open => {
                    info!(symbol = %trade.symbol, %trade_id, "resuming open trade");
                    self.active.lock().insert(trade.symbol.clone(), trade);
                }
                TradeState::Closing => {
                    info!(symbol = %trade.symbol, %trade_id, "re-attempting close for recovered trade");
                    let symbol = trade.symbol.clone();
                    self.active.lock().insert(symbol.clone(), trade);
                    self.close_trade(&symbol).await;
                }
                TradeState::Closed => {
                    warn!(%trade_id, "closed trade still present in KV; deleting");
                    self.kv.delete_trade_state(&trade_id).await;
                }
                TradeState::Error => {
                    warn!(symbol = %trade.symbol, %trade_id, "trade in ERROR state requires operator intervention; not resuming");
                }
            }
        }
    }

    /// Runs the exit-monitor loop (default every 30 s) until `shutdown` fires.
    pub async fn run_exit_monitor(&self, mut shutdown: ShutdownSignal) {
        let interval = Duration::from_secs(self.exec.exit_monitor_interval_sec);
        loop {
            if *shutdown.borrow() {
                return;
            }
            let symbols: Vec<Symbol> = self.active.lock().keys().cloned().collect();
            for symbol in symbols {
                self.check_exit(&symbol).await;
            }
            if wait_or_shutdown(interval, &mut shutdown).await {
                return;
            }
        }
    }

    async fn check_exit(&self, symbol: &Symbol) {
        let Some(mut trade) = self.active.lock().get(symbol).cloned() else { return };
        if trade.state != TradeState::Open {
            return;
        }
        let now_ms = Utc::now().timestamp_millis();

        let should_exit = match trade.mode {
            OpportunityMode::CherryPick => trade.exit_before_ms.is_some_and(|exit_before| now_ms >= exit_before),
            OpportunityMode::Hold => self.evaluate_hold_exit(&mut trade, now_ms).await,
        };

        if should_exit {
            self.close_trade(symbol).await;
            return;
        }

        self.persist(&trade).await;
        self.active.lock().insert(symbol.clone(), trade.clone());

        self.maybe_upgrade(symbol, &trade).await;
    }

    /// Advances the per-leg funding trackers and decides whether a `Hold` trade should keep
    /// riding the spread or exit (§4.4 "Exit monitor").
    async fn evaluate_hold_exit(&self, trade: &mut TradeRecord, now_ms: i64) -> bool {
        let (Ok(long_adapter), Ok(short_adapter)) = (self.adapter_for(trade.long_exchange), self.adapter_for(trade.short_exchange)) else {
            return false;
        };

        if trade.next_funding_long_ms <= now_ms {
            if let Some(entry) = long_adapter.get_cached_funding(&trade.symbol).await {
                trade.long_paid = true;
                trade.next_funding_long_ms = entry.next_funding_ms;
            }
        }
        if trade.next_funding_short_ms <= now_ms {
            if let Some(entry) = short_adapter.get_cached_funding(&trade.symbol).await {
                trade.short_paid = true;
                trade.next_funding_short_ms = entry.next_funding_ms;
            }
        }

        if trade.long_paid && trade.short_paid {
            let long_rate = long_adapter.get_cached_funding(&trade.symbol).await.map(|e| e.rate).unwrap_or(trade.long_rate_at_open);
            let short_rate = short_adapter.get_cached_funding(&trade.symbol).await.map(|e| e.rate).unwrap_or(trade.short_rate_at_open);

            if immediate_spread_pct(long_rate, short_rate) < self.params.hold_min_spread_pct {
                return true;
            }
            trade.long_paid = false;
            trade.short_paid = false;
        }

        let furthest_next_funding_ms = trade.next_funding_long_ms.max(trade.next_funding_short_ms);
        furthest_next_funding_ms - now_ms > self.params.hold_max_wait_seconds * 1_000
    }

    /// Swaps into a strictly better opportunity on a different symbol (§4.4 "Upgrade"), checked
    /// each exit-monitor tick while neither leg of the current trade has paid yet.
    async fn maybe_upgrade(&self, symbol: &Symbol, trade: &TradeRecord) {
        if trade.long_paid || trade.short_paid {
            return;
        }

        let now_ms = Utc::now().timestamp_millis();
        let offset_ms = self.params.entry_offset_seconds * 1_000;

        let candidates = self.latest_qualified.lock().clone();
        let better = candidates.into_iter().find(|candidate| {
            candidate.qualified
                && &candidate.symbol != symbol
                && candidate.next_funding_ms - now_ms <= offset_ms
                && candidate.immediate_spread_pct >= trade.entry_edge_pct + self.params.upgrade_spread_delta_pct
        });

        if let Some(candidate) = better {
            info!(from = %symbol, to = %candidate.symbol, "upgrading to a better opportunity");
            self.close_trade(symbol).await;
            self.upgrade_cooldowns
                .lock()
                .insert(symbol.clone(), Instant::now() + Duration::from_secs(self.params.upgrade_cooldown_seconds));
        }
    }

    fn in_upgrade_cooldown(&self, symbol: &Symbol) -> bool {
        let mut cooldowns = self.upgrade_cooldowns.lock();
        if let Some(until) = cooldowns.get(symbol) {
            if Instant::now() < *until {
                return true;
            }
            cooldowns.remove(symbol);
        }
        false
    }

    fn gate_checks(&self, opp: &Opportunity) -> Result<()> {
        {
            let active = self.active.lock();
            if active.contains_key(&opp.symbol) {
                return Err(StrategyError::SymbolAlreadyActive { symbol: opp.symbol.clone() });
            }
            if active.len() >= self.exec.concurrent_opportunities {
                return Err(StrategyError::ConcurrencyCapReached);
            }
        }
        if self.in_upgrade_cooldown(&opp.symbol) {
            return Err(StrategyError::Cooldown { symbol: opp.symbol.clone() });
        }
        Ok(())
    }

    /// Runs the full gate sequence (§4.4 `handle_opportunity`), each step short-circuiting. The
    /// distributed lock is released on every exit path, successful or not.
    pub async fn handle_opportunity(&self, opp: Opportunity) -> Result<()> {
        self.gate_checks(&opp)?;

        let lock_name = format!("trade:{}", opp.symbol);
        if !self.kv.acquire_lock(&lock_name, 10).await {
            return Err(StrategyError::LockContended { symbol: opp.symbol.clone() });
        }

        let result = self.open_trade(&opp).await;
        self.kv.release_lock(&lock_name).await;
        result
    }

    async fn open_trade(&self, opp: &Opportunity) -> Result<()> {
        let long_adapter = self.adapter_for(opp.long_exchange)?.clone();
        let short_adapter = self.adapter_for(opp.short_exchange)?.clone();

        let long_balance = long_adapter.get_balance().await?;
        let short_balance = short_adapter.get_balance().await?;

        let long_spec = long_adapter.get_instrument_spec(&opp.symbol).await?;
        let short_spec = short_adapter.get_instrument_spec(&opp.symbol).await?;
        let lot_step = harmonized_lot_step(&long_spec, &short_spec);

        let quantity = size_trade(
            long_balance.free,
            short_balance.free,
            self.leverage_for(opp.long_exchange),
            opp.reference_price,
            lot_step,
            &self.risk_limits,
        );
        if quantity.is_zero() || quantity < lot_step {
            return Err(StrategyError::InsufficientBalance { symbol: opp.symbol.clone() });
        }

        self.risk_guard.mark_trade_opened(opp.symbol.clone());

        let long_leverage = *self.leverage_by_exchange.get(&opp.long_exchange).unwrap_or(&1);
        long_adapter.ensure_trading_settings(&opp.symbol, long_leverage).await?;

        let long_request = OrderRequest::new(opp.long_exchange, opp.symbol.clone(), OrderSide::Buy, quantity, false);
        let long_fill = match place_with_timeout(long_adapter.as_ref(), long_request, self.exec.order_timeout_ms).await {
            Ok(fill) if fill.is_filled() => fill,
            Ok(_) => return Err(StrategyError::LongLegTimeout { symbol: opp.symbol.clone() }),
            Err(err) => {
                warn!(symbol = %opp.symbol, %err, "long leg failed to open");
                return Err(StrategyError::LongLegTimeout { symbol: opp.symbol.clone() });
            }
        };

        let short_leverage = *self.leverage_by_exchange.get(&opp.short_exchange).unwrap_or(&1);
        if let Err(err) = short_adapter.ensure_trading_settings(&opp.symbol, short_leverage).await {
            self.orphan_close(opp, &long_adapter, long_fill.filled_quantity).await;
            return Err(StrategyError::OrphanedLongLeg { symbol: opp.symbol.clone(), source: err });
        }

        let short_request = OrderRequest::new(opp.short_exchange, opp.symbol.clone(), OrderSide::Sell, quantity, false);
        let short_fill = match place_with_timeout(short_adapter.as_ref(), short_request, self.exec.order_timeout_ms).await {
            Ok(fill) if fill.is_filled() => fill,
            Ok(_) => {
                self.orphan_close(opp, &long_adapter, long_fill.filled_quantity).await;
                return Err(StrategyError::OrphanedLongLeg {
                    symbol: opp.symbol.clone(),
                    source: AdapterError::RejectedBySide("short leg filled zero quantity".to_string()),
                });
            }
            Err(err) => {
                self.orphan_close(opp, &long_adapter, long_fill.filled_quantity).await;
                return Err(StrategyError::OrphanedLongLeg { symbol: opp.symbol.clone(), source: err });
            }
        };

        let mut long_qty = long_fill.filled_quantity;
        let short_qty = short_fill.filled_quantity;

        let long_next_ms = long_adapter.get_cached_funding(&opp.symbol).await.map(|e| e.next_funding_ms).unwrap_or(opp.next_funding_ms);
        let short_next_ms = short_adapter.get_cached_funding(&opp.symbol).await.map(|e| e.next_funding_ms).unwrap_or(opp.next_funding_ms);

        if short_qty < long_qty {
            let diff = long_qty - short_qty;
            let trim_request = OrderRequest::new(opp.long_exchange, opp.symbol.clone(), OrderSide::Sell, diff, true);
            match long_adapter.place_order(trim_request).await {
                Ok(trim_fill) => long_qty -= trim_fill.filled_quantity,
                Err(source) => {
                    // Both legs are genuinely open on the exchanges; only the corrective trim
                    // failed. Record the trade in ERROR rather than dropping it, so it stays
                    // visible to recover() and an operator rather than becoming a ghost position.
                    let mut trade = TradeRecord::open(
                        opp.symbol.clone(),
                        opp.long_exchange,
                        opp.short_exchange,
                        long_qty,
                        short_qty,
                        opp.net_edge_pct,
                        opp.long_rate,
                        opp.short_rate,
                        opp.mode,
                        opp.exit_before_ms,
                        long_next_ms,
                        short_next_ms,
                        Utc::now(),
                    );
                    trade.transition_to_error();
                    self.persist(&trade).await;
                    self.active.lock().insert(opp.symbol.clone(), trade);
                    self.kv.set_cooldown(opp.symbol.as_str(), self.params.cooldown_after_orphan_hours * 3_600).await;
                    error!(symbol = %opp.symbol, %long_qty, %short_qty, %source, "delta-correction trim failed; trade recorded in ERROR for operator review");
                    return Err(StrategyError::TrimFailed { symbol: opp.symbol.clone(), source });
                }
            }
        }

        let trade = TradeRecord::open(
            opp.symbol.clone(),
            opp.long_exchange,
            opp.short_exchange,
            long_qty,
            short_qty,
            opp.net_edge_pct,
            opp.long_rate,
            opp.short_rate,
            opp.mode,
            opp.exit_before_ms,
            long_next_ms,
            short_next_ms,
            Utc::now(),
        );

        self.persist(&trade).await;
        info!(symbol = %opp.symbol, trade_id = %trade.trade_id, %long_qty, %short_qty, mode = ?opp.mode, "trade opened");
        self.active.lock().insert(opp.symbol.clone(), trade);
        Ok(())
    }

    /// An orphan is a filled long leg whose short sibling failed to open; the filled side must
    /// be closed immediately with a reduce-only order sized to the reported fill quantity. A
    /// zero fill does not count as an orphan (§4.4 "Orphan close").
    async fn orphan_close(&self, opp: &Opportunity, long_adapter: &Arc<dyn ExchangeAdapter>, filled_quantity: Decimal) {
        if filled_quantity.is_zero() {
            return;
        }
        let request = OrderRequest::new(opp.long_exchange, opp.symbol.clone(), OrderSide::Sell, filled_quantity, true);
        match long_adapter.place_order(request).await {
            Ok(fill) => info!(symbol = %opp.symbol, filled = %fill.filled_quantity, "orphan leg closed"),
            Err(err) => error!(symbol = %opp.symbol, %err, "orphan close failed; position may remain open, escalate to operator"),
        }
        self.kv.set_cooldown(opp.symbol.as_str(), self.params.cooldown_after_orphan_hours * 3_600).await;
    }

    /// Closes both legs of `symbol`'s trade reduce-only with up to 3 retries per leg (§4.4
    /// "Close trade"). A partial failure drops the record into `ERROR` and sets a cooldown
    /// rather than silently dropping the position from view.
    async fn close_trade(&self, symbol: &Symbol) {
        let Some(mut trade) = self.active.lock().get(symbol).cloned() else { return };

        if trade.state == TradeState::Open {
            if let Err(err) = trade.transition_to_closing() {
                error!(%symbol, %err, "cannot begin closing trade");
                return;
            }
            self.persist(&trade).await;
        }

        let long_ok = self.close_leg(trade.long_exchange, symbol, trade.long_qty, OrderSide::Sell).await;
        let short_ok = self.close_leg(trade.short_exchange, symbol, trade.short_qty, OrderSide::Buy).await;

        if long_ok && short_ok {
            let _ = trade.transition_to_closed(Utc::now());
            self.kv.delete_trade_state(&trade.trade_id).await;
            self.active.lock().remove(symbol);
            info!(%symbol, trade_id = %trade.trade_id, "trade closed");
        } else {
            trade.transition_to_error();
            self.persist(&trade).await;
            self.kv.set_cooldown(symbol.as_str(), self.params.cooldown_after_orphan_hours * 3_600).await;
            self.active.lock().insert(symbol.clone(), trade.clone());
            error!(%symbol, long_ok, short_ok, "partial close failure; trade requires operator review");
        }
    }

    async fn close_leg(&self, exchange: ExchangeId, symbol: &Symbol, quantity: Decimal, side: OrderSide) -> bool {
        if quantity.is_zero() {
            return true;
        }
        let Ok(adapter) = self.adapter_for(exchange) else { return false };

        for attempt in 1..=CLOSE_LEG_MAX_ATTEMPTS {
            let request = OrderRequest::new(exchange, symbol.clone(), side, quantity, true);
            match adapter.place_order(request).await {
                Ok(fill) if fill.is_filled() => return true,
                Ok(_) => warn!(%exchange, %symbol, attempt, "close leg filled zero quantity"),
                Err(err) => warn!(%exchange, %symbol, attempt, %err, "close leg failed"),
            }
            if attempt < CLOSE_LEG_MAX_ATTEMPTS {
                tokio::time::sleep(CLOSE_LEG_RETRY_DELAY).await;
            }
        }
        false
    }

    async fn persist(&self, trade: &TradeRecord) {
        match trade.to_json() {
            Ok(json) => self.kv.set_trade_state(&trade.trade_id, &json).await,
            Err(err) => error!(trade_id = %trade.trade_id, %err, "failed to serialize trade record"),
        }
    }

    /// Called on controller shutdown; optionally closes every still-open trade before returning.
    pub async fn stop(&self, close_all_on_stop: bool) {
        if !close_all_on_stop {
            return;
        }
        let symbols: Vec<Symbol> = self.active.lock().keys().cloned().collect();
        for symbol in symbols {
            self.close_trade(&symbol).await;
        }
    }
}

async fn place_with_timeout(adapter: &dyn ExchangeAdapter, request: OrderRequest, timeout_ms: u64) -> std::result::Result<trinity_execution::FillResult, AdapterError> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), adapter.place_order(request)).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(timeout_ms)),
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
    use super::*;
    use rust_decimal_macros::dec;
    use trinity_execution::client::mock::MockAdapter;
    use trinity_execution::{balance::Balance, funding::FundingCacheEntry};
    use trinity_instrument::InstrumentSpec;
    use trinity_integration::MemoryStore;
    use trinity_risk::RiskGuardConfig;

    fn spec() -> InstrumentSpec {
        InstrumentSpec::new(dec!(1), dec!(0.1), dec!(0.001), dec!(5), dec!(0.0002), dec!(0.0005))
    }

    fn sample_opportunity(symbol: &str) -> Opportunity {
        Opportunity {
            symbol: Symbol::from(symbol),
            long_exchange: ExchangeId::Binance,
            short_exchange: ExchangeId::Bybit,
            long_rate: dec!(0.0001),
            short_rate: dec!(0.0080),
            immediate_spread_pct: dec!(0.79),
            funding_spread_pct: dec!(0.79),
            immediate_net_pct: dec!(0.5),
            gross_edge_pct: dec!(0.79),
            fees_pct: dec!(0.25),
            net_edge_pct: dec!(0.5),
            suggested_qty: dec!(0.01),
            reference_price: dec!(50_000),
            min_interval_hours: 1,
            hourly_rate_pct: dec!(0.5),
            next_funding_ms: 300_000,
            mode: OpportunityMode::Hold,
            exit_before_ms: None,
            n_collections: 0,
            qualified: true,
        }
    }

    fn controller_with(adapters: AdapterMap) -> Controller {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let risk_guard = Arc::new(RiskGuard::new(HashMap::new(), kv.clone(), RiskLimits::default(), RiskGuardConfig::default()));
        Controller::new(
            adapters,
            kv,
            risk_guard,
            TradingParams::default(),
            ExecutionConfig::default(),
            RiskLimits::default(),
            HashMap::new(),
        )
    }

    fn funded_adapter(exchange: ExchangeId, symbol: &Symbol) -> Arc<MockAdapter> {
        let adapter = Arc::new(MockAdapter::new(exchange, spec()));
        adapter.set_balance(Balance { free: dec!(10_000), total: dec!(10_000) });
        adapter.set_ticker(symbol.clone(), dec!(50_000));
        adapter.set_funding(symbol.clone(), FundingCacheEntry { rate: dec!(0.0001), next_funding_ms: 300_000, interval_hours: 8 });
        adapter
    }

    #[tokio::test]
    async fn handle_opportunity_opens_a_balanced_trade() {
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let controller = controller_with(adapters);
        controller.handle_opportunity(sample_opportunity("BTC-USDT")).await.unwrap();

        assert_eq!(controller.active_trade_count(), 1);
        let trade = controller.active.lock().get(&symbol).cloned().unwrap();
        assert_eq!(trade.state, TradeState::Open);
        assert_eq!(trade.long_qty, trade.short_qty);
    }

    #[tokio::test]
    async fn handle_opportunity_rejects_duplicate_symbol() {
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let controller = controller_with(adapters);
        controller.handle_opportunity(sample_opportunity("BTC-USDT")).await.unwrap();

        let err = controller.handle_opportunity(sample_opportunity("BTC-USDT")).await.unwrap_err();
        assert!(matches!(err, StrategyError::SymbolAlreadyActive { .. }));
    }

    #[tokio::test]
    async fn short_leg_failure_orphan_closes_the_long_leg_and_sets_cooldown() {
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);
        bybit.fail_next_order();

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let kv = Arc::new(MemoryStore::new());
        let risk_guard = Arc::new(RiskGuard::new(HashMap::new(), kv.clone(), RiskLimits::default(), RiskGuardConfig::default()));
        let controller = Controller::new(
            adapters,
            kv.clone(),
            risk_guard,
            TradingParams::default(),
            ExecutionConfig::default(),
            RiskLimits::default(),
            HashMap::new(),
        );

        let err = controller.handle_opportunity(sample_opportunity("BTC-USDT")).await.unwrap_err();
        assert!(matches!(err, StrategyError::OrphanedLongLeg { .. }));
        assert_eq!(controller.active_trade_count(), 0);
        assert!(kv.is_cooled_down(symbol.as_str()).await);
    }

    #[tokio::test]
    async fn both_legs_open_with_the_same_harmonized_quantity() {
        // Both mocks fill in full here, so the trim path is never entered; this verifies the
        // quantity computed at open time is applied identically to both legs (the invariant the
        // trim path exists to restore when fills diverge; see the tests below for that path).
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let controller = controller_with(adapters);
        let mut opp = sample_opportunity("BTC-USDT");
        opp.reference_price = dec!(50_000);
        controller.handle_opportunity(opp).await.unwrap();

        let trade = controller.active.lock().get(&symbol).cloned().unwrap();
        assert_eq!(trade.long_qty, trade.short_qty);
        assert!(trade.qty_delta().is_zero());
    }

    #[tokio::test]
    async fn short_leg_partial_fill_trims_long_leg_down_to_match() {
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);
        bybit.set_partial_fill(dec!(0.007));

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let controller = controller_with(adapters);
        controller.handle_opportunity(sample_opportunity("BTC-USDT")).await.unwrap();

        let trade = controller.active.lock().get(&symbol).cloned().unwrap();
        assert_eq!(trade.state, TradeState::Open);
        assert_eq!(trade.short_qty, dec!(0.007));
        assert_eq!(trade.long_qty, dec!(0.007));
        assert!(trade.qty_delta().is_zero());
    }

    #[tokio::test]
    async fn failed_trim_records_an_error_trade_instead_of_dropping_the_position() {
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);
        bybit.set_partial_fill(dec!(0.007));
        binance.fail_reduce_only_orders();

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let kv = Arc::new(MemoryStore::new());
        let risk_guard = Arc::new(RiskGuard::new(HashMap::new(), kv.clone(), RiskLimits::default(), RiskGuardConfig::default()));
        let controller = Controller::new(
            adapters,
            kv.clone(),
            risk_guard,
            TradingParams::default(),
            ExecutionConfig::default(),
            RiskLimits::default(),
            HashMap::new(),
        );

        let err = controller.handle_opportunity(sample_opportunity("BTC-USDT")).await.unwrap_err();
        assert!(matches!(err, StrategyError::TrimFailed { .. }));

        // Both legs are genuinely open on the exchanges; the trade must stay visible rather
        // than vanish, so an operator (and recover() on restart) can see it.
        assert_eq!(controller.active_trade_count(), 1);
        let trade = controller.active.lock().get(&symbol).cloned().unwrap();
        assert_eq!(trade.state, TradeState::Error);
        assert_eq!(trade.long_qty, dec!(0.1));
        assert_eq!(trade.short_qty, dec!(0.007));

        let persisted = kv.get_trade_state(&trade.trade_id).await.unwrap();
        let reloaded = TradeRecord::from_json(&persisted).unwrap();
        assert_eq!(reloaded.state, TradeState::Error);

        assert!(kv.is_cooled_down(symbol.as_str()).await);
    }

    #[tokio::test]
    async fn cherry_pick_trade_closes_once_past_exit_before() {
        let symbol = Symbol::from("BTC-USDT");
        let binance = funded_adapter(ExchangeId::Binance, &symbol);
        let bybit = funded_adapter(ExchangeId::Bybit, &symbol);

        let mut adapters: AdapterMap = HashMap::new();
        adapters.insert(ExchangeId::Binance, binance);
        adapters.insert(ExchangeId::Bybit, bybit);

        let controller = controller_with(adapters);
        let mut opp = sample_opportunity("BTC-USDT");
        opp.mode = OpportunityMode::CherryPick;
        opp.exit_before_ms = Some(0);
        controller.handle_opportunity(opp).await.unwrap();
        assert_eq!(controller.active_trade_count(), 1);

        controller.check_exit(&symbol).await;
        assert_eq!(controller.active_trade_count(), 0);
    }

    #[tokio::test]
    async fn recover_resumes_open_trades_from_kv() {
        let symbol = Symbol::from("BTC-USDT");
        let kv = Arc::new(MemoryStore::new());
        let trade = TradeRecord::open(
            symbol.clone(),
            ExchangeId::Binance,
            ExchangeId::Bybit,
            dec!(0.01),
            dec!(0.01),
            dec!(0.5),
            dec!(0.0001),
            dec!(0.005),
            OpportunityMode::Hold,
            None,
            1_000,
            2_000,
            Utc::now(),
        );
        kv.set_trade_state(&trade.trade_id, &trade.to_json().unwrap()).await;

        let risk_guard = Arc::new(RiskGuard::new(HashMap::new(), kv.clone(), RiskLimits::default(), RiskGuardConfig::default()));
        let controller = Controller::new(
            HashMap::new(),
            kv,
            risk_guard,
            TradingParams::default(),
            ExecutionConfig::default(),
            RiskLimits::default(),
            HashMap::new(),
        );

        controller.recover().await;
        assert_eq!(controller.active_trade_count(), 1);
    }
}
