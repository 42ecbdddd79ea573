use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::watch;
use trinity_instrument::{ExchangeId, InstrumentSpec, OrderRequest, Position, Symbol};

use crate::{
    adapter::{ExchangeAdapter, ShutdownSignal},
    balance::Balance,
    error::AdapterError,
    funding::FundingCacheEntry,
    order::FillResult,
};

/// Fully in-memory [`ExchangeAdapter`] for unit and integration tests. Never touches the
/// network; every response is whatever was configured via the `with_*`/`set_*` setters.
#[derive(Debug)]
pub struct MockAdapter {
    pub exchange: ExchangeId,
    spec: InstrumentSpec,
    balance: Mutex<Balance>,
    tickers: Mutex<HashMap<Symbol, Decimal>>,
    positions: Mutex<Vec<Position>>,
    funding: Mutex<HashMap<Symbol, FundingCacheEntry>>,
    batch_funding: bool,
    fail_next_order: Mutex<bool>,
    fail_positions: Mutex<bool>,
    partial_fill_qty: Mutex<Option<Decimal>>,
    fail_reduce_only_orders: Mutex<bool>,
}

impl MockAdapter {
    pub fn new(exchange: ExchangeId, spec: InstrumentSpec) -> Self {
        Self {
            exchange,
            spec,
            balance: Mutex::new(Balance::default()),
            tickers: Mutex::new(HashMap::new()),
            positions: Mutex::new(Vec::new()),
            funding: Mutex::new(HashMap::new()),
            batch_funding: true,
            fail_next_order: Mutex::new(false),
            fail_positions: Mutex::new(false),
            partial_fill_qty: Mutex::new(None),
            fail_reduce_only_orders: Mutex::new(false),
        }
    }

    pub fn set_balance(&self, balance: Balance) {
        *self.balance.lock() = balance;
    }

    pub fn set_ticker(&self, symbol: Symbol, price: Decimal) {
        self.tickers.lock().insert(symbol, price);
    }

    pub fn set_funding(&self, symbol: Symbol, entry: FundingCacheEntry) {
        self.funding.lock().insert(symbol, entry);
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock() = positions;
    }

    pub fn fail_next_order(&self) {
        *self.fail_next_order.lock() = true;
    }

    /// Makes every subsequent `get_positions` call return a `TransientError`, simulating a
    /// venue outage so callers can exercise the "abort on incomplete snapshot" path.
    pub fn fail_positions(&self) {
        *self.fail_positions.lock() = true;
    }

    /// Makes the next `place_order` fill only `quantity` instead of the full requested amount,
    /// simulating a venue that fills less than asked. Consumed after one call, like
    /// `fail_next_order`.
    pub fn set_partial_fill(&self, quantity: Decimal) {
        *self.partial_fill_qty.lock() = Some(quantity);
    }

    /// Makes every subsequent `reduce_only` order rejected, simulating a venue that fails a
    /// trim or close while leaving the rest of `place_order` untouched (so the leg-opening
    /// order that precedes a trim still fills normally).
    pub fn fail_reduce_only_orders(&self) {
        *self.fail_reduce_only_orders.lock() = true;
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn ensure_trading_settings(&self, _symbol: &Symbol, _leverage: u32) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn get_instrument_spec(&self, _symbol: &Symbol) -> Result<InstrumentSpec, AdapterError> {
        Ok(self.spec)
    }

    async fn get_balance(&self) -> Result<Balance, AdapterError> {
        Ok(*self.balance.lock())
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        self.tickers
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| AdapterError::TransientError(format!("no ticker configured for {symbol}")))
    }

    async fn get_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>, AdapterError> {
        if *self.fail_positions.lock() {
            return Err(AdapterError::TransientError(format!("{} position fetch unavailable", self.exchange)));
        }
        let positions = self.positions.lock();
        Ok(match symbol {
            Some(symbol) => positions.iter().filter(|p| &p.symbol == symbol).cloned().collect(),
            None => positions.clone(),
        })
    }

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingCacheEntry, AdapterError> {
        self.funding
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| AdapterError::TransientError(format!("no funding rate configured for {symbol}")))
    }

    async fn get_cached_funding(&self, symbol: &Symbol) -> Option<FundingCacheEntry> {
        self.funding.lock().get(symbol).copied()
    }

    async fn warm_up_funding(&self, _symbols: &[Symbol]) {}

    fn start_funding_watchers(&self, _symbols: Vec<Symbol>, _shutdown: ShutdownSignal) {}

    fn supports_batch_funding(&self) -> bool {
        self.batch_funding
    }

    async fn place_order(&self, request: OrderRequest) -> Result<FillResult, AdapterError> {
        if std::mem::take(&mut *self.fail_next_order.lock()) {
            return Err(AdapterError::RejectedBySide("mock rejection".to_string()));
        }
        if request.reduce_only && *self.fail_reduce_only_orders.lock() {
            return Err(AdapterError::RejectedBySide("mock reduce-only rejection".to_string()));
        }

        let price = self.get_ticker(&request.symbol).await.unwrap_or(Decimal::ONE);
        let filled_quantity = match std::mem::take(&mut *self.partial_fill_qty.lock()) {
            Some(partial) => partial,
            None => request.quantity,
        };
        Ok(FillResult { filled_quantity, average_price: price })
    }
}
