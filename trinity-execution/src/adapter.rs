use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::watch;
use trinity_instrument::{InstrumentSpec, OrderRequest, Position, Symbol};

use crate::{balance::Balance, error::AdapterError, funding::FundingCacheEntry, order::FillResult};

/// Signal broadcast to every background task (funding watchers, in particular) telling them to
/// stop. Cloned cheaply; a task exits its loop once the contained value flips to `true`.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Uniform interface over one perpetual-swap venue.
///
/// Every method normalises away venue quirks (contract-size conversion, margin-mode setup
/// order, position-side parameter naming) so the discovery scanner, execution controller and
/// risk guard never special-case an exchange by name.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Load markets, filter to active USDT-settled linear perpetuals, and apply any
    /// connection-time settings (recv window, clock-skew adjustment). Idempotent.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Apply margin-mode, position-mode and leverage for `symbol`, in that order (margin mode
    /// must be set before leverage on venues like OKX that reject a leverage change under the
    /// wrong margin mode). Position mode (one-way vs hedged) is account-wide rather than
    /// per-symbol on every supported venue, but is reapplied here too since it must be in place
    /// before the first order on a symbol. Idempotent per symbol: safe to call on every trade
    /// open.
    async fn ensure_trading_settings(&self, symbol: &Symbol, leverage: u32) -> Result<(), AdapterError>;

    async fn get_instrument_spec(&self, symbol: &Symbol) -> Result<InstrumentSpec, AdapterError>;

    async fn get_balance(&self) -> Result<Balance, AdapterError>;

    /// Last traded / mark price, used as the reference price for position sizing.
    async fn get_ticker(&self, symbol: &Symbol) -> Result<Decimal, AdapterError>;

    /// All open positions, converted to base-asset quantity. `None` means "all symbols".
    async fn get_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>, AdapterError>;

    /// One-shot REST fetch of the current funding rate, bypassing the cache. Used to warm up
    /// the cache and as a fallback when a venue doesn't support batch funding queries.
    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingCacheEntry, AdapterError>;

    /// Cached funding rate as last observed by the background watcher. `None` until the watcher
    /// has completed at least one successful poll for `symbol`.
    async fn get_cached_funding(&self, symbol: &Symbol) -> Option<FundingCacheEntry>;

    /// Populate the funding cache for `symbols` before the scanner starts trusting it, preferring
    /// one batch request and falling back to bounded-parallel per-symbol requests.
    async fn warm_up_funding(&self, symbols: &[Symbol]);

    /// Spawn the long-lived background task(s) that keep the funding cache fresh. Returns
    /// immediately; the watcher runs until `shutdown` fires.
    fn start_funding_watchers(&self, symbols: Vec<Symbol>, shutdown: ShutdownSignal);

    /// Whether this venue exposes a single batch funding-rate endpoint across all symbols
    /// (cheaper) rather than requiring one request per symbol.
    fn supports_batch_funding(&self) -> bool;

    async fn place_order(&self, request: OrderRequest) -> Result<FillResult, AdapterError>;
}
