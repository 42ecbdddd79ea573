use thiserror::Error;
use trinity_instrument::Symbol;

pub type Result<T> = std::result::Result<T, StrategyError>;

/// Errors surfaced by the discovery scanner and execution controller. Every variant here maps
/// to a policy in §7: most are handled by aborting the current opportunity or trade rather than
/// propagating out of the owning loop.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("{symbol} already has an active trade")]
    SymbolAlreadyActive { symbol: Symbol },

    #[error("concurrent trade cap reached")]
    ConcurrencyCapReached,

    #[error("{symbol} is cooling down")]
    Cooldown { symbol: Symbol },

    #[error("could not acquire trade lock for {symbol}")]
    LockContended { symbol: Symbol },

    #[error("insufficient free balance to size {symbol}")]
    InsufficientBalance { symbol: Symbol },

    #[error("adapter error: {0}")]
    Adapter(#[from] trinity_execution::AdapterError),

    #[error("long leg timed out placing order for {symbol}")]
    LongLegTimeout { symbol: Symbol },

    #[error("short leg failed after long leg filled for {symbol}: {source}")]
    OrphanedLongLeg { symbol: Symbol, source: trinity_execution::AdapterError },

    #[error("delta correction trim failed for {symbol}: {source}")]
    TrimFailed { symbol: Symbol, source: trinity_execution::AdapterError },

    #[error("partial close failure for {symbol}: {long_ok} long / {short_ok} short")]
    PartialCloseFailure { symbol: Symbol, long_ok: bool, short_ok: bool },

    #[error("invalid state transition for trade {trade_id}: {from} -> {to}")]
    InvalidTransition { trade_id: String, from: &'static str, to: &'static str },

    #[error("failed to serialize trade record: {0}")]
    Serialization(#[from] serde_json::Error),
}
