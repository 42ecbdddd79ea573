use thiserror::Error;

/// Errors an [`crate::adapter::ExchangeAdapter`] can return. Deliberately flat (no generic
/// asset/instrument keys, unlike the wider barter execution stack): this engine only ever talks
/// to a handful of hardcoded perpetual-swap venues, so the extra generality isn't worth carrying.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("transient error, safe to retry: {0}")]
    TransientError(String),

    #[error("venue does not support this operation: {0}")]
    IncompatibleVenue(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("order rejected by venue: {0}")]
    RejectedBySide(String),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl AdapterError {
    /// Whether the funding-watcher loop should treat this as a transient blip (keep backing off
    /// and retrying) rather than something that warrants dropping the venue entirely.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::TransientError(_) | AdapterError::Timeout(_) | AdapterError::NetworkError(_)
        )
    }
}
