use thiserror::Error;

/// Failure modes the risk guard surfaces to its caller. Every variant is handled by skipping
/// work for the current tick rather than propagating a panic: a stuck risk loop is worse than
/// a loop that silently tries again in 5 seconds.
#[derive(Debug, Error)]
pub enum RiskError {
    /// At least one adapter's position query failed; the tick's delta snapshot is incomplete
    /// and must not be reasoned about. See §4.7: never infer delta from a partial snapshot.
    #[error("position snapshot incomplete for {exchange}: {source}")]
    MissingSnapshot {
        exchange: trinity_instrument::ExchangeId,
        source: trinity_execution::AdapterError,
    },
}
