//! Process-level logging setup for binaries embedding [`crate::engine::Engine`]. The engine
//! itself only calls into `tracing`; something has to install a subscriber once at startup, and
//! that's an ambient concern of the process, not of any single engine loop.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a human-readable subscriber honoring `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Installs a JSON subscriber honoring `RUST_LOG`, for deployments that ship logs to an
/// aggregator rather than a terminal.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init()
}
