#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations
)]

//! # Trinity-Risk
//! The delta-neutrality risk guard: a fast loop (default 5 s) that sums signed position
//! quantity per symbol across every exchange adapter and panic-closes any symbol that drifts
//! past [`config::RiskLimits::delta_threshold_pct`], plus a deep loop (default 60 s) that
//! persists position snapshots for out-of-core observability. Reads adapters directly and
//! never touches trade bookkeeping — that belongs to `trinity-strategy`'s execution controller.

pub mod config;
pub mod delta;
pub mod error;
pub mod guard;

pub use config::{RiskGuardConfig, RiskLimits};
pub use delta::{DeltaBreach, DeltaTracker};
pub use error::RiskError;
pub use guard::{RiskGuard, ShutdownSignal};
