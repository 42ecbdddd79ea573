#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations
)]

//! # Trinity-Engine
//! Wires the discovery scanner, execution controller and risk guard (`trinity-strategy` and
//! `trinity-risk`) against a set of `trinity-execution` adapters and a `trinity-integration` KV
//! store into the long-lived task set that makes up one running instance of the funding-rate
//! arbitrage engine. Adapter construction, configuration file loading, and log formatting are
//! left to the embedding process; this crate depends on them only through their typed
//! interfaces.

pub mod config;
pub mod engine;
pub mod logging;

pub use config::Config;
pub use engine::{ctrl_c_shutdown_signal, Engine};
pub use logging::{init_json_logging, init_logging};
