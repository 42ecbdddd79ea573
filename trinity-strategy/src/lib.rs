#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations
)]
#![allow(clippy::too_many_arguments)]

//! # Trinity-Strategy
//! The funding-rate arbitrage strategy: a pure [`calculator`], the [`scanner::Scanner`]
//! discovery loop that turns per-adapter funding caches into ranked [`opportunity::Opportunity`]
//! values, and the [`controller::Controller`] that opens, monitors, upgrades and closes the
//! resulting delta-neutral [`trade::TradeRecord`]s against the KV store and risk guard.

pub mod calculator;
pub mod config;
pub mod controller;
pub mod error;
pub mod opportunity;
pub mod scanner;
pub mod sizing;
pub mod trade;

pub use config::{ExecutionConfig, TradingParams};
pub use controller::Controller;
pub use error::{Result, StrategyError};
pub use opportunity::{Opportunity, OpportunityMode};
pub use scanner::{AdapterMap, ScanResult, Scanner};
pub use trade::{TradeRecord, TradeState};
