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

//! # Trinity-Execution
//! Uniform [`ExchangeAdapter`] contract over perpetual-swap venues, plus concrete REST clients
//! (Binance USDT-M futures, Bybit v5 linear) and a fully in-memory [`client::MockAdapter`] for
//! tests. Every adapter normalises contract-size conversion, lot rounding and venue-specific
//! margin/leverage setup so the strategy and execution crates never special-case a venue.

pub mod adapter;
pub mod balance;
pub mod client;
pub mod error;
pub mod funding;
pub mod order;
pub mod signer;
pub mod watcher;

pub use adapter::{ExchangeAdapter, ShutdownSignal};
pub use balance::Balance;
pub use error::AdapterError;
pub use funding::FundingCacheEntry;
pub use order::FillResult;
pub use signer::ApiCredentials;
