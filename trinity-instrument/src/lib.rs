#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations
)]

//! # Trinity-Instrument
//! Venue, symbol and instrument-spec data structures shared by every other `trinity-*` crate.
//! Deliberately small: a funding-rate arbitrage engine needs to identify an instrument across a
//! handful of venues, not model every asset class barter-rs supports.

pub mod exchange;
pub mod position;
pub mod settings;
pub mod spec;
pub mod symbol;

pub use exchange::ExchangeId;
pub use position::{OrderRequest, OrderSide, Position};
pub use settings::{MarginMode, PositionMode};
pub use spec::InstrumentSpec;
pub use symbol::Symbol;
