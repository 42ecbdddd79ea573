pub mod binance;
pub mod bybit;
pub mod mock;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use mock::MockAdapter;
