pub mod driver;
pub mod signing;

pub use driver::BinanceFuturesDriver;
