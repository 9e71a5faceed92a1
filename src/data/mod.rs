//! Market data: price and rate containers, providers and CSV storage.

pub mod fred;
pub mod series;
pub mod storage;
pub mod yahoo;

pub use fred::FredClient;
pub use series::{PriceTable, RateSeries};
pub use yahoo::YahooClient;
