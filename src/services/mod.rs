//! External collaborators: the price feed and the snapshot collector

pub mod coingecko;
pub mod market_data;
pub mod snapshot;

pub use coingecko::CoinGeckoFeed;
pub use market_data::PriceFeed;
pub use snapshot::{SnapshotCollector, SnapshotConfig};
