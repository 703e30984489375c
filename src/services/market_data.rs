//! Price feed interface consumed by the snapshot collector.

use crate::error::FeedError;
use crate::models::PriceSample;
use async_trait::async_trait;

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current price samples for the given assets. Assets the feed does not know are omitted.
    async fn fetch_price_samples(&self, assets: &[String]) -> Result<Vec<PriceSample>, FeedError>;
}
