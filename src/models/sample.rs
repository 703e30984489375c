use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw price observation from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub asset: String,
    pub observed_at: DateTime<Utc>,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
}

impl PriceSample {
    pub fn new(asset: impl Into<String>, observed_at: DateTime<Utc>, price: f64) -> Self {
        Self {
            asset: asset.into(),
            observed_at,
            price,
            volume: None,
            market_cap: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = Some(market_cap);
        self
    }
}
