//! CoinGecko `/coins/markets` price feed

use crate::error::FeedError;
use crate::models::PriceSample;
use crate::services::market_data::PriceFeed;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
}

pub struct CoinGeckoFeed {
    client: reqwest::Client,
    base_url: String,
    vs_currency: String,
}

impl CoinGeckoFeed {
    pub fn new(base_url: impl Into<String>, vs_currency: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            vs_currency: vs_currency.into(),
        })
    }

    fn markets_url(&self) -> String {
        format!("{}/api/v3/coins/markets", self.base_url)
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn fetch_price_samples(&self, assets: &[String]) -> Result<Vec<PriceSample>, FeedError> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let ids = assets.join(",");
        let per_page = assets.len().to_string();
        let response = self
            .client
            .get(self.markets_url())
            .query(&[
                ("vs_currency", self.vs_currency.as_str()),
                ("ids", ids.as_str()),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
                ("sparkline", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let entries: Vec<MarketEntry> =
            serde_json::from_str(&body).map_err(|e| FeedError::Decode(e.to_string()))?;

        let observed_at = Utc::now();
        let samples: Vec<PriceSample> = entries
            .into_iter()
            .filter(|entry| assets.iter().any(|a| a == &entry.id))
            .filter_map(|entry| {
                let price = entry.current_price?;
                let mut sample = PriceSample::new(entry.id, observed_at, price);
                sample.volume = entry.total_volume;
                sample.market_cap = entry.market_cap;
                Some(sample)
            })
            .collect();

        debug!(requested = assets.len(), received = samples.len(), "Fetched CoinGecko markets");
        Ok(samples)
    }
}
