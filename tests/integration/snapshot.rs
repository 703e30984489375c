//! Integration tests for the CoinGecko feed and the snapshot collector
//!
//! CoinGecko is mocked with wiremock.

use candlekeep::db::{MemoryStore, SampleStore};
use candlekeep::error::FeedError;
use candlekeep::metrics::Metrics;
use candlekeep::services::coingecko::CoinGeckoFeed;
use candlekeep::services::market_data::PriceFeed;
use candlekeep::services::snapshot::{SnapshotCollector, SnapshotConfig};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MARKETS_PATH: &str = "/api/v3/coins/markets";

fn markets_body() -> serde_json::Value {
    json!([
        {"id": "bitcoin", "current_price": 43000.5, "market_cap": 8.4e11, "total_volume": 2.1e10},
        {"id": "ethereum", "current_price": 2300.25, "market_cap": 2.7e11, "total_volume": null},
        {"id": "dogecoin", "current_price": null, "market_cap": null, "total_volume": null},
        {"id": "solana", "current_price": 98.0, "market_cap": null, "total_volume": null}
    ])
}

fn assets() -> Vec<String> {
    vec!["bitcoin".to_string(), "ethereum".to_string(), "dogecoin".to_string()]
}

fn config(dir: &TempDir) -> SnapshotConfig {
    let mut config = SnapshotConfig::new(assets(), dir.path().join("snapshot.lock"));
    config.backoff_base = Duration::from_millis(1);
    config.backoff_max = Duration::from_millis(5);
    config.max_retries = 2;
    config
}

async fn collector(server: &MockServer, dir: &TempDir) -> (Arc<MemoryStore>, SnapshotCollector) {
    let feed = Arc::new(CoinGeckoFeed::new(server.uri(), "usd").unwrap());
    let store = Arc::new(MemoryStore::new());
    let collector = SnapshotCollector::new(feed, store.clone(), config(dir));
    (store, collector)
}

#[tokio::test]
async fn feed_parses_markets_and_drops_unpriced_or_unrequested() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .and(query_param("vs_currency", "usd"))
        .and(query_param("ids", "bitcoin,ethereum,dogecoin"))
        .and(query_param("sparkline", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(markets_body()))
        .expect(1)
        .mount(&server)
        .await;

    let feed = CoinGeckoFeed::new(format!("{}/", server.uri()), "usd").unwrap();
    let samples = feed.fetch_price_samples(&assets()).await.unwrap();

    let ids: Vec<_> = samples.iter().map(|s| s.asset.as_str()).collect();
    assert_eq!(ids, vec!["bitcoin", "ethereum"]);
    assert_eq!(samples[0].price, 43000.5);
    assert_eq!(samples[0].volume, Some(2.1e10));
    assert_eq!(samples[1].volume, None);
}

#[tokio::test]
async fn feed_maps_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let feed = CoinGeckoFeed::new(server.uri(), "usd").unwrap();
    let err = feed.fetch_price_samples(&assets()).await.unwrap_err();
    assert!(matches!(err, FeedError::Status(429)));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(markets_body()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (_, collector) = collector(&server, &dir).await;
    let samples = collector.fetch_with_retries().await.unwrap();
    assert_eq!(samples.len(), 2);
}

#[tokio::test]
async fn exhausted_retries_are_counted_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let (store, collector) = collector(&server, &dir).await;
    let collector = collector.with_metrics(metrics.clone());

    assert_eq!(collector.collect_once().await, 0);
    assert_eq!(metrics.snapshot_fetch_failures_total.get(), 1);
    assert_eq!(store.sample_count().await, 0);
}

#[tokio::test]
async fn decode_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (_, collector) = collector(&server, &dir).await;
    let err = collector.fetch_with_retries().await.unwrap_err();
    assert!(matches!(err, FeedError::Decode(_)));
}

#[tokio::test]
async fn recent_samples_suppress_writes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(markets_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let (store, collector) = collector(&server, &dir).await;
    let collector = collector.with_metrics(metrics.clone());

    assert_eq!(collector.collect_once().await, 2);
    assert_eq!(collector.collect_once().await, 0);
    assert_eq!(store.sample_count().await, 2);
    assert_eq!(metrics.snapshot_samples_stored_total.get(), 2);

    // Outside the dedupe window a new sample is written
    let later = Utc::now() + ChronoDuration::minutes(2);
    let mut samples = store.samples("bitcoin", None, None).await.unwrap();
    samples[0].observed_at = later;
    assert_eq!(collector.store_with_dedupe(&samples, later).await.unwrap(), 1);
}

#[tokio::test]
async fn stale_assets_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(markets_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (_, collector) = collector(&server, &dir).await;
    collector.collect_once().await;

    let now = Utc::now();
    let stale = collector.stale_assets(now).await.unwrap();
    assert_eq!(stale, vec![("dogecoin".to_string(), None)]);

    let much_later = now + ChronoDuration::minutes(30);
    let stale: Vec<_> = collector
        .stale_assets(much_later)
        .await
        .unwrap()
        .into_iter()
        .map(|(asset, _)| asset)
        .collect();
    assert_eq!(stale, vec!["bitcoin", "ethereum", "dogecoin"]);
}

#[tokio::test]
async fn collector_holds_its_lock_while_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MARKETS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(markets_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let lock_path = dir.path().join("snapshot.lock");
    let (store, first) = collector(&server, &dir).await;
    let first = Arc::new(first);
    let cancel = CancellationToken::new();

    let task = first
        .clone()
        .start(cancel.clone())
        .unwrap()
        .expect("first collector starts");
    assert!(lock_path.exists());

    let (_, second) = collector(&server, &dir).await;
    assert!(Arc::new(second).start(cancel.clone()).unwrap().is_none());

    for _ in 0..50 {
        if store.sample_count().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.sample_count().await, 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("collector stops")
        .unwrap();
    assert!(!lock_path.exists());
}
