//! Unit tests for sample bucketing and the sample-backed ingestor

use crate::fixtures::{interval, minute, ts, BASE_EPOCH};
use candlekeep::db::{CandleStore, MemoryStore, SampleStore};
use candlekeep::error::IngestError;
use candlekeep::ingestion::{bucket_samples, CandleIngestor, SampleIngestor};
use candlekeep::models::{CandleSource, PriceSample};
use std::sync::Arc;

fn sample(offset_s: i64, price: f64) -> PriceSample {
    PriceSample::new("bitcoin", ts(BASE_EPOCH + offset_s), price)
}

#[test]
fn buckets_ohlc_by_observation_order() {
    // Deliberately out of order
    let samples = vec![
        sample(50, 103.0),
        sample(10, 100.0),
        sample(30, 105.0),
        sample(40, 98.0),
        sample(70, 110.0),
    ];
    let rows = bucket_samples("bitcoin", interval("1m"), &samples);

    assert_eq!(rows.len(), 2);
    let first = &rows[0];
    assert_eq!(first.open_time, minute(0));
    assert_eq!(first.open, 100.0);
    assert_eq!(first.high, 105.0);
    assert_eq!(first.low, 98.0);
    assert_eq!(first.close, 103.0);
    assert_eq!(first.source, CandleSource::Local);
    assert_eq!(rows[1].open_time, minute(1));
    assert_eq!(rows[1].open, 110.0);
}

#[test]
fn volume_is_summed_only_when_present() {
    let samples = vec![
        sample(0, 1.0).with_volume(2.0),
        sample(10, 1.0),
        sample(20, 1.0).with_volume(3.0),
        sample(60, 1.0),
    ];
    let rows = bucket_samples("bitcoin", interval("1m"), &samples);
    assert_eq!(rows[0].volume, Some(5.0));
    assert_eq!(rows[1].volume, None);
}

#[test]
fn other_assets_are_ignored() {
    let samples = vec![PriceSample::new("ethereum", minute(0), 1.0)];
    assert!(bucket_samples("bitcoin", interval("1m"), &samples).is_empty());
}

async fn ingestor_with_samples(samples: &[PriceSample]) -> (Arc<MemoryStore>, SampleIngestor) {
    let store = Arc::new(MemoryStore::new());
    store.store_samples(samples).await.unwrap();
    let ingestor = SampleIngestor::new(store.clone(), store.clone(), 3);
    (store, ingestor)
}

#[tokio::test]
async fn ingest_range_is_idempotent() {
    let samples: Vec<_> = (0..10).map(|i| sample(i * 30, 100.0 + i as f64)).collect();
    let (store, ingestor) = ingestor_with_samples(&samples).await;
    let one_minute = interval("1m");

    let first = ingestor
        .ingest_range("bitcoin", one_minute, minute(0), minute(5))
        .await
        .unwrap();
    let before = store.query("bitcoin", one_minute, minute(0), minute(5)).await.unwrap();

    let second = ingestor
        .ingest_range("bitcoin", one_minute, minute(0), minute(5))
        .await
        .unwrap();
    let after = store.query("bitcoin", one_minute, minute(0), minute(5)).await.unwrap();

    assert_eq!(first, 5);
    assert_eq!(second, 5);
    assert_eq!(store.candle_count().await, 5);
    let rows_before: Vec<_> = before.iter().map(|c| c.row.clone()).collect();
    let rows_after: Vec<_> = after.iter().map(|c| c.row.clone()).collect();
    assert_eq!(rows_before, rows_after);
}

#[tokio::test]
async fn overlapping_ranges_do_not_duplicate() {
    let samples: Vec<_> = (0..10).map(|i| sample(i * 60, 1.0)).collect();
    let (store, ingestor) = ingestor_with_samples(&samples).await;
    let one_minute = interval("1m");

    ingestor.ingest_range("bitcoin", one_minute, minute(0), minute(6)).await.unwrap();
    ingestor.ingest_range("bitcoin", one_minute, minute(3), minute(10)).await.unwrap();

    assert_eq!(store.candle_count().await, 10);
}

#[tokio::test]
async fn ingest_range_stays_inside_bounds() {
    let samples: Vec<_> = (0..10).map(|i| sample(i * 60, 1.0)).collect();
    let (store, ingestor) = ingestor_with_samples(&samples).await;
    let written = ingestor
        .ingest_range("bitcoin", interval("1m"), minute(2), minute(4))
        .await
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(store.latest_open_time("bitcoin", interval("1m")).await.unwrap(), Some(minute(3)));
}

#[tokio::test]
async fn ingest_range_rejects_empty_range() {
    let (_, ingestor) = ingestor_with_samples(&[]).await;
    let err = ingestor
        .ingest_range("bitcoin", interval("1m"), minute(5), minute(5))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidRange { .. }));
}

#[tokio::test]
async fn ingest_latest_rebuilds_from_newest_candle() {
    let now = chrono::Utc::now();
    let five = interval("5m");
    let current = five.floor(now);
    let samples = vec![
        PriceSample::new("bitcoin", current - chrono::Duration::minutes(10), 1.0),
        PriceSample::new("bitcoin", current - chrono::Duration::minutes(5), 2.0),
        PriceSample::new("bitcoin", current, 3.0),
    ];
    let (store, ingestor) = ingestor_with_samples(&samples).await;

    assert_eq!(ingestor.ingest_latest("bitcoin", five).await.unwrap(), 3);
    assert_eq!(store.latest_open_time("bitcoin", five).await.unwrap(), Some(current));

    // Only the newest bucket is rebuilt on the next pass
    assert_eq!(ingestor.ingest_latest("bitcoin", five).await.unwrap(), 1);
    assert_eq!(store.candle_count().await, 3);
}

#[tokio::test]
async fn ingest_latest_with_no_samples_writes_nothing() {
    let (store, ingestor) = ingestor_with_samples(&[]).await;
    assert_eq!(ingestor.ingest_latest("bitcoin", interval("15m")).await.unwrap(), 0);
    assert_eq!(store.candle_count().await, 0);
}
