//! Unit tests for the in-process candle and sample store

use crate::fixtures::{interval, minute, ts, BASE_EPOCH};
use candlekeep::db::{CandleStore, MemoryStore, SampleStore};
use candlekeep::error::StoreError;
use candlekeep::models::{CandleRow, PriceSample};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn upsert_overwrites_instead_of_duplicating() {
    let store = MemoryStore::new();
    let one_minute = interval("1m");

    let written = store
        .upsert(&[CandleRow::flat("bitcoin", one_minute, minute(0), 100.0)])
        .await
        .unwrap();
    assert_eq!(written, 1);
    let created = store.query("bitcoin", one_minute, minute(0), minute(1)).await.unwrap()[0].clone();

    store
        .upsert(&[CandleRow::new("bitcoin", one_minute, minute(0), 100.0, 120.0, 90.0, 110.0)])
        .await
        .unwrap();
    let candles = store.query("bitcoin", one_minute, minute(0), minute(1)).await.unwrap();

    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].row.high, 120.0);
    assert_eq!(candles[0].row.close, 110.0);
    assert_eq!(candles[0].created_at, created.created_at);
    assert!(candles[0].updated_at >= created.updated_at);
}

#[tokio::test]
async fn duplicate_keys_in_one_batch_collapse_to_last() {
    let store = MemoryStore::new();
    let one_minute = interval("1m");
    let rows = vec![
        CandleRow::flat("bitcoin", one_minute, minute(0), 1.0),
        CandleRow::flat("bitcoin", one_minute, minute(0), 2.0),
    ];
    assert_eq!(store.upsert(&rows).await.unwrap(), 1);
    let candles = store.query("bitcoin", one_minute, minute(0), minute(1)).await.unwrap();
    assert_eq!(candles[0].row.close, 2.0);
}

#[tokio::test]
async fn misaligned_rows_are_rejected() {
    let store = MemoryStore::new();
    let row = CandleRow::flat("bitcoin", interval("5m"), minute(1), 1.0);
    let err = store.upsert(&[row.clone()]).await.unwrap_err();
    assert!(matches!(err, StoreError::Misaligned { .. }));
    assert!(matches!(store.insert_raw(&row).await, Err(StoreError::Misaligned { .. })));
    assert_eq!(store.candle_count().await, 0);
}

#[tokio::test]
async fn raw_insert_fails_fast_on_existing_key() {
    let store = MemoryStore::new();
    let row = CandleRow::flat("bitcoin", interval("1m"), minute(0), 1.0);
    assert_ok!(store.insert_raw(&row).await);

    let err = assert_err!(store.insert_raw(&row).await);
    match err {
        StoreError::Integrity(key) => assert_eq!(key, row.key()),
        other => panic!("expected integrity error, got {other}"),
    }
    assert_eq!(store.candle_count().await, 1);
}

#[tokio::test]
async fn query_is_half_open_and_ordered() {
    let store = MemoryStore::new();
    let one_minute = interval("1m");
    let rows: Vec<_> = [3, 0, 2, 1]
        .iter()
        .map(|m| CandleRow::flat("bitcoin", one_minute, minute(*m), 1.0))
        .collect();
    store.upsert(&rows).await.unwrap();

    let candles = store.query("bitcoin", one_minute, minute(1), minute(3)).await.unwrap();
    let times: Vec<_> = candles.iter().map(|c| c.open_time()).collect();
    assert_eq!(times, vec![minute(1), minute(2)]);

    assert!(store.query("bitcoin", one_minute, minute(3), minute(1)).await.unwrap().is_empty());
    assert_eq!(store.latest_open_time("bitcoin", one_minute).await.unwrap(), Some(minute(3)));
    assert_eq!(store.latest_open_time("bitcoin", interval("5m")).await.unwrap(), None);
}

#[tokio::test]
async fn clean_store_passes_strict_verification() {
    let store = MemoryStore::new();
    let rows: Vec<_> = (0..5)
        .map(|m| CandleRow::flat("bitcoin", interval("1m"), minute(m), 1.0))
        .collect();
    store.upsert(&rows).await.unwrap();

    let findings = store.verify_invariants(true).await.unwrap();
    assert!(findings.is_clean());
    assert_eq!(findings.total(), 0);
}

#[tokio::test]
async fn samples_ignore_repeated_observations() {
    let store = MemoryStore::new();
    let samples = vec![
        PriceSample::new("bitcoin", ts(BASE_EPOCH), 1.0),
        PriceSample::new("bitcoin", ts(BASE_EPOCH + 30), 2.0),
    ];
    assert_eq!(store.store_samples(&samples).await.unwrap(), 2);
    assert_eq!(store.store_samples(&samples).await.unwrap(), 0);
    assert_eq!(store.sample_count().await, 2);

    let bounded = store
        .samples("bitcoin", Some(ts(BASE_EPOCH + 1)), None)
        .await
        .unwrap();
    assert_eq!(bounded.len(), 1);
    assert_eq!(bounded[0].price, 2.0);
    assert_eq!(
        store.latest_sample_time("bitcoin").await.unwrap(),
        Some(ts(BASE_EPOCH + 30))
    );
    assert_eq!(store.latest_sample_time("ethereum").await.unwrap(), None);
}
