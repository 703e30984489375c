//! Postgres store tests
//!
//! Skipped unless TEST_DATABASE_URL points at a disposable database.

use candlekeep::db::{CandleStore, PostgresStore, SampleStore};
use candlekeep::error::StoreError;
use candlekeep::models::{CandleRow, Interval, PriceSample};
use chrono::{DateTime, Duration, TimeZone, Utc};

async fn store() -> Option<PostgresStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    Some(PostgresStore::connect(&url).await.expect("connect to test database"))
}

/// A unique asset per test run keeps tests independent on a shared database.
fn asset(name: &str) -> String {
    format!("{}-{}", name, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn base() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).unwrap()
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let Some(store) = store().await else { return };
    let asset = asset("pg-upsert");
    let one = Interval::parse("1m").unwrap();
    let rows: Vec<_> = (0..5)
        .map(|m| CandleRow::flat(asset.as_str(), one, base() + Duration::minutes(m), 1.0))
        .collect();

    assert_eq!(store.upsert(&rows).await.unwrap(), 5);
    assert_eq!(store.upsert(&rows).await.unwrap(), 5);

    let updated = CandleRow::new(asset.as_str(), one, base(), 1.0, 9.0, 0.5, 2.0);
    store.upsert(&[updated]).await.unwrap();

    let candles = store
        .query(&asset, one, base(), base() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(candles.len(), 5);
    assert_eq!(candles[0].row.high, 9.0);
    assert_eq!(
        store.latest_open_time(&asset, one).await.unwrap(),
        Some(base() + Duration::minutes(4))
    );
}

#[tokio::test]
async fn raw_insert_collision_is_an_integrity_error() {
    let Some(store) = store().await else { return };
    let asset = asset("pg-raw");
    let row = CandleRow::flat(asset.as_str(), Interval::parse("5m").unwrap(), base(), 1.0);

    store.insert_raw(&row).await.unwrap();
    let err = store.insert_raw(&row).await.unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn store_passes_strict_verification() {
    let Some(store) = store().await else { return };
    let findings = store.verify_invariants(true).await.unwrap();
    assert!(findings.is_clean());
}

#[tokio::test]
async fn samples_round_trip_with_bounds() {
    let Some(store) = store().await else { return };
    let asset = asset("pg-samples");
    let samples: Vec<_> = (0..3)
        .map(|i| PriceSample::new(asset.as_str(), base() + Duration::seconds(i * 30), 10.0 + i as f64))
        .collect();

    assert_eq!(store.store_samples(&samples).await.unwrap(), 3);
    assert_eq!(store.store_samples(&samples).await.unwrap(), 0);

    let tail = store
        .samples(&asset, Some(base() + Duration::seconds(30)), None)
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(
        store.latest_sample_time(&asset).await.unwrap(),
        Some(base() + Duration::seconds(60))
    );
}
