//! Candle and sample persistence

pub mod invariants;
pub mod memory;
pub mod postgres;

pub use invariants::InvariantFindings;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::StoreError;
use crate::models::{Candle, CandleKey, CandleRow, Interval, PriceSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Durable keyed candle storage.
///
/// Keys are `(asset, interval, open_time)`. Writers go through [`CandleStore::upsert`],
/// which is idempotent and never fails on a duplicate key; the raw insert
/// path exists to surface caller bugs and fails fast on a collision.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Insert or overwrite rows, returning how many rows were written.
    async fn upsert(&self, rows: &[CandleRow]) -> Result<u64, StoreError>;

    /// Plain insert. A key collision is a [`StoreError::Integrity`].
    async fn insert_raw(&self, row: &CandleRow) -> Result<(), StoreError>;

    /// Candles with `start <= open_time < end`, ascending.
    async fn query(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError>;

    async fn existing_open_times(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        let candles = self.query(asset, interval, start, end).await?;
        Ok(candles.iter().map(Candle::open_time).collect())
    }

    async fn latest_open_time(
        &self,
        asset: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Scan for duplicate keys, out-of-order keys and misaligned open times.
    async fn verify_invariants(&self, strict: bool) -> Result<InvariantFindings, StoreError>;
}

/// Raw price samples, the input of candle bucketing.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Store samples, ignoring ones already present for the same `(asset, observed_at)`.
    async fn store_samples(&self, samples: &[PriceSample]) -> Result<u64, StoreError>;

    /// Samples with `start <= observed_at < end`, ascending. Open bounds are unbounded.
    async fn samples(
        &self,
        asset: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSample>, StoreError>;

    async fn latest_sample_time(&self, asset: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Reject misaligned rows and collapse duplicate keys within one batch (last row wins).
pub(crate) fn prepare_batch(rows: &[CandleRow]) -> Result<Vec<CandleRow>, StoreError> {
    let mut positions: HashMap<CandleKey, usize> = HashMap::with_capacity(rows.len());
    let mut batch: Vec<CandleRow> = Vec::with_capacity(rows.len());

    for row in rows {
        if !row.interval.is_aligned(row.open_time) {
            return Err(StoreError::Misaligned {
                interval: row.interval,
                open_time: row.open_time,
            });
        }
        match positions.get(&row.key()) {
            Some(&idx) => batch[idx] = row.clone(),
            None => {
                positions.insert(row.key(), batch.len());
                batch.push(row.clone());
            }
        }
    }

    Ok(batch)
}
