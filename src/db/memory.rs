//! In-process store used by tests and `--memory` runs

use super::invariants::{AlignmentFinding, InvariantFindings, OrderingFinding};
use super::{prepare_batch, CandleStore, SampleStore};
use crate::error::StoreError;
use crate::models::{Candle, CandleRow, Interval, PriceSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

type Series = BTreeMap<DateTime<Utc>, Candle>;

/// Candles and samples kept in ordered maps; the map key is the uniqueness constraint.
#[derive(Clone, Default)]
pub struct MemoryStore {
    candles: Arc<RwLock<HashMap<(String, Interval), Series>>>,
    samples: Arc<RwLock<HashMap<String, BTreeMap<DateTime<Utc>, PriceSample>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored candles across every series.
    pub async fn candle_count(&self) -> usize {
        self.candles.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn sample_count(&self) -> usize {
        self.samples.read().await.values().map(BTreeMap::len).sum()
    }
}

fn range_bounds(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (Bound<DateTime<Utc>>, Bound<DateTime<Utc>>) {
    (
        start.map(Bound::Included).unwrap_or(Bound::Unbounded),
        end.map(Bound::Excluded).unwrap_or(Bound::Unbounded),
    )
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn upsert(&self, rows: &[CandleRow]) -> Result<u64, StoreError> {
        let batch = prepare_batch(rows)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut candles = self.candles.write().await;
        for row in batch.iter() {
            let series = candles
                .entry((row.asset.clone(), row.interval))
                .or_default();
            match series.get_mut(&row.open_time) {
                Some(existing) => {
                    existing.row = row.clone();
                    existing.updated_at = now;
                }
                None => {
                    series.insert(
                        row.open_time,
                        Candle {
                            row: row.clone(),
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
        }

        Ok(batch.len() as u64)
    }

    async fn insert_raw(&self, row: &CandleRow) -> Result<(), StoreError> {
        if !row.interval.is_aligned(row.open_time) {
            return Err(StoreError::Misaligned {
                interval: row.interval,
                open_time: row.open_time,
            });
        }

        let mut candles = self.candles.write().await;
        let series = candles
            .entry((row.asset.clone(), row.interval))
            .or_default();
        if series.contains_key(&row.open_time) {
            return Err(StoreError::Integrity(row.key()));
        }

        let now = Utc::now();
        series.insert(
            row.open_time,
            Candle {
                row: row.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let candles = self.candles.read().await;
        Ok(candles
            .get(&(asset.to_string(), interval))
            .map(|series| series.range(start..end).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest_open_time(
        &self,
        asset: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let candles = self.candles.read().await;
        Ok(candles
            .get(&(asset.to_string(), interval))
            .and_then(|series| series.keys().next_back().copied()))
    }

    async fn verify_invariants(&self, strict: bool) -> Result<InvariantFindings, StoreError> {
        let candles = self.candles.read().await;
        let mut findings = InvariantFindings::default();

        for ((asset, interval), series) in candles.iter() {
            let mut prev: Option<DateTime<Utc>> = None;
            for (key, candle) in series.iter() {
                let open_time = candle.open_time();
                if open_time != *key || candle.row.asset != *asset || candle.row.interval != *interval {
                    findings.non_monotonic.push(OrderingFinding {
                        asset: asset.clone(),
                        interval: interval.code().to_string(),
                        open_time,
                        prev_open_time: *key,
                    });
                }
                if let Some(prev) = prev {
                    if open_time <= prev {
                        findings.non_monotonic.push(OrderingFinding {
                            asset: asset.clone(),
                            interval: interval.code().to_string(),
                            open_time,
                            prev_open_time: prev,
                        });
                    }
                }
                if !interval.is_aligned(open_time) {
                    findings.misaligned.push(AlignmentFinding {
                        asset: asset.clone(),
                        interval: interval.code().to_string(),
                        open_time,
                    });
                }
                prev = Some(open_time);
            }
        }

        findings.enforce(strict)
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn store_samples(&self, samples: &[PriceSample]) -> Result<u64, StoreError> {
        let mut stored = 0u64;
        let mut all = self.samples.write().await;
        for sample in samples {
            let series = all.entry(sample.asset.clone()).or_default();
            if series.contains_key(&sample.observed_at) {
                continue;
            }
            series.insert(sample.observed_at, sample.clone());
            stored += 1;
        }
        Ok(stored)
    }

    async fn samples(
        &self,
        asset: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSample>, StoreError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Ok(Vec::new());
            }
        }
        let all = self.samples.read().await;
        Ok(all
            .get(asset)
            .map(|series| {
                series
                    .range(range_bounds(start, end))
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_sample_time(&self, asset: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let all = self.samples.read().await;
        Ok(all
            .get(asset)
            .and_then(|series| series.keys().next_back().copied()))
    }
}
