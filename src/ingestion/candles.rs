//! Bucketing raw price samples into aligned candles

use crate::db::{CandleStore, SampleStore};
use crate::error::IngestError;
use crate::models::{days_before, CandleRow, CandleSource, Interval, PriceSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Produces candles for a series and writes them through the store.
///
/// Both operations are idempotent and safe to run over overlapping windows.
#[async_trait]
pub trait CandleIngestor: Send + Sync {
    /// Ingest candles with `start <= open_time < end`. Returns rows written.
    async fn ingest_range(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, IngestError>;

    /// Ingest from the newest stored candle onwards.
    async fn ingest_latest(&self, asset: &str, interval: Interval) -> Result<u64, IngestError>;
}

/// Group samples by the boundary they fall in.
///
/// Open and close are the first and last price by observation time. Volume is
/// the sum of the samples that carry one, `None` when none do.
pub fn bucket_samples(asset: &str, interval: Interval, samples: &[PriceSample]) -> Vec<CandleRow> {
    let mut ordered: Vec<&PriceSample> = samples.iter().filter(|s| s.asset == asset).collect();
    ordered.sort_by_key(|s| s.observed_at);

    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&PriceSample>> = BTreeMap::new();
    for sample in ordered {
        buckets
            .entry(interval.floor(sample.observed_at))
            .or_default()
            .push(sample);
    }

    buckets
        .into_iter()
        .filter_map(|(open_time, group)| {
            let first = group.first()?;
            let last = group.last()?;
            let high = group.iter().map(|s| s.price).fold(f64::MIN, f64::max);
            let low = group.iter().map(|s| s.price).fold(f64::MAX, f64::min);
            let volume = group
                .iter()
                .filter_map(|s| s.volume)
                .fold(None, |acc: Option<f64>, v| Some(acc.unwrap_or(0.0) + v));

            let row = CandleRow::new(asset, interval, open_time, first.price, high, low, last.price)
                .with_source(CandleSource::Local);
            Some(match volume {
                Some(v) => row.with_volume(v),
                None => row,
            })
        })
        .collect()
}

/// Ingestor that builds candles from the sample store.
pub struct SampleIngestor {
    samples: Arc<dyn SampleStore>,
    candles: Arc<dyn CandleStore>,
    lookback_days: i64,
}

impl SampleIngestor {
    pub fn new(
        samples: Arc<dyn SampleStore>,
        candles: Arc<dyn CandleStore>,
        lookback_days: i64,
    ) -> Self {
        Self {
            samples,
            candles,
            lookback_days: lookback_days.max(1),
        }
    }

    async fn write(&self, rows: Vec<CandleRow>) -> Result<u64, IngestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        Ok(self.candles.upsert(&rows).await?)
    }
}

#[async_trait]
impl CandleIngestor for SampleIngestor {
    async fn ingest_range(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, IngestError> {
        if start >= end {
            return Err(IngestError::InvalidRange { start, end });
        }

        let samples = self.samples.samples(asset, Some(start), Some(end)).await?;
        let rows: Vec<CandleRow> = bucket_samples(asset, interval, &samples)
            .into_iter()
            .filter(|row| row.open_time >= start && row.open_time < end)
            .collect();

        let written = self.write(rows).await?;
        debug!(asset, interval = %interval, samples = samples.len(), written, "Ingested range");
        Ok(written)
    }

    async fn ingest_latest(&self, asset: &str, interval: Interval) -> Result<u64, IngestError> {
        // The newest stored bucket may have been partial, so rebuild it.
        // An unrepresentable lookback reads every stored sample
        let start = match self.candles.latest_open_time(asset, interval).await? {
            Some(latest) => Some(latest),
            None => days_before(Utc::now(), self.lookback_days).map(|since| interval.floor(since)),
        };

        let samples = self.samples.samples(asset, start, None).await?;
        let rows = bucket_samples(asset, interval, &samples);

        let written = self.write(rows).await?;
        debug!(asset, interval = %interval, since = ?start, written, "Ingested latest candles");
        Ok(written)
    }
}
