//! Best-effort periodic price sample collection

use crate::core::lock::{ExclusivityLock, LockPayload};
use crate::db::SampleStore;
use crate::error::{FeedError, LockError, StoreError};
use crate::metrics::Metrics;
use crate::models::PriceSample;
use crate::services::market_data::PriceFeed;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MIN_INTERVAL: Duration = Duration::from_secs(5);
/// A sample younger than this suppresses a new write for the same asset.
pub const WRITE_DEDUPE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub assets: Vec<String>,
    pub interval: Duration,
    pub max_retries: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stale_threshold: Duration,
    pub lock_path: PathBuf,
}

impl SnapshotConfig {
    pub fn new(assets: Vec<String>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            assets,
            interval: Duration::from_secs(60),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(10 * 60),
            lock_path: lock_path.into(),
        }
    }
}

pub struct SnapshotCollector {
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn SampleStore>,
    config: SnapshotConfig,
    lock: ExclusivityLock,
    metrics: Option<Arc<Metrics>>,
}

impl SnapshotCollector {
    pub fn new(feed: Arc<dyn PriceFeed>, store: Arc<dyn SampleStore>, config: SnapshotConfig) -> Self {
        Self {
            lock: ExclusivityLock::new(config.lock_path.clone()),
            feed,
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch samples, retrying transport and status failures with exponential backoff and jitter.
    pub async fn fetch_with_retries(&self) -> Result<Vec<PriceSample>, FeedError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.backoff_base)
            .with_max_delay(self.config.backoff_max)
            .with_max_times(self.config.max_retries)
            .with_jitter();

        (|| async { self.feed.fetch_price_samples(&self.config.assets).await })
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|e| !matches!(e, FeedError::Decode(_)))
            .notify(|e: &FeedError, delay: Duration| {
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Snapshot fetch failed, retrying");
            })
            .await
    }

    /// Store samples, skipping assets whose newest sample is inside the dedupe window.
    pub async fn store_with_dedupe(
        &self,
        samples: &[PriceSample],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let window = chrono::Duration::from_std(WRITE_DEDUPE_WINDOW).unwrap_or_default();
        let cutoff = now - window;

        let mut fresh = Vec::with_capacity(samples.len());
        for sample in samples {
            match self.store.latest_sample_time(&sample.asset).await? {
                Some(latest) if latest > cutoff => continue,
                _ => fresh.push(sample.clone()),
            }
        }

        self.store.store_samples(&fresh).await
    }

    /// Assets whose newest sample is missing or older than the stale threshold.
    pub async fn stale_assets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Option<DateTime<Utc>>)>, StoreError> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold).unwrap_or_default();
        let mut stale = Vec::new();
        for asset in &self.config.assets {
            let latest = self.store.latest_sample_time(asset).await?;
            match latest {
                Some(ts) if now - ts <= threshold => {}
                _ => stale.push((asset.clone(), latest)),
            }
        }
        Ok(stale)
    }

    /// One fetch-and-store pass. Errors are logged and counted, never returned.
    pub async fn collect_once(&self) -> u64 {
        let started = Instant::now();
        let samples = match self.fetch_with_retries().await {
            Ok(samples) => samples,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.snapshot_fetch_failures_total.inc();
                }
                error!(error = %e, duration_ms = started.elapsed().as_millis() as u64, "Snapshot fetch failed");
                return 0;
            }
        };

        match self.store_with_dedupe(&samples, Utc::now()).await {
            Ok(stored) => {
                if let Some(metrics) = &self.metrics {
                    metrics.snapshot_samples_stored_total.inc_by(stored);
                }
                info!(
                    fetched = samples.len(),
                    stored,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Snapshots stored"
                );
                stored
            }
            Err(e) => {
                error!(error = %e, "Failed to store snapshots");
                0
            }
        }
    }

    async fn warn_if_stale(&self) {
        let now = Utc::now();
        match self.stale_assets(now).await {
            Ok(stale) => {
                for (asset, latest) in stale {
                    match latest {
                        Some(ts) => warn!(
                            asset = %asset,
                            last = %ts.to_rfc3339(),
                            age_min = (now - ts).num_seconds() as f64 / 60.0,
                            "Snapshot stale"
                        ),
                        None => warn!(asset = %asset, "Snapshot stale: no samples stored yet"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Snapshot staleness check failed"),
        }
    }

    /// Collect until `cancel` fires. Sleeps race the token.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.interval.max(MIN_INTERVAL);
        info!(interval_s = period.as_secs(), "Snapshot collector started");

        loop {
            self.collect_once().await;
            self.warn_if_stale().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }

        info!("Snapshot collector stopped");
    }

    /// Release the collector lock when the loop was aborted before it could.
    pub fn release_lock(&self) -> Result<(), LockError> {
        self.lock.release()
    }

    /// Take the collector lock and spawn the loop. `Ok(None)` when another process collects.
    pub fn start(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<Option<JoinHandle<()>>, LockError> {
        let payload = LockPayload::for_current_process(self.config.assets.clone(), Vec::new());
        if !self.lock.acquire(&payload)? {
            warn!(
                path = %self.lock.path().display(),
                "Snapshot lock active; not starting a second collector"
            );
            return Ok(None);
        }

        Ok(Some(tokio::spawn(async move {
            self.run(cancel).await;
            if let Err(e) = self.lock.release() {
                warn!(error = %e, "Failed to release snapshot lock");
            }
        })))
    }
}
