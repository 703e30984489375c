//! Wiring of stores, snapshot collector, scheduler and HTTP server

use crate::config::Settings;
use crate::core::http::{start_server, AppState};
use crate::core::scheduler::{JobScheduler, SchedulerHandle};
use crate::db::{CandleStore, SampleStore};
use crate::ingestion::SampleIngestor;
use crate::jobs::context::JobContext;
use crate::metrics::Metrics;
use crate::services::market_data::PriceFeed;
use crate::services::snapshot::SnapshotCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything the runtime needs before it starts.
pub struct IngestRuntime {
    settings: Settings,
    metrics: Arc<Metrics>,
    candles: Arc<dyn CandleStore>,
    samples: Arc<dyn SampleStore>,
    feed: Option<Arc<dyn PriceFeed>>,
    http_enabled: bool,
}

impl IngestRuntime {
    pub fn new(
        settings: Settings,
        metrics: Arc<Metrics>,
        candles: Arc<dyn CandleStore>,
        samples: Arc<dyn SampleStore>,
    ) -> Self {
        Self {
            settings,
            metrics,
            candles,
            samples,
            feed: None,
            http_enabled: true,
        }
    }

    pub fn with_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn without_http(mut self) -> Self {
        self.http_enabled = false;
        self
    }

    pub async fn start(self) -> Result<RunningRuntime, Box<dyn std::error::Error + Send + Sync>> {
        let cancel = CancellationToken::new();
        let settings = self.settings;

        let mut collector = None;
        let mut collector_task = None;
        match (&self.feed, settings.snapshot_enabled) {
            (Some(feed), true) => {
                let snapshot = Arc::new(
                    SnapshotCollector::new(feed.clone(), self.samples.clone(), settings.snapshot_config())
                        .with_metrics(self.metrics.clone()),
                );
                collector_task = snapshot.clone().start(cancel.child_token())?;
                if collector_task.is_some() {
                    collector = Some(snapshot);
                }
            }
            (None, true) => warn!("Snapshot collection enabled but no price feed configured"),
            _ => info!("Snapshot collection disabled (SNAPSHOT_ENABLED=false)"),
        }

        let mut scheduler = None;
        let mut handle = None;
        if settings.ingest_enabled {
            let ingestor = Arc::new(SampleIngestor::new(
                self.samples.clone(),
                self.candles.clone(),
                settings.ingest_lookback_days,
            ));
            let ctx = Arc::new(JobContext::new(ingestor, Some(self.metrics.clone())));
            let job_scheduler = JobScheduler::new(settings.scheduler_config(), ctx);
            handle = match job_scheduler.start().await {
                Ok(handle) => handle,
                Err(e) => {
                    error!(error = %e, "Scheduler failed to start; stopping snapshot collector");
                    cancel.cancel();
                    stop_collector(
                        collector_task.take(),
                        collector.as_deref(),
                        settings.scheduler_shutdown_timeout,
                    )
                    .await;
                    return Err(e.into());
                }
            };
            if handle.is_some() {
                scheduler = Some(job_scheduler);
            }
        } else {
            info!("Ingestion disabled (INGEST_ENABLED=false)");
        }

        let server_task = if self.http_enabled {
            let mut state = AppState::new(self.metrics.clone())
                .with_store(self.candles.clone())
                .with_stall_multiplier(settings.readiness_stall_multiplier);
            if let Some(handle) = &handle {
                state = state.with_scheduler(handle.clone());
            }
            let port = settings.port;
            let shutdown = cancel.child_token();
            Some(tokio::spawn(async move {
                if let Err(e) = start_server(state, port, shutdown).await {
                    error!(error = %e, "HTTP server failed");
                }
            }))
        } else {
            None
        };

        info!(
            scheduler = scheduler.is_some(),
            snapshot = collector.is_some(),
            http = server_task.is_some(),
            "Runtime started"
        );

        Ok(RunningRuntime {
            scheduler,
            handle,
            collector,
            collector_task,
            server_task,
            cancel,
            shutdown_timeout: settings.scheduler_shutdown_timeout,
        })
    }
}

pub struct RunningRuntime {
    scheduler: Option<JobScheduler>,
    handle: Option<SchedulerHandle>,
    collector: Option<Arc<SnapshotCollector>>,
    collector_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl RunningRuntime {
    /// `None` when ingestion is disabled or another process holds the scheduler lock.
    pub fn scheduler(&self) -> Option<SchedulerHandle> {
        self.handle.clone()
    }

    pub fn snapshot_running(&self) -> bool {
        self.collector_task.is_some()
    }

    /// Stop the scheduler, then the collector, then the HTTP server.
    pub async fn shutdown(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.stop().await {
                error!(error = %e, "Scheduler shutdown failed");
            }
        }

        self.cancel.cancel();
        stop_collector(
            self.collector_task.take(),
            self.collector.as_deref(),
            self.shutdown_timeout,
        )
        .await;

        if let Some(mut task) = self.server_task.take() {
            if tokio::time::timeout(self.shutdown_timeout, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        info!("Runtime stopped");
    }
}

/// Wait for a cancelled collector task, aborting it and releasing its lock on timeout.
async fn stop_collector(
    task: Option<JoinHandle<()>>,
    collector: Option<&SnapshotCollector>,
    timeout: Duration,
) {
    let Some(mut task) = task else {
        return;
    };
    if tokio::time::timeout(timeout, &mut task).await.is_ok() {
        return;
    }

    warn!("Snapshot collector did not stop in time; aborting");
    task.abort();
    let _ = task.await;
    if let Some(collector) = collector {
        if let Err(e) = collector.release_lock() {
            warn!(error = %e, "Failed to release snapshot lock");
        }
    }
}
