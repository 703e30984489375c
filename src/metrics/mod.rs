//! Prometheus metrics for the HTTP surface and the ingestion pipeline

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Job-duration buckets in seconds, from sub-second runs to slow backfill-sized ones.
const JOB_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounter,
    pub http_request_duration_seconds: Histogram,
    pub http_requests_in_flight: Gauge,
    pub ingest_job_runs_total: IntCounterVec,
    pub ingest_job_duration_seconds: HistogramVec,
    pub ingest_candles_upserted_total: IntCounterVec,
    pub ingest_job_consecutive_failures: IntGaugeVec,
    pub backfill_runs_total: IntCounterVec,
    pub snapshot_fetch_failures_total: IntCounter,
    pub snapshot_samples_stored_total: IntCounter,
    pub database_connected: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total =
            IntCounter::with_opts(Opts::new("http_requests_total", "Total HTTP requests served"))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        ))?;
        let http_requests_in_flight = Gauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "HTTP requests currently being served",
        ))?;

        let ingest_job_runs_total = IntCounterVec::new(
            Opts::new("ingest_job_runs_total", "Scheduled ingestion runs by outcome"),
            &["job", "outcome"],
        )?;
        let ingest_job_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ingest_job_duration_seconds",
                "Duration of ingestion runs in seconds",
            )
            .buckets(JOB_DURATION_BUCKETS.to_vec()),
            &["job"],
        )?;
        let ingest_candles_upserted_total = IntCounterVec::new(
            Opts::new(
                "ingest_candles_upserted_total",
                "Candles inserted or updated by ingestion runs",
            ),
            &["job"],
        )?;
        let ingest_job_consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "ingest_job_consecutive_failures",
                "Consecutive failed runs per ingestion job",
            ),
            &["job"],
        )?;
        let backfill_runs_total = IntCounterVec::new(
            Opts::new("backfill_runs_total", "Backfill runs by outcome"),
            &["outcome"],
        )?;
        let snapshot_fetch_failures_total = IntCounter::with_opts(Opts::new(
            "snapshot_fetch_failures_total",
            "Snapshot fetches that failed after retries",
        ))?;
        let snapshot_samples_stored_total = IntCounter::with_opts(Opts::new(
            "snapshot_samples_stored_total",
            "Price samples stored by the snapshot collector",
        ))?;
        let database_connected = IntGauge::with_opts(Opts::new(
            "database_connected",
            "1 when the candle store is reachable",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(ingest_job_runs_total.clone()))?;
        registry.register(Box::new(ingest_job_duration_seconds.clone()))?;
        registry.register(Box::new(ingest_candles_upserted_total.clone()))?;
        registry.register(Box::new(ingest_job_consecutive_failures.clone()))?;
        registry.register(Box::new(backfill_runs_total.clone()))?;
        registry.register(Box::new(snapshot_fetch_failures_total.clone()))?;
        registry.register(Box::new(snapshot_samples_stored_total.clone()))?;
        registry.register(Box::new(database_connected.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            ingest_job_runs_total,
            ingest_job_duration_seconds,
            ingest_candles_upserted_total,
            ingest_job_consecutive_failures,
            backfill_runs_total,
            snapshot_fetch_failures_total,
            snapshot_samples_stored_total,
            database_connected,
        })
    }

    pub fn record_job_success(&self, job_id: &str, inserted: u64, duration_secs: f64) {
        self.ingest_job_runs_total
            .with_label_values(&[job_id, "success"])
            .inc();
        self.ingest_job_duration_seconds
            .with_label_values(&[job_id])
            .observe(duration_secs);
        self.ingest_candles_upserted_total
            .with_label_values(&[job_id])
            .inc_by(inserted);
        self.ingest_job_consecutive_failures
            .with_label_values(&[job_id])
            .set(0);
    }

    pub fn record_job_failure(&self, job_id: &str, consecutive_failures: u32, duration_secs: f64) {
        self.ingest_job_runs_total
            .with_label_values(&[job_id, "failure"])
            .inc();
        self.ingest_job_duration_seconds
            .with_label_values(&[job_id])
            .observe(duration_secs);
        self.ingest_job_consecutive_failures
            .with_label_values(&[job_id])
            .set(i64::from(consecutive_failures));
    }

    pub fn record_backfill(&self, outcome: &str) {
        self.backfill_runs_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_database_connected(&self, connected: bool) {
        self.database_connected.set(i64::from(connected));
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
