//! Job identities and per-job run records for the ingestion scheduler

use crate::models::Interval;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on the stored error message, in characters.
pub const MAX_ERROR_LEN: usize = 300;

/// One periodic ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    pub asset: String,
    pub interval: Interval,
}

impl JobSpec {
    pub fn new(asset: impl Into<String>, interval: Interval) -> Self {
        let asset = asset.into();
        Self {
            job_id: format!("ingest:{}:{}", asset, interval.code()),
            asset,
            interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// Health history of one job since scheduler start.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub spec: JobSpec,
    pub state: JobState,
    pub schedule_s: u64,
    pub last_run_ts: Option<DateTime<Utc>>,
    pub last_success_ts: Option<DateTime<Utc>>,
    pub last_success_inserted: Option<u64>,
    pub last_success_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_error_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(spec: JobSpec, schedule_s: u64) -> Self {
        Self {
            spec,
            state: JobState::Idle,
            schedule_s,
            last_run_ts: None,
            last_success_ts: None,
            last_success_inserted: None,
            last_success_ms: None,
            consecutive_failures: 0,
            last_error_ts: None,
            last_error: None,
        }
    }

    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.last_run_ts = Some(now);
    }

    pub fn succeed(&mut self, now: DateTime<Utc>, inserted: u64, elapsed_ms: u64) {
        self.state = JobState::Idle;
        self.last_success_ts = Some(now);
        self.last_success_inserted = Some(inserted);
        self.last_success_ms = Some(elapsed_ms);
        self.consecutive_failures = 0;
    }

    pub fn fail(&mut self, now: DateTime<Utc>, error: &str) {
        self.state = JobState::Idle;
        self.last_error_ts = Some(now);
        self.last_error = Some(truncate_error(error));
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            asset: self.spec.asset.clone(),
            interval: self.spec.interval.code().to_string(),
            state: self.state,
            schedule_s: self.schedule_s,
            last_run_ts: self.last_run_ts.map(epoch_seconds),
            last_run_iso: self.last_run_ts.map(iso_z),
            last_success_ts: self.last_success_ts.map(epoch_seconds),
            last_success_iso: self.last_success_ts.map(iso_z),
            last_success_inserted: self.last_success_inserted,
            last_success_ms: self.last_success_ms,
            consecutive_failures: self.consecutive_failures,
            last_error_ts: self.last_error_ts.map(epoch_seconds),
            last_error_iso: self.last_error_ts.map(iso_z),
            last_error: self.last_error.clone(),
        }
    }
}

/// Serializable per-job slice of the scheduler status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub asset: String,
    pub interval: String,
    pub state: JobState,
    pub schedule_s: u64,
    pub last_run_ts: Option<f64>,
    pub last_run_iso: Option<String>,
    pub last_success_ts: Option<f64>,
    pub last_success_iso: Option<String>,
    pub last_success_inserted: Option<u64>,
    pub last_success_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_error_ts: Option<f64>,
    pub last_error_iso: Option<String>,
    pub last_error: Option<String>,
}

pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}

pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

pub fn iso_z(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
