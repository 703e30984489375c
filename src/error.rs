//! Error types shared across the ingestion pipeline

use crate::db::invariants::InvariantFindings;
use crate::ingestion::completeness::GapReport;
use crate::models::{CandleKey, Interval, IntervalError};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    /// A raw insert hit an existing key. Signals a caller bug, not a data condition.
    #[error("integrity error: duplicate candle key {0}")]
    Integrity(CandleKey),
    #[error("candle open_time {open_time} is not aligned to interval {interval}")]
    Misaligned {
        interval: Interval,
        open_time: DateTime<Utc>,
    },
    #[error("candle store invariants violated: {0}")]
    InvariantViolation(InvariantFindings),
    #[error("stored row has {0}")]
    Interval(#[from] IntervalError),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed responded with status {0}")]
    Status(u16),
    #[error("feed payload could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid ingestion range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

#[derive(Debug, Error)]
pub enum CompletenessError {
    /// Gaps exist in the requested range. An expected business condition, not a bug.
    #[error(
        "data completeness check failed: {} gaps, {} missing candles",
        .0.gap_count(),
        .0.total_missing_candles()
    )]
    DataIncomplete(Box<GapReport>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CompletenessError {
    pub fn report(&self) -> Option<&GapReport> {
        match self {
            CompletenessError::DataIncomplete(report) => Some(report),
            CompletenessError::Store(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode lock payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("scheduler has no jobs configured")]
    NoJobs,
    #[error("unknown job '{0}'")]
    UnknownJob(String),
    #[error("scheduler is not running")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Interval(#[from] IntervalError),
}
