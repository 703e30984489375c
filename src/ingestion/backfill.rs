//! Bounded, iterative gap repair

use super::candles::CandleIngestor;
use super::completeness::{CompletenessChecker, GapReport};
use crate::db::CandleStore;
use crate::error::{CompletenessError, StoreError};
use crate::metrics::Metrics;
use crate::models::{days_before, Interval};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_MAX_GAPS_PER_RUN: usize = 500;
pub const DEFAULT_MAX_CANDLES_PER_RUN: u64 = 50_000;

/// Resource limits for one backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillCaps {
    pub max_window_days: i64,
    pub max_gaps_per_run: usize,
    pub max_candles_per_run: u64,
}

impl Default for BackfillCaps {
    fn default() -> Self {
        Self {
            max_window_days: DEFAULT_MAX_WINDOW_DAYS,
            max_gaps_per_run: DEFAULT_MAX_GAPS_PER_RUN,
            max_candles_per_run: DEFAULT_MAX_CANDLES_PER_RUN,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsHit {
    pub window_limit: bool,
    pub gap_limit: bool,
    pub candle_limit: bool,
}

/// Why the fill loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The range had no gaps to begin with.
    NoGaps,
    Converged,
    /// Ingestion wrote zero rows for the earliest gap.
    NoProgress,
    /// Total missing candles did not strictly decrease after a fill.
    NotConverging,
    GapLimit,
    CandleLimit,
    InvariantViolation,
    IngestFailed,
    StoreFailed,
    InvalidRange,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::NoGaps => "no_gaps",
            StopReason::Converged => "converged",
            StopReason::NoProgress => "no_progress",
            StopReason::NotConverging => "not_converging",
            StopReason::GapLimit => "gap_limit",
            StopReason::CandleLimit => "candle_limit",
            StopReason::InvariantViolation => "invariant_violation",
            StopReason::IngestFailed => "ingest_failed",
            StopReason::StoreFailed => "store_failed",
            StopReason::InvalidRange => "invalid_range",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillResult {
    pub asset: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub gaps_fixed: usize,
    pub candles_added: u64,
    pub completed: bool,
    pub remaining_gaps: Option<GapReport>,
    pub caps_hit: CapsHit,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackfillResult {
    fn new(asset: &str, interval: Interval, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            asset: asset.to_string(),
            interval,
            start,
            end,
            gaps_fixed: 0,
            candles_added: 0,
            completed: false,
            remaining_gaps: None,
            caps_hit: CapsHit::default(),
            stop_reason: StopReason::Converged,
            error: None,
        }
    }

    fn fail(mut self, reason: StopReason, error: impl ToString) -> Self {
        self.completed = false;
        self.stop_reason = reason;
        self.error = Some(error.to_string());
        self
    }
}

/// Drives the ingestor over detected gaps until the range converges or a cap is hit.
pub struct BackfillExecutor {
    store: Arc<dyn CandleStore>,
    ingestor: Arc<dyn CandleIngestor>,
    checker: CompletenessChecker,
    caps: BackfillCaps,
    metrics: Option<Arc<Metrics>>,
}

impl BackfillExecutor {
    pub fn new(
        store: Arc<dyn CandleStore>,
        ingestor: Arc<dyn CandleIngestor>,
        caps: BackfillCaps,
    ) -> Self {
        Self {
            checker: CompletenessChecker::new(store.clone()),
            store,
            ingestor,
            caps,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn caps(&self) -> BackfillCaps {
        self.caps
    }

    pub async fn execute_backfill(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BackfillResult {
        let result = self.run(asset, interval, start, end).await;

        if let Some(metrics) = &self.metrics {
            let outcome = if result.completed {
                "completed"
            } else if result.error.is_some() {
                "failed"
            } else {
                "incomplete"
            };
            metrics.record_backfill(outcome);
        }

        info!(
            asset,
            interval = %interval,
            gaps_fixed = result.gaps_fixed,
            candles_added = result.candles_added,
            completed = result.completed,
            stop_reason = result.stop_reason.as_str(),
            "Backfill finished"
        );
        result
    }

    async fn run(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BackfillResult {
        let mut caps_hit = CapsHit::default();
        let mut start = start;
        // A window too large to represent leaves the range unclamped
        if let Some(window_start) = days_before(end, self.caps.max_window_days.max(1)) {
            if start < window_start {
                start = window_start;
                caps_hit.window_limit = true;
                warn!(asset, interval = %interval, start = %start, "Backfill window clamped");
            }
        }

        let mut result = BackfillResult::new(asset, interval, start, end);
        result.caps_hit = caps_hit;

        if start >= end {
            return result.fail(
                StopReason::InvalidRange,
                format!("start {} is not before end {}", start, end),
            );
        }

        let mut report = match self.checker.generate_report(asset, interval, start, end).await {
            Ok(report) => report,
            Err(e) => return result.fail(StopReason::StoreFailed, e),
        };

        if !report.gaps_found() {
            result.completed = true;
            result.stop_reason = StopReason::NoGaps;
            return result;
        }

        info!(
            asset,
            interval = %interval,
            gap_count = report.gap_count(),
            missing = report.total_missing_candles(),
            "Backfill starting"
        );

        let mut iterations = 0usize;
        let mut stopped_early: Option<StopReason> = None;

        while report.gaps_found()
            && iterations < self.caps.max_gaps_per_run
            && result.candles_added < self.caps.max_candles_per_run
        {
            let Some(gap) = report.first_gap().copied() else {
                break;
            };
            iterations += 1;

            let inserted = match self
                .ingestor
                .ingest_range(asset, interval, gap.start, gap.end)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    error!(asset, interval = %interval, error = %e, "Backfill ingestion failed");
                    result.remaining_gaps = Some(report);
                    return result.fail(StopReason::IngestFailed, e);
                }
            };

            if inserted == 0 {
                warn!(
                    asset,
                    interval = %interval,
                    gap_start = %gap.start,
                    gap_end = %gap.end,
                    "Backfill made no progress on gap"
                );
                stopped_early = Some(StopReason::NoProgress);
                break;
            }
            result.candles_added += inserted;

            match self.store.verify_invariants(true).await {
                Ok(_) => {}
                Err(e @ StoreError::InvariantViolation(_)) => {
                    error!(asset, interval = %interval, error = %e, "Store invariants violated, aborting backfill");
                    result.remaining_gaps = Some(report);
                    return result.fail(StopReason::InvariantViolation, e);
                }
                Err(e) => {
                    result.remaining_gaps = Some(report);
                    return result.fail(StopReason::StoreFailed, e);
                }
            }

            let previous_missing = report.total_missing_candles();
            report = match self.checker.generate_report(asset, interval, start, end).await {
                Ok(next) => next,
                Err(e) => {
                    result.remaining_gaps = Some(report);
                    return result.fail(StopReason::StoreFailed, e);
                }
            };

            let missing = report.total_missing_candles();
            if missing >= previous_missing {
                warn!(asset, interval = %interval, previous_missing, missing, "Backfill is not converging");
                stopped_early = Some(StopReason::NotConverging);
                break;
            }
            result.gaps_fixed += 1;
        }

        result.stop_reason = match stopped_early {
            Some(reason) => reason,
            None if !report.gaps_found() => StopReason::Converged,
            None => {
                result.caps_hit.gap_limit = iterations >= self.caps.max_gaps_per_run;
                result.caps_hit.candle_limit =
                    result.candles_added >= self.caps.max_candles_per_run;
                if result.caps_hit.candle_limit {
                    StopReason::CandleLimit
                } else {
                    StopReason::GapLimit
                }
            }
        };

        match self.checker.ensure_no_gaps(asset, interval, start, end).await {
            Ok(_) => {
                result.completed = true;
                result.remaining_gaps = None;
            }
            Err(CompletenessError::DataIncomplete(remaining)) => {
                result.completed = false;
                result.remaining_gaps = Some(*remaining);
            }
            Err(e) => return result.fail(StopReason::StoreFailed, e),
        }

        result
    }
}
