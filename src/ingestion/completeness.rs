//! Pass/fail completeness gate over stored candles

use super::gaps::{detect_gaps, iso, Gap};
use crate::db::CandleStore;
use crate::error::CompletenessError;
use crate::models::Interval;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Gaps found in `[start, end)` for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct GapReport {
    pub asset: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub gaps: Vec<Gap>,
}

impl GapReport {
    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    pub fn total_missing_candles(&self) -> i64 {
        self.gaps.iter().map(|g| g.missing_candles).sum()
    }

    pub fn gaps_found(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn first_gap(&self) -> Option<&Gap> {
        self.gaps.first()
    }

    pub fn last_gap(&self) -> Option<&Gap> {
        self.gaps.last()
    }

    /// Stable JSON shape shared by the CLI, the HTTP surface and logs.
    pub fn to_dict(&self) -> Value {
        let mut out = Map::new();
        out.insert("asset".into(), json!(self.asset));
        out.insert("interval".into(), json!(self.interval.code()));
        out.insert(
            "start".into(),
            json!({"ts_unix": self.start.timestamp(), "ts_iso": iso(self.start)}),
        );
        out.insert(
            "end".into(),
            json!({"ts_unix": self.end.timestamp(), "ts_iso": iso(self.end)}),
        );
        out.insert("gaps_found".into(), json!(self.gaps_found()));
        out.insert("gap_count".into(), json!(self.gap_count()));
        out.insert(
            "total_missing_candles".into(),
            json!(self.total_missing_candles()),
        );
        out.insert(
            "gaps".into(),
            Value::Array(self.gaps.iter().map(Gap::to_json).collect()),
        );

        if let Some(first) = self.first_gap() {
            out.insert("first_gap".into(), first.to_json());
            if let Some(last) = self.last_gap().filter(|last| *last != first) {
                out.insert("last_gap".into(), last.to_json());
            }
        }

        Value::Object(out)
    }
}

impl Serialize for GapReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_dict().serialize(serializer)
    }
}

/// Reads existing open times through the store and runs gap detection.
#[derive(Clone)]
pub struct CompletenessChecker {
    store: Arc<dyn CandleStore>,
}

impl CompletenessChecker {
    pub fn new(store: Arc<dyn CandleStore>) -> Self {
        Self { store }
    }

    pub async fn generate_report(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GapReport, CompletenessError> {
        let existing = self
            .store
            .existing_open_times(asset, interval, interval.floor(start), end)
            .await?;
        let gaps = detect_gaps(&existing, interval.seconds(), start, end);

        debug!(
            asset,
            interval = %interval,
            existing = existing.len(),
            gaps = gaps.len(),
            "Generated gap report"
        );

        Ok(GapReport {
            asset: asset.to_string(),
            interval,
            start,
            end,
            gaps,
        })
    }

    /// Fail with [`CompletenessError::DataIncomplete`] when any gap exists.
    pub async fn ensure_no_gaps(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GapReport, CompletenessError> {
        let report = self.generate_report(asset, interval, start, end).await?;
        if report.gaps_found() {
            warn!(
                asset,
                interval = %interval,
                gap_count = report.gap_count(),
                missing = report.total_missing_candles(),
                "Data completeness check failed"
            );
            return Err(CompletenessError::DataIncomplete(Box::new(report)));
        }
        Ok(report)
    }
}
