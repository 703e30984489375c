//! Missing-boundary detection over a candle range

use crate::models::floor_to_step;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};

/// A maximal run of missing boundaries, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub missing_candles: i64,
}

impl Gap {
    pub fn to_json(&self) -> Value {
        json!({
            "start_ts_unix": self.start.timestamp(),
            "start_ts_iso": iso(self.start),
            "end_ts_unix": self.end.timestamp(),
            "end_ts_iso": iso(self.end),
            "missing_candles": self.missing_candles,
        })
    }
}

pub(crate) fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn at(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_default()
}

/// Compute the missing sub-ranges of `[range_start, range_end)`.
///
/// `range_start` and every existing timestamp are floored to the step before
/// comparison. Boundaries are walked while below `range_end` and each gap's
/// end is clamped to `range_end`. `missing_candles` counts walked boundaries,
/// so a partial bucket before an unaligned `range_end` counts as one candle.
pub fn detect_gaps(
    existing: &BTreeSet<DateTime<Utc>>,
    step_seconds: i64,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Vec<Gap> {
    if step_seconds <= 0 || range_start >= range_end {
        return Vec::new();
    }

    let present: HashSet<i64> = existing
        .iter()
        .map(|ts| floor_to_step(*ts, step_seconds).timestamp())
        .collect();

    let end = range_end;
    let mut cursor = floor_to_step(range_start, step_seconds).timestamp();
    let mut gaps = Vec::new();

    while at(cursor) < end {
        if present.contains(&cursor) {
            cursor += step_seconds;
            continue;
        }

        let gap_start = cursor;
        let mut missing = 0i64;
        while at(cursor) < end && !present.contains(&cursor) {
            missing += 1;
            cursor += step_seconds;
        }

        gaps.push(Gap {
            start: at(gap_start),
            end: at(cursor).min(end),
            missing_candles: missing,
        });
    }

    gaps
}
