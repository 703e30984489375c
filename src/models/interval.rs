//! Candle interval codes and boundary arithmetic

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SUPPORTED_INTERVALS: [(&str, i64); 10] = [
    ("1m", 60),
    ("3m", 180),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1_800),
    ("1h", 3_600),
    ("2h", 7_200),
    ("4h", 14_400),
    ("1d", 86_400),
    ("1w", 604_800),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported interval '{0}'")]
pub struct IntervalError(pub String);

/// A fixed candle step such as `5m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    seconds: i64,
    code: &'static str,
}

impl Interval {
    pub fn parse(code: &str) -> Result<Self, IntervalError> {
        let trimmed = code.trim();
        SUPPORTED_INTERVALS
            .iter()
            .find(|(c, _)| *c == trimmed)
            .map(|(code, seconds)| Self {
                code,
                seconds: *seconds,
            })
            .ok_or_else(|| IntervalError(code.to_string()))
    }

    /// All supported intervals, shortest first.
    pub fn all() -> impl Iterator<Item = Interval> {
        SUPPORTED_INTERVALS
            .iter()
            .map(|(code, seconds)| Self {
                code,
                seconds: *seconds,
            })
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Floor a timestamp to the boundary at or before it.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        floor_to_step(ts, self.seconds)
    }

    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.seconds) == 0
    }
}

/// Floor `ts` to a multiple of `step_seconds` since the epoch.
///
/// Sub-second precision is dropped. A non-positive step returns the
/// timestamp truncated to whole seconds.
pub fn floor_to_step(ts: DateTime<Utc>, step_seconds: i64) -> DateTime<Utc> {
    let epoch = ts.timestamp();
    let floored = if step_seconds > 0 {
        epoch - epoch.rem_euclid(step_seconds)
    } else {
        epoch
    };
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Interval::parse(&code).map_err(serde::de::Error::custom)
    }
}
