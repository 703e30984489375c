//! Store invariant findings (uniqueness, key ordering, alignment)

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateFinding {
    pub asset: String,
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingFinding {
    pub asset: String,
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub prev_open_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentFinding {
    pub asset: String,
    pub interval: String,
    pub open_time: DateTime<Utc>,
}

/// Everything a store-wide invariant scan turned up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvariantFindings {
    pub duplicates: Vec<DuplicateFinding>,
    pub non_monotonic: Vec<OrderingFinding>,
    pub misaligned: Vec<AlignmentFinding>,
}

impl InvariantFindings {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.non_monotonic.is_empty() && self.misaligned.is_empty()
    }

    pub fn total(&self) -> usize {
        self.duplicates.len() + self.non_monotonic.len() + self.misaligned.len()
    }

    /// In strict mode any finding becomes an error; otherwise findings pass through.
    pub fn enforce(self, strict: bool) -> Result<Self, StoreError> {
        if strict && !self.is_clean() {
            return Err(StoreError::InvariantViolation(self));
        }
        Ok(self)
    }
}

impl fmt::Display for InvariantFindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "duplicates={} non_monotonic={} misaligned={}",
            self.duplicates.len(),
            self.non_monotonic.len(),
            self.misaligned.len()
        )?;
        if let Some(d) = self.duplicates.first() {
            write!(
                f,
                "; first duplicate ({}, {}, {}) x{}",
                d.asset,
                d.interval,
                d.open_time.to_rfc3339(),
                d.count
            )?;
        }
        if let Some(o) = self.non_monotonic.first() {
            write!(
                f,
                "; first out-of-order ({}, {}) {} after {}",
                o.asset,
                o.interval,
                o.open_time.to_rfc3339(),
                o.prev_open_time.to_rfc3339()
            )?;
        }
        if let Some(m) = self.misaligned.first() {
            write!(
                f,
                "; first misaligned ({}, {}, {})",
                m.asset,
                m.interval,
                m.open_time.to_rfc3339()
            )?;
        }
        Ok(())
    }
}
