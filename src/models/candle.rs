use crate::models::interval::Interval;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a candle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CandleSource {
    /// Bucketed locally from raw price samples.
    #[default]
    Local,
    /// Taken as-is from an external candle source.
    External,
}

impl CandleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleSource::Local => "local",
            CandleSource::External => "external",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "external" => CandleSource::External,
            _ => CandleSource::Local,
        }
    }
}

/// Identity of a stored candle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandleKey {
    pub asset: String,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
}

impl fmt::Display for CandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.asset,
            self.interval,
            self.open_time.to_rfc3339()
        )
    }
}

/// Write shape accepted by the candle store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRow {
    pub asset: String,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub source: CandleSource,
}

impl CandleRow {
    pub fn new(
        asset: impl Into<String>,
        interval: Interval,
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self {
            asset: asset.into(),
            interval,
            open_time,
            open,
            high,
            low,
            close,
            volume: None,
            source: CandleSource::Local,
        }
    }

    /// Flat candle at a single price, handy for fills and fixtures.
    pub fn flat(asset: impl Into<String>, interval: Interval, open_time: DateTime<Utc>, price: f64) -> Self {
        Self::new(asset, interval, open_time, price, price, price, price)
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_source(mut self, source: CandleSource) -> Self {
        self.source = source;
        self
    }

    pub fn key(&self) -> CandleKey {
        CandleKey {
            asset: self.asset.clone(),
            interval: self.interval,
            open_time: self.open_time,
        }
    }
}

/// A persisted candle with provenance timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(flatten)]
    pub row: CandleRow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candle {
    pub fn open_time(&self) -> DateTime<Utc> {
        self.row.open_time
    }

    pub fn key(&self) -> CandleKey {
        self.row.key()
    }
}
