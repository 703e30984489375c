//! Shared data models spanning the ingestion layers.

pub mod candle;
pub mod interval;
pub mod sample;
pub mod time;

pub use candle::{Candle, CandleKey, CandleRow, CandleSource};
pub use interval::{floor_to_step, Interval, IntervalError};
pub use sample::PriceSample;
pub use time::{days_before, parse_timestamp};
