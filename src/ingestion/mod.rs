pub mod backfill;
pub mod candles;
pub mod completeness;
pub mod gaps;

pub use backfill::{BackfillCaps, BackfillExecutor, BackfillResult, CapsHit, StopReason};
pub use candles::{bucket_samples, CandleIngestor, SampleIngestor};
pub use completeness::{CompletenessChecker, GapReport};
pub use gaps::{detect_gaps, Gap};
