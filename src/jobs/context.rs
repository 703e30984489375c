//! Job context for dependency injection

use crate::ingestion::CandleIngestor;
use crate::metrics::Metrics;
use std::sync::Arc;

/// Shared by every scheduled job task.
///
/// Jobs never talk to the feed directly; they only turn stored samples into
/// candles through the ingestor.
pub struct JobContext {
    pub ingestor: Arc<dyn CandleIngestor>,
    pub metrics: Option<Arc<Metrics>>,
}

impl JobContext {
    pub fn new(ingestor: Arc<dyn CandleIngestor>, metrics: Option<Arc<Metrics>>) -> Self {
        Self { ingestor, metrics }
    }
}
