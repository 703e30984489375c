//! Job handler for scheduled candle ingestion

use crate::core::scheduler::SchedulerState;
use crate::error::IngestError;
use crate::jobs::context::JobContext;
use crate::jobs::types::JobSpec;
use chrono::Utc;
use std::time::Instant;
use tracing::{error, info};

/// Run one ingestion pass for a job and record the outcome.
///
/// The caller holds the job's guard. A failure is recorded and returned but is
/// never fatal to the scheduler.
pub async fn run_ingest_job(
    ctx: &JobContext,
    spec: &JobSpec,
    state: &SchedulerState,
) -> Result<u64, IngestError> {
    state
        .update_record(&spec.job_id, |record| record.begin_run(Utc::now()))
        .await;
    info!(job_id = %spec.job_id, "Ingest job running");

    let start = Instant::now();
    let result = ctx.ingestor.ingest_latest(&spec.asset, spec.interval).await;
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;

    match &result {
        Ok(inserted) => {
            let inserted = *inserted;
            state
                .update_record(&spec.job_id, |record| {
                    record.succeed(Utc::now(), inserted, elapsed_ms)
                })
                .await;
            if let Some(metrics) = &ctx.metrics {
                metrics.record_job_success(&spec.job_id, inserted, elapsed.as_secs_f64());
            }
            info!(
                job_id = %spec.job_id,
                inserted,
                duration_ms = elapsed_ms,
                "Ingest job done"
            );
        }
        Err(e) => {
            let message = e.to_string();
            let failures = state
                .update_record(&spec.job_id, |record| {
                    record.fail(Utc::now(), &message);
                    record.consecutive_failures
                })
                .await
                .unwrap_or(1);
            if let Some(metrics) = &ctx.metrics {
                metrics.record_job_failure(&spec.job_id, failures, elapsed.as_secs_f64());
            }
            error!(
                job_id = %spec.job_id,
                error = %e,
                consecutive_failures = failures,
                duration_ms = elapsed_ms,
                "Ingest job failed"
            );
        }
    }

    result
}
