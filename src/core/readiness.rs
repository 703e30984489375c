//! Stall detection over the scheduler status snapshot

use crate::core::scheduler::SchedulerStatus;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_STALL_MULTIPLIER: f64 = 2.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReadiness {
    pub job_id: String,
    pub asset: String,
    pub interval: String,
    pub schedule_s: u64,
    pub allowed_age_s: Option<f64>,
    pub age_s: Option<f64>,
    /// Which timestamp the age was measured from.
    pub ref_ts_key: Option<String>,
    pub stalled: bool,
    pub stalled_by_s: f64,
    pub never_succeeded: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub running: bool,
    pub stall_multiplier: f64,
    pub computed_at_ts: f64,
    pub stale_count: usize,
    pub jobs: Vec<JobReadiness>,
    pub stale_jobs: Vec<JobReadiness>,
}

/// Mark jobs whose last success is older than `multiplier × schedule_s`.
///
/// The age reference falls back from the last success to the last run and then
/// to the scheduler start. `now` is unix seconds.
pub fn annotate_stalls(status: &SchedulerStatus, now: f64, multiplier: f64) -> ReadinessReport {
    let multiplier = if multiplier.is_finite() && multiplier > 0.0 {
        multiplier
    } else {
        DEFAULT_STALL_MULTIPLIER
    };
    let started_at = status.meta.as_ref().map(|m| m.started_at);

    let jobs: Vec<JobReadiness> = status
        .per_job
        .iter()
        .map(|(job_id, job)| {
            let allowed_age_s = (job.schedule_s > 0).then(|| job.schedule_s as f64 * multiplier);

            let reference = job
                .last_success_ts
                .map(|ts| (ts, "last_success_ts"))
                .or_else(|| job.last_run_ts.map(|ts| (ts, "last_run_ts")))
                .or_else(|| started_at.map(|ts| (ts, "meta.started_at")));

            let age_s = reference.map(|(ts, _)| (now - ts).max(0.0));
            let stalled_by_s = match (age_s, allowed_age_s) {
                (Some(age), Some(allowed)) if age > allowed => age - allowed,
                _ => 0.0,
            };

            JobReadiness {
                job_id: job_id.clone(),
                asset: job.asset.clone(),
                interval: job.interval.clone(),
                schedule_s: job.schedule_s,
                allowed_age_s,
                age_s,
                ref_ts_key: reference.map(|(_, key)| key.to_string()),
                stalled: stalled_by_s > 0.0,
                stalled_by_s,
                never_succeeded: job.last_success_ts.is_none(),
                consecutive_failures: job.consecutive_failures,
                last_error: job.last_error.clone(),
            }
        })
        .collect();

    let mut stale_jobs: Vec<JobReadiness> = jobs.iter().filter(|j| j.stalled).cloned().collect();
    stale_jobs.sort_by(|a, b| {
        b.stalled_by_s
            .partial_cmp(&a.stalled_by_s)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });

    ReadinessReport {
        ready: status.running && stale_jobs.is_empty(),
        running: status.running,
        stall_multiplier: multiplier,
        computed_at_ts: now,
        stale_count: stale_jobs.len(),
        jobs,
        stale_jobs,
    }
}
