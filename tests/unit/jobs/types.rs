//! Unit tests for job records

use crate::fixtures::{interval, minute};
use candlekeep::jobs::types::{iso_z, truncate_error, JobRecord, JobSpec, JobState, MAX_ERROR_LEN};

#[test]
fn job_id_is_derived_from_asset_and_interval() {
    let spec = JobSpec::new("bitcoin", interval("15m"));
    assert_eq!(spec.job_id, "ingest:bitcoin:15m");
}

#[test]
fn success_resets_failures() {
    let mut record = JobRecord::new(JobSpec::new("bitcoin", interval("1m")), 30);
    record.begin_run(minute(0));
    assert_eq!(record.state, JobState::Running);

    record.fail(minute(0), "feed down");
    record.fail(minute(1), "feed down");
    assert_eq!(record.consecutive_failures, 2);
    assert_eq!(record.state, JobState::Idle);

    record.succeed(minute(2), 7, 120);
    assert_eq!(record.consecutive_failures, 0);
    assert_eq!(record.last_success_inserted, Some(7));
    // The last error stays visible after recovery
    assert_eq!(record.last_error.as_deref(), Some("feed down"));
}

#[test]
fn long_errors_are_truncated() {
    let long = "x".repeat(MAX_ERROR_LEN * 2);
    assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LEN);

    let mut record = JobRecord::new(JobSpec::new("bitcoin", interval("1m")), 30);
    record.fail(minute(0), &long);
    assert_eq!(record.last_error.unwrap().len(), MAX_ERROR_LEN);
}

#[test]
fn status_uses_epoch_seconds_and_iso() {
    let mut record = JobRecord::new(JobSpec::new("bitcoin", interval("1m")), 30);
    record.begin_run(minute(0));
    record.succeed(minute(1), 3, 15);

    let status = record.status();
    assert_eq!(status.last_run_ts, Some(minute(0).timestamp() as f64));
    assert_eq!(status.last_success_iso.as_deref(), Some("2024-01-01T00:01:00.000Z"));
    assert_eq!(iso_z(minute(0)), "2024-01-01T00:00:00.000Z");

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["state"], "idle");
    assert_eq!(json["interval"], "1m");
    assert_eq!(json["last_success_inserted"], 3);
}
