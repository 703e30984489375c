//! Unit tests for interval parsing and boundary arithmetic

use crate::fixtures::{interval, ts, BASE_EPOCH};
use candlekeep::models::{days_before, floor_to_step, Interval};
use chrono::Duration;

#[test]
fn parses_supported_codes() {
    assert_eq!(interval("1m").seconds(), 60);
    assert_eq!(interval("15m").seconds(), 900);
    assert_eq!(interval("4h").seconds(), 14_400);
    assert_eq!(interval("1d").seconds(), 86_400);
    assert_eq!(Interval::parse(" 5m ").unwrap().code(), "5m");
}

#[test]
fn rejects_unknown_codes() {
    let err = Interval::parse("7m").unwrap_err();
    assert_eq!(err.to_string(), "unsupported interval '7m'");
    assert!("".parse::<Interval>().is_err());
}

#[test]
fn floor_snaps_to_previous_boundary() {
    let five = interval("5m");
    assert_eq!(five.floor(ts(BASE_EPOCH + 299)), ts(BASE_EPOCH));
    assert_eq!(five.floor(ts(BASE_EPOCH + 300)), ts(BASE_EPOCH + 300));
    assert_eq!(floor_to_step(ts(BASE_EPOCH + 61), 60), ts(BASE_EPOCH + 60));
}

#[test]
fn floor_handles_pre_epoch_timestamps() {
    assert_eq!(floor_to_step(ts(-1), 60), ts(-60));
}

#[test]
fn alignment_check() {
    let hour = interval("1h");
    assert!(hour.is_aligned(ts(BASE_EPOCH)));
    assert!(!hour.is_aligned(ts(BASE_EPOCH + 60)));
}

#[test]
fn serializes_as_code() {
    let json = serde_json::to_string(&interval("15m")).unwrap();
    assert_eq!(json, "\"15m\"");
    let back: Interval = serde_json::from_str(&json).unwrap();
    assert_eq!(back, interval("15m"));
    assert!(serde_json::from_str::<Interval>("\"9x\"").is_err());
}

#[test]
fn days_before_is_range_checked() {
    let end = ts(BASE_EPOCH);
    assert_eq!(days_before(end, 2), Some(end - Duration::days(2)));
    assert_eq!(days_before(end, i64::MAX), None);
    // Representable as a span, but far past chrono's earliest date
    assert_eq!(days_before(end, 1_000_000_000), None);
}
