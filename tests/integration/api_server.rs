//! Integration tests for the HTTP surface
//!
//! Tests health, readiness, metrics and the completeness gate.


use serde_json::Value;

use test_utils::TestApiServer;

#[tokio::test]
async fn health_endpoint_reports_healthy_status() {
    let app = TestApiServer::new().await;
    let response = app.server.get("/health").await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["uptime_seconds"].as_u64().is_some());
    assert_eq!(body["service"], "candlekeep");
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_metrics() {
    let app = TestApiServer::new().await;
    for _ in 0..3 {
        let _ = app.server.get("/health").await;
    }

    let response = app.server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);

    let body = response.text();
    assert!(body.contains("http_requests_total 3"), "Expected three counted requests");
    assert!(body.contains("http_request_duration_seconds"));
    assert!(body.contains("http_requests_in_flight"));
    assert!(body.contains("database_connected"));
}

#[tokio::test]
async fn readiness_without_scheduler_is_unavailable() {
    let app = TestApiServer::new().await;
    let response = app.server.get("/ready").await;
    assert_eq!(response.status_code(), 503);

    let body: Value = response.json();
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn readiness_with_running_scheduler_is_ok() {
    let app = TestApiServer::with_scheduler().await;
    let response = app.server.get("/ready").await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["ready"], true);
    assert_eq!(body["readiness"]["stale_count"], 0);
    assert_eq!(body["scheduler"]["running"], true);
    assert_eq!(body["scheduler"]["jobs"], 1);
    assert!(body["scheduler"]["per_job"]["ingest:bitcoin:1m"].is_object());

    app.shutdown().await;
}

#[tokio::test]
async fn completeness_passes_for_full_coverage() {
    let app = TestApiServer::new().await;
    app.seed_minutes("bitcoin", &[0, 1, 2]).await;

    let response = app
        .server
        .get("/api/completeness")
        .add_query_param("asset", "bitcoin")
        .add_query_param("interval", "1m")
        .add_query_param("start", "2024-01-01T00:00:00Z")
        .add_query_param("end", "2024-01-01T00:03:00Z")
        .await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["gaps_found"], false);
    assert_eq!(body["gap_count"], 0);
}

#[tokio::test]
async fn completeness_reports_gaps_as_unprocessable() {
    let app = TestApiServer::new().await;
    app.seed_minutes("bitcoin", &[0, 2]).await;

    let response = app
        .server
        .get("/api/completeness")
        .add_query_param("asset", "bitcoin")
        .add_query_param("interval", "1m")
        .add_query_param("start", "1704067200")
        .add_query_param("end", "1704067380")
        .await;
    assert_eq!(response.status_code(), 422);

    let body: Value = response.json();
    assert_eq!(body["error"], "data_incomplete");
    assert_eq!(body["report"]["gap_count"], 1);
    assert_eq!(body["report"]["total_missing_candles"], 1);
    assert_eq!(body["report"]["first_gap"]["start_ts_iso"], "2024-01-01T00:01:00Z");
}

#[tokio::test]
async fn completeness_rejects_bad_parameters() {
    let app = TestApiServer::new().await;

    let response = app
        .server
        .get("/api/completeness")
        .add_query_param("asset", "bitcoin")
        .add_query_param("interval", "7m")
        .add_query_param("start", "2024-01-01")
        .add_query_param("end", "2024-01-02")
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"], "bad_request");

    let response = app
        .server
        .get("/api/completeness")
        .add_query_param("asset", "bitcoin")
        .add_query_param("interval", "1m")
        .add_query_param("start", "2024-01-02")
        .add_query_param("end", "2024-01-01")
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn completeness_without_store_is_unavailable() {
    let app = TestApiServer::bare().await;
    let response = app
        .server
        .get("/api/completeness")
        .add_query_param("asset", "bitcoin")
        .add_query_param("interval", "1m")
        .add_query_param("start", "2024-01-01")
        .add_query_param("end", "2024-01-02")
        .await;
    assert_eq!(response.status_code(), 503);

    let body: Value = response.json();
    assert_eq!(body["error"], "store_unavailable");
}
