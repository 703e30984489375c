//! HTTP endpoint server using Axum

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use crate::core::readiness::{annotate_stalls, DEFAULT_STALL_MULTIPLIER};
use crate::core::scheduler::SchedulerHandle;
use crate::db::CandleStore;
use crate::error::CompletenessError;
use crate::ingestion::CompletenessChecker;
use crate::jobs::types::epoch_seconds;
use crate::metrics::Metrics;
use crate::models::{parse_timestamp, Interval};

const SERVICE_NAME: &str = "candlekeep";

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<RwLock<HealthStatus>>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub store: Option<Arc<dyn CandleStore>>,
    pub scheduler: Option<SchedulerHandle>,
    pub stall_multiplier: f64,
}

impl AppState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            health: Arc::new(RwLock::new(HealthStatus::default())),
            metrics,
            start_time: Arc::new(Instant::now()),
            store: None,
            scheduler: None,
            stall_multiplier: DEFAULT_STALL_MULTIPLIER,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CandleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_stall_multiplier(mut self, multiplier: f64) -> Self {
        self.stall_multiplier = multiplier;
        self
    }
}

#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.read().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();
    Ok(Json(json!({
        "status": health.status,
        "uptime_seconds": uptime_seconds,
        "service": SERVICE_NAME
    })))
}

/// 200 when the scheduler runs and no job is stalled, 503 otherwise.
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let Some(scheduler) = &state.scheduler else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ready": false, "reason": "scheduler not attached"})),
        )
            .into_response();
    };

    let status = scheduler.status().await;
    let report = annotate_stalls(&status, epoch_seconds(Utc::now()), state.stall_multiplier);
    let code = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "ready": report.ready,
            "readiness": report,
            "scheduler": status,
        })),
    )
        .into_response()
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
pub struct CompletenessQuery {
    asset: String,
    interval: String,
    start: String,
    end: String,
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "bad_request", "message": message})),
    )
}

/// Completeness gate for `[start, end)`; 422 carries the gap report.
pub async fn completeness_check(
    State(state): State<AppState>,
    Query(params): Query<CompletenessQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let store = state.store.clone().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "store_unavailable"})),
    ))?;

    let interval = Interval::parse(&params.interval).map_err(|e| bad_request(e.to_string()))?;
    let start = parse_timestamp(&params.start)
        .ok_or_else(|| bad_request(format!("invalid start '{}'", params.start)))?;
    let end = parse_timestamp(&params.end)
        .ok_or_else(|| bad_request(format!("invalid end '{}'", params.end)))?;
    if start >= end {
        return Err(bad_request("start must be before end".to_string()));
    }

    let checker = CompletenessChecker::new(store);
    match checker
        .ensure_no_gaps(&params.asset, interval, start, end)
        .await
    {
        Ok(report) => Ok(Json(report.to_dict())),
        Err(CompletenessError::DataIncomplete(report)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "data_incomplete", "report": report.to_dict()})),
        )),
        Err(e) => {
            error!(error = %e, asset = %params.asset, "Completeness check failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal", "message": e.to_string()})),
            ))
        }
    }
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();

    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();

    state.metrics.http_requests_in_flight.dec();
    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/completeness", get(completeness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
