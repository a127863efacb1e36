//! HTTP API for health checks, metrics and planner queries

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use planner_lib::{
    health::ComponentStatus, observability::EngineMetrics, JobRequirement, PlannerEngine,
    PlannerError,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PlannerEngine>,
    pub metrics: EngineMetrics,
}

impl AppState {
    pub fn new(engine: Arc<PlannerEngine>, metrics: EngineMetrics) -> Self {
        Self { engine, metrics }
    }
}

fn error_response(error: PlannerError) -> Response {
    let status = match &error {
        PlannerError::UnknownStrategy(_) => StatusCode::BAD_REQUEST,
        PlannerError::NoFeasibleQueue { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PlannerError::TelemetryUnavailable(_) | PlannerError::Sensing { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// 200 while healthy or degraded, 503 when a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.engine.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.engine.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn report(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.report().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn exhaustion(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.predict_exhaustion().await)
}

async fn storage_failure(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.predict_storage_failure().await)
}

#[derive(Debug, Deserialize)]
pub struct ChunkSizeQuery {
    pub total_items: usize,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "balanced".to_string()
}

async fn chunk_size(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChunkSizeQuery>,
) -> Response {
    match state
        .engine
        .decide_chunk_size(query.total_items, &query.strategy)
        .await
    {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => error_response(e),
    }
}

async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(requirement): Json<JobRequirement>,
) -> Response {
    match state.engine.allocate(&requirement).await {
        Ok(allocation) => Json(allocation).into_response(),
        Err(e) => error_response(e),
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/report", get(report))
        .route("/exhaustion", get(exhaustion))
        .route("/storage-failure", get(storage_failure))
        .route("/chunk-size", get(chunk_size))
        .route("/allocate", post(allocate))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
