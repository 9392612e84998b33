//! The observability surface (spec.md §6): liveness/readiness, a
//! per-pool stats list, recent warnings, and the in-flight tracker
//! snapshot. Management/auth endpoints belong to the identity platform
//! this engine doesn't own and aren't reproduced here.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{http::StatusCode, Json, Router};
use serde::Serialize;

use crate::health::build_health_report;
use crate::manager::QueueManager;
use crate::warning::SharedWarnings;

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<QueueManager>,
    pub warnings: SharedWarnings,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz/live", get(live))
        .route("/healthz/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/pools", get(pools))
        .route("/warnings", get(warnings))
        .route("/in-flight", get(in_flight))
        .with_state(state)
}

async fn live() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let report = build_health_report(&state.manager);
    let status = match report.status {
        crate::health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

#[derive(Serialize)]
struct MetricsSnapshot {
    in_flight_count: u32,
    pools: Vec<waypoint_core::PoolStats>,
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let pools = state
        .manager
        .pool_snapshot()
        .iter()
        .map(|p| p.stats())
        .collect();
    Json(MetricsSnapshot {
        in_flight_count: state.manager.in_flight_count(),
        pools,
    })
}

async fn pools(State(state): State<ApiState>) -> impl IntoResponse {
    let stats: Vec<waypoint_core::PoolStats> = state
        .manager
        .pool_snapshot()
        .iter()
        .map(|p| p.stats())
        .collect();
    Json(stats)
}

async fn warnings(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.warnings.recent(200))
}

async fn in_flight(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.manager.in_flight_snapshot())
}
