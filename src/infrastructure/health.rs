//! Minimal admin/health HTTP surface: `/health`, `/ready`, `/metrics`.
//!
//! The teacher's own `observability` module is push-only and deliberately
//! carries no HTTP server; this pull surface is sourced instead from the
//! `axum` usage attested elsewhere in the broader example pack for exposing
//! Prometheus text format and liveness/readiness endpoints.

use crate::infrastructure::observability::Metrics;
use crate::infrastructure::router::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router as AxumRouter;
use std::sync::Arc;

#[derive(Clone)]
struct HealthState {
    metrics: Arc<Metrics>,
    router: Arc<Router>,
}

pub fn build(metrics: Arc<Metrics>, router: Arc<Router>) -> AxumRouter {
    let state = HealthState { metrics, router };
    AxumRouter::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Ready once the Router has at least observed one agent registration.
/// A freshly started process with an empty registry is intentionally "not
/// ready" so a load balancer doesn't route traffic before agents attach.
async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    if state.router.agent_count().await == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "no agents registered")
    } else {
        (StatusCode::OK, "ready")
    }
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
