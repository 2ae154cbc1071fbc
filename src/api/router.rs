//! Router assembly for the operator API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::admin::{
    list_deposits_handler, list_sweeps_handler, list_users_handler, requeue_failed_handler,
    requeue_sweep_handler, stats_handler,
};
use super::handlers::{
    health_check_handler, liveness_handler, openapi_handler, readiness_handler,
};
use crate::app::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the operator router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/admin/stats", get(stats_handler))
        .route("/admin/deposits", get(list_deposits_handler))
        .route("/admin/users", get(list_users_handler))
        .route("/admin/sweeps", get(list_sweeps_handler))
        .route("/admin/sweeps/requeue-failed", post(requeue_failed_handler))
        .route("/admin/sweeps/{id}/requeue", post(requeue_sweep_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        // Innermost, so the timeout wraps axum's own response body
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
