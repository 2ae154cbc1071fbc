//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;
use utoipa::OpenApi;

use super::admin::{
    self, DepositListParams, DepositListResponse, DepositView, LedgerStatsResponse,
    RequeueFailedResponse, RequeueResponse, SweepJobView, SweepListParams, SweepListResponse,
    UserBindingView, UserListParams, UserListResponse,
};
use crate::app::AppState;
use crate::domain::{
    AppError, BlockchainError, DatabaseError, DepositStatus, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, SweepStatus,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Deposit Sweeper Operator API",
        version = "0.1.0",
        description = "Operator endpoints for the custodial token deposit and sweep pipeline",
        license(
            name = "MIT"
        )
    ),
    paths(
        health_check_handler,
        liveness_handler,
        readiness_handler,
        admin::stats_handler,
        admin::list_deposits_handler,
        admin::list_users_handler,
        admin::list_sweeps_handler,
        admin::requeue_sweep_handler,
        admin::requeue_failed_handler,
    ),
    components(
        schemas(
            HealthResponse,
            HealthStatus,
            DepositStatus,
            SweepStatus,
            LedgerStatsResponse,
            DepositView,
            DepositListParams,
            DepositListResponse,
            UserBindingView,
            UserListParams,
            UserListResponse,
            SweepJobView,
            SweepListParams,
            SweepListResponse,
            RequeueResponse,
            RequeueFailedResponse,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "admin", description = "Ledger listings and sweep job management")
    )
)]
pub struct ApiDoc;

/// Health check with ledger and node status
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy or degraded", body = HealthResponse),
        (status = 503, description = "Ledger database unavailable", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.service.health_check().await;
    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Process is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Ready to serve traffic"),
        (status = 503, description = "Not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Serve the OpenAPI document
pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "database_error")
                }
                DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::Connection(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "blockchain_error")
                }
                BlockchainError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                _ => (StatusCode::BAD_GATEWAY, "blockchain_error"),
            },
            AppError::Wallet(_) => (StatusCode::INTERNAL_SERVER_ERROR, "wallet_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, "not_supported"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ValidationError, WalletError};

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                AppError::Database(DatabaseError::NotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Database(DatabaseError::Connection("x".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::Validation(ValidationError::MissingField("status".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Blockchain(BlockchainError::Timeout("x".into())),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                AppError::Wallet(WalletError::InvalidKey("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_openapi_lists_admin_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/admin/stats"));
        assert!(doc.paths.paths.contains_key("/admin/sweeps"));
        assert!(doc.paths.paths.contains_key("/admin/sweeps/{id}/requeue"));
        assert!(doc.paths.paths.contains_key("/admin/sweeps/requeue-failed"));
        assert!(doc.paths.paths.contains_key("/admin/deposits"));
        assert!(doc.paths.paths.contains_key("/admin/users"));
    }
}
