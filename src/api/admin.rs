//! Admin API handlers for ledger statistics, deposit and user listings,
//! and sweep job management.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::{
    AppError, Deposit, DepositStatus, LedgerStats, SweepJob, SweepStatus, UserBinding,
    ValidationError, format_token_amount,
};

fn default_limit() -> i64 {
    50
}

/// Parse an optional status filter; an empty value means no filter
fn parse_status_filter<T>(raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>().map_err(|message| {
                AppError::Validation(ValidationError::InvalidField {
                    field: "status".to_string(),
                    message,
                })
            })
        })
        .transpose()
}

/// Query parameters for sweep history
#[derive(Debug, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SweepListParams {
    /// Filter by status: pending, sent or failed
    pub status: Option<String>,
    /// Maximum number of jobs to return (1-500, default: 50)
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Query parameters for the deposit listing
#[derive(Debug, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DepositListParams {
    /// Filter by status: pending, completed or failed
    pub status: Option<String>,
    /// Maximum number of deposits to return (1-500, default: 50)
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Query parameters for the user listing
#[derive(Debug, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListParams {
    /// Maximum number of users to return (1-500, default: 50)
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Aggregate ledger counters. Amounts are decimal strings in token units.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LedgerStatsResponse {
    pub total_users: u64,
    pub pending_deposits: u64,
    pub completed_deposits: u64,
    pub failed_deposits: u64,
    #[schema(example = "1250.5")]
    pub total_deposited: String,
    pub pending_sweeps: u64,
    pub sent_sweeps: u64,
    pub failed_sweeps: u64,
    #[schema(example = "1200.0")]
    pub total_swept: String,
    pub last_processed_block: Option<u64>,
    pub token_decimals: u8,
}

impl LedgerStatsResponse {
    #[must_use]
    pub fn new(stats: LedgerStats, decimals: u8) -> Self {
        Self {
            total_users: stats.total_users,
            pending_deposits: stats.pending_deposits,
            completed_deposits: stats.completed_deposits,
            failed_deposits: stats.failed_deposits,
            total_deposited: format_token_amount(stats.total_deposited, decimals),
            pending_sweeps: stats.pending_sweeps,
            sent_sweeps: stats.sent_sweeps,
            failed_sweeps: stats.failed_sweeps,
            total_swept: format_token_amount(stats.total_swept, decimals),
            last_processed_block: stats.last_processed_block,
            token_decimals: decimals,
        }
    }
}

/// Sweep job as shown to operators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SweepJobView {
    pub id: Uuid,
    pub deposit_tx_hash: String,
    pub user_id: String,
    pub child_address: String,
    /// Credited amount in token units
    pub amount: String,
    pub status: SweepStatus,
    pub gas_topup_tx_hash: Option<String>,
    pub sweep_tx_hash: Option<String>,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SweepJobView {
    #[must_use]
    pub fn new(job: SweepJob, decimals: u8) -> Self {
        Self {
            id: job.id,
            deposit_tx_hash: job.deposit_tx_hash.to_string(),
            user_id: job.user_id,
            child_address: job.child_address.to_checksum(None),
            amount: format_token_amount(job.amount, decimals),
            status: job.status,
            gas_topup_tx_hash: job.gas_topup_tx_hash.map(|h| h.to_string()),
            sweep_tx_hash: job.sweep_tx_hash.map(|h| h.to_string()),
            last_error: job.last_error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Detected deposit as shown to operators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DepositView {
    pub tx_hash: String,
    pub user_id: String,
    pub from_address: String,
    pub to_address: String,
    /// Amount in token units
    #[schema(example = "50.0")]
    pub amount: String,
    pub block_number: u64,
    pub confirmations: u64,
    pub status: DepositStatus,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl DepositView {
    #[must_use]
    pub fn new(deposit: Deposit, decimals: u8) -> Self {
        Self {
            tx_hash: deposit.tx_hash.to_string(),
            user_id: deposit.user_id,
            from_address: deposit.from_address.to_checksum(None),
            to_address: deposit.to_address.to_checksum(None),
            amount: format_token_amount(deposit.amount, decimals),
            block_number: deposit.block_number,
            confirmations: deposit.confirmations,
            status: deposit.status,
            failure_reason: deposit.failure_reason,
            created_at: deposit.created_at,
            updated_at: deposit.updated_at,
        }
    }
}

/// User binding without key material
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserBindingView {
    pub user_id: String,
    pub derivation_index: u32,
    pub deposit_address: String,
    /// Sum of completed deposits in token units
    pub credited_balance: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl UserBindingView {
    #[must_use]
    pub fn new(binding: UserBinding, decimals: u8) -> Self {
        Self {
            user_id: binding.user_id,
            derivation_index: binding.derivation_index,
            deposit_address: binding.address.to_checksum(None),
            credited_balance: format_token_amount(binding.credited_balance, decimals),
            created_at: binding.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DepositListResponse {
    pub count: usize,
    pub deposits: Vec<DepositView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub count: usize,
    pub users: Vec<UserBindingView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequeueFailedResponse {
    pub success: bool,
    /// Number of failed jobs moved back to pending
    pub requeued: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SweepListResponse {
    pub count: usize,
    pub jobs: Vec<SweepJobView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequeueResponse {
    pub success: bool,
    pub message: String,
    pub job: SweepJobView,
}

/// Ledger statistics
///
/// GET /admin/stats
#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "admin",
    responses(
        (status = 200, description = "Ledger counters", body = LedgerStatsResponse),
        (status = 503, description = "Ledger unavailable", body = crate::domain::ErrorResponse),
    )
)]
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LedgerStatsResponse>, AppError> {
    let stats = state.service.get_stats().await?;
    Ok(Json(LedgerStatsResponse::new(
        stats,
        state.service.token_decimals(),
    )))
}

/// Deposits across all users, newest first
///
/// GET /admin/deposits
#[utoipa::path(
    get,
    path = "/admin/deposits",
    tag = "admin",
    params(DepositListParams),
    responses(
        (status = 200, description = "Deposits", body = DepositListResponse),
        (status = 400, description = "Unknown status filter", body = crate::domain::ErrorResponse),
    )
)]
pub async fn list_deposits_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DepositListParams>,
) -> Result<Json<DepositListResponse>, AppError> {
    let status = parse_status_filter::<DepositStatus>(params.status.as_deref())?;

    let decimals = state.service.token_decimals();
    let deposits: Vec<DepositView> = state
        .service
        .list_deposits(status, params.limit)
        .await?
        .into_iter()
        .map(|deposit| DepositView::new(deposit, decimals))
        .collect();

    Ok(Json(DepositListResponse {
        count: deposits.len(),
        deposits,
    }))
}

/// Provisioned users and their deposit addresses
///
/// GET /admin/users
#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "admin",
    params(UserListParams),
    responses(
        (status = 200, description = "User bindings", body = UserListResponse),
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserListParams>,
) -> Result<Json<UserListResponse>, AppError> {
    let decimals = state.service.token_decimals();
    let users: Vec<UserBindingView> = state
        .service
        .list_users(params.limit)
        .await?
        .into_iter()
        .map(|binding| UserBindingView::new(binding, decimals))
        .collect();

    Ok(Json(UserListResponse {
        count: users.len(),
        users,
    }))
}

/// Sweep job history, newest first
///
/// GET /admin/sweeps
#[utoipa::path(
    get,
    path = "/admin/sweeps",
    tag = "admin",
    params(SweepListParams),
    responses(
        (status = 200, description = "Sweep jobs", body = SweepListResponse),
        (status = 400, description = "Unknown status filter", body = crate::domain::ErrorResponse),
    )
)]
pub async fn list_sweeps_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SweepListParams>,
) -> Result<Json<SweepListResponse>, AppError> {
    let status = parse_status_filter::<SweepStatus>(params.status.as_deref())?;

    let decimals = state.service.token_decimals();
    let jobs: Vec<SweepJobView> = state
        .service
        .list_sweep_jobs(status, params.limit)
        .await?
        .into_iter()
        .map(|job| SweepJobView::new(job, decimals))
        .collect();

    Ok(Json(SweepListResponse {
        count: jobs.len(),
        jobs,
    }))
}

/// Move a failed sweep job back to pending
///
/// POST /admin/sweeps/{id}/requeue
#[utoipa::path(
    post,
    path = "/admin/sweeps/{id}/requeue",
    tag = "admin",
    params(
        ("id" = Uuid, Path, description = "Sweep job ID")
    ),
    responses(
        (status = 200, description = "Job requeued", body = RequeueResponse),
        (status = 400, description = "Job is not failed", body = crate::domain::ErrorResponse),
        (status = 404, description = "Job not found", body = crate::domain::ErrorResponse),
    )
)]
pub async fn requeue_sweep_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequeueResponse>, AppError> {
    let job = state.service.requeue_sweep(id).await?;
    warn!(job_id = %id, child = %job.child_address, "Admin requeued sweep job");

    Ok(Json(RequeueResponse {
        success: true,
        message: format!("Sweep job {} requeued", id),
        job: SweepJobView::new(job, state.service.token_decimals()),
    }))
}

/// Move every failed sweep job back to pending
///
/// POST /admin/sweeps/requeue-failed
#[utoipa::path(
    post,
    path = "/admin/sweeps/requeue-failed",
    tag = "admin",
    responses(
        (status = 200, description = "Failed jobs requeued", body = RequeueFailedResponse),
        (status = 503, description = "Ledger unavailable", body = crate::domain::ErrorResponse),
    )
)]
pub async fn requeue_failed_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RequeueFailedResponse>, AppError> {
    let requeued = state.service.requeue_failed_sweeps().await?;
    warn!(requeued, "Admin requeued all failed sweep jobs");

    Ok(Json(RequeueFailedResponse {
        success: true,
        requeued,
    }))
}
