//! Domain types for deposits, sweep jobs and user bindings.

use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::error::{AppError, ValidationError};

/// Lifecycle of an observed deposit transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Observed on chain, waiting for the confirmation threshold
    #[default]
    Pending,
    /// Final and credited to the user
    Completed,
    /// Dropped from the canonical chain or reverted
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid deposit status: {}", s)),
        }
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a sweep job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Waiting for the sweep engine
    #[default]
    Pending,
    /// Token transfer to the main wallet was mined
    Sent,
    /// Stopped; requires an explicit re-queue
    Failed,
}

impl SweepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SweepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid sweep status: {}", s)),
        }
    }
}

impl std::fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded `Transfer(from, to, value)` log of the tracked token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
    pub from: Address,
    pub to: Address,
    /// Raw token units
    pub value: U256,
}

/// Receipt summary used for confirmation depth and submission outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub block_number: u64,
    pub success: bool,
}

/// Binding between an external user and a derived deposit address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserBinding {
    pub user_id: String,
    pub derivation_index: u32,
    pub address: Address,
    /// Base64 AES-GCM envelope, never exposed
    #[serde(skip_serializing, default)]
    pub encrypted_private_key: String,
    /// Raw token units credited by completed deposits
    pub credited_balance: U256,
    pub created_at: DateTime<Utc>,
}

/// Data required to persist a new user binding
#[derive(Debug, Clone)]
pub struct NewUserBinding {
    pub user_id: String,
    pub derivation_index: u32,
    pub address: Address,
    pub encrypted_private_key: String,
}

/// Request from the REST layer to provision a deposit address
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProvisionUserRequest {
    #[validate(length(min = 1, max = 128, message = "User id must be 1-128 characters"))]
    pub user_id: String,
}

impl ProvisionUserRequest {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Observed deposit transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deposit {
    pub tx_hash: TxHash,
    pub user_id: String,
    pub from_address: Address,
    pub to_address: Address,
    /// Raw token units
    pub amount: U256,
    pub block_number: u64,
    pub confirmations: u64,
    pub status: DepositStatus,
    /// Consecutive checks with no receipt on the canonical chain
    pub missed_checks: u32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to record a newly observed deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeposit {
    pub tx_hash: TxHash,
    pub user_id: String,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: U256,
    pub block_number: u64,
}

impl NewDeposit {
    #[must_use]
    pub fn from_event(event: &TransferEvent, user_id: impl Into<String>) -> Self {
        Self {
            tx_hash: event.tx_hash,
            user_id: user_id.into(),
            from_address: event.from,
            to_address: event.to,
            amount: event.value,
            block_number: event.block_number,
        }
    }
}

/// Consolidation job moving a child balance into the main wallet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepJob {
    pub id: Uuid,
    pub deposit_tx_hash: TxHash,
    pub user_id: String,
    pub child_address: Address,
    /// Amount credited by the originating deposit
    pub amount: U256,
    pub status: SweepStatus,
    pub gas_topup_tx_hash: Option<TxHash>,
    pub sweep_tx_hash: Option<TxHash>,
    pub last_error: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pending sweep job leased to one engine pass.
///
/// Writes made on behalf of the pass carry `token` and are rejected once
/// another pass has re-claimed the job.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepClaim {
    pub job: SweepJob,
    pub token: Uuid,
}

/// Status summary of a deposit for the REST layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionStatusView {
    pub tx_hash: TxHash,
    pub status: DepositStatus,
    pub confirmations: u64,
}

impl From<&Deposit> for TransactionStatusView {
    fn from(deposit: &Deposit) -> Self {
        Self {
            tx_hash: deposit.tx_hash,
            status: deposit.status,
            confirmations: deposit.confirmations,
        }
    }
}

/// Aggregate ledger counters for operators
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerStats {
    pub total_users: u64,
    pub pending_deposits: u64,
    pub completed_deposits: u64,
    pub failed_deposits: u64,
    /// Raw token units across completed deposits
    pub total_deposited: U256,
    pub pending_sweeps: u64,
    pub sent_sweeps: u64,
    pub failed_sweeps: u64,
    /// Raw token units across sent sweeps
    pub total_swept: U256,
    pub last_processed_block: Option<u64>,
}

/// Format raw token units with the token's declared decimals
#[must_use]
pub fn format_token_amount(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

/// Parse a human-readable token amount into raw units at the given decimals
pub fn parse_token_amount(value: &str, decimals: u8) -> Result<U256, AppError> {
    let parsed = parse_units(value.trim(), decimals).map_err(|e| {
        AppError::Validation(ValidationError::InvalidField {
            field: "amount".to_string(),
            message: format!("'{}' is not a valid amount: {}", value, e),
        })
    })?;
    if parsed.is_negative() {
        return Err(AppError::Validation(ValidationError::InvalidField {
            field: "amount".to_string(),
            message: "amount must not be negative".to_string(),
        }));
    }
    Ok(parsed.get_absolute())
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Ledger database health status
    pub database: HealthStatus,
    /// Chain RPC health status
    pub blockchain: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, blockchain: HealthStatus) -> Self {
        let status = match (&database, &blockchain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            // Deposits stay queryable while the node is unreachable
            (_, HealthStatus::Unhealthy) => HealthStatus::Degraded,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            blockchain,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "not_found")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Not found: sweep job 0190c3b2-...")]
    pub message: String,
}
