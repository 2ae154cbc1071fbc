//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, ValidationError, WalletError,
};
pub use traits::{BlockStream, ChainClient, LedgerStore, TransferStream};
pub use types::{
    Deposit, DepositStatus, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, LedgerStats,
    NewDeposit, NewUserBinding, ProvisionUserRequest, ReceiptInfo, SweepClaim, SweepJob, SweepStatus,
    TransactionStatusView, TransferEvent, UserBinding, format_token_amount, parse_token_amount,
};
