//! Error types shared across the domain, application and infrastructure layers.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl AppError {
    /// Errors caused by an unreachable or slow dependency. These are retried
    /// on the next scheduled tick and never change ledger state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Blockchain(
                BlockchainError::Connection(_)
                    | BlockchainError::Timeout(_)
                    | BlockchainError::RpcError(_)
            ) | AppError::Database(DatabaseError::Connection(_))
        )
    }
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Chain access errors
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Insufficient funds for transaction")]
    InsufficientFunds,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Key derivation and key-at-rest errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Derivation failed at index {index}: {message}")]
    Derivation { index: u32, message: String },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),
}

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Input validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{0}")]
    Multiple(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Blockchain(BlockchainError::Timeout("eth_call".into())).is_transient());
        assert!(AppError::Blockchain(BlockchainError::Connection("refused".into())).is_transient());
        assert!(AppError::Database(DatabaseError::Connection("down".into())).is_transient());

        assert!(!AppError::Blockchain(BlockchainError::InsufficientFunds).is_transient());
        assert!(!AppError::Database(DatabaseError::Duplicate("tx".into())).is_transient());
        assert!(!AppError::Wallet(WalletError::InvalidKey("empty".into())).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Wallet(WalletError::Derivation {
            index: 7,
            message: "bad path".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Wallet error: Derivation failed at index 7: bad path"
        );
    }
}
