//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod wallet;

pub use blockchain::{EvmChainClient, EvmClientConfig};
pub use database::{PostgresConfig, PostgresLedger};
pub use wallet::{DEFAULT_DERIVATION_PATH_PREFIX, DerivedKey, HdWallet, SecretStore};
