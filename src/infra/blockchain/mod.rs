//! Blockchain client implementations.

pub mod evm;

pub use evm::{EvmChainClient, EvmClientConfig, IERC20};
