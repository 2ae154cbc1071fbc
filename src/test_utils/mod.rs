//! Test doubles for the ledger and the chain.

pub mod mocks;

pub use mocks::{
    MockChainClient, MockConfig, MockLedgerStore, RecordedNativeSend, RecordedTokenSend,
};
