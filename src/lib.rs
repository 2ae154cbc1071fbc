//! Custodial deposit pipeline for an ERC-20 token on an EVM chain.
//!
//! Users receive HD-derived deposit addresses. Incoming token transfers are
//! recorded, tracked to finality, credited exactly once and swept into the
//! main wallet.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
