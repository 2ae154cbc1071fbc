//! Domain traits defining contracts for external systems.

use std::pin::Pin;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use futures_util::Stream;
use secrecy::SecretString;
use uuid::Uuid;

use super::error::{AppError, BlockchainError};
use super::types::{
    Deposit, DepositStatus, LedgerStats, NewDeposit, NewUserBinding, ReceiptInfo, SweepClaim,
    SweepJob, SweepStatus, TransferEvent, UserBinding,
};

/// Live stream of decoded transfer events, delivered in node-sized batches
pub type TransferStream = Pin<Box<dyn Stream<Item = Vec<TransferEvent>> + Send>>;

/// Live stream of new-block notifications
pub type BlockStream = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// Interval between receipt polls while waiting for inclusion
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Durable ledger for bindings, deposits, sweep jobs and the listener watermark.
///
/// Every state transition is conditional on the row's current status, so
/// concurrent duplicate processing degrades to a no-op.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Allocate the next derivation index. Indices are never handed out twice.
    async fn next_derivation_index(&self) -> Result<u32, AppError>;

    /// Persist a new binding. Fails with `DatabaseError::Duplicate` when the
    /// user, index or address is already bound.
    async fn insert_user_binding(&self, binding: &NewUserBinding)
    -> Result<UserBinding, AppError>;

    async fn get_user_binding(&self, user_id: &str) -> Result<Option<UserBinding>, AppError>;

    async fn find_user_by_address(&self, address: &Address)
    -> Result<Option<UserBinding>, AppError>;

    /// Bindings ordered by derivation index
    async fn list_user_bindings(&self, limit: i64) -> Result<Vec<UserBinding>, AppError>;

    /// Insert a pending deposit. Returns `false` when the hash already exists.
    async fn insert_deposit(&self, deposit: &NewDeposit) -> Result<bool, AppError>;

    async fn get_deposit(&self, tx_hash: &TxHash) -> Result<Option<Deposit>, AppError>;

    /// Pending deposits, oldest first
    async fn get_pending_deposits(&self, limit: i64) -> Result<Vec<Deposit>, AppError>;

    /// Deposits for a user, newest first, optionally filtered by status
    async fn list_user_deposits(
        &self,
        user_id: &str,
        status: Option<DepositStatus>,
    ) -> Result<Vec<Deposit>, AppError>;

    /// Deposits across all users, newest first, optionally filtered by status
    async fn list_deposits(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
    ) -> Result<Vec<Deposit>, AppError>;

    /// Persist the observed depth of a pending deposit and reset its missed
    /// checks. Returns `false` when the deposit is no longer pending.
    async fn update_confirmations(&self, tx_hash: &TxHash, confirmations: u64)
    -> Result<bool, AppError>;

    /// Count one more check without a receipt. Returns the new count, or 0
    /// when the deposit is no longer pending.
    async fn record_missing_receipt(&self, tx_hash: &TxHash) -> Result<u32, AppError>;

    /// Atomically move a pending deposit to completed, credit the user and
    /// create its sweep job. Returns the job only when this call performed
    /// the transition.
    async fn complete_deposit(
        &self,
        tx_hash: &TxHash,
        confirmations: u64,
    ) -> Result<Option<SweepJob>, AppError>;

    /// Move a pending deposit to failed. Returns `false` if it was not pending.
    async fn fail_deposit(&self, tx_hash: &TxHash, reason: &str) -> Result<bool, AppError>;

    async fn get_last_processed_block(&self) -> Result<Option<u64>, AppError>;

    /// Move the watermark forward. Lower values are ignored.
    async fn advance_last_processed_block(&self, block: u64) -> Result<(), AppError>;

    /// Claim the oldest pending sweep job whose lease is free, locking it
    /// for `lease` under a fresh claim token
    async fn claim_next_sweep(&self, lease: Duration) -> Result<Option<SweepClaim>, AppError>;

    async fn get_sweep_job(&self, id: Uuid) -> Result<Option<SweepJob>, AppError>;

    /// Sweep history, newest first
    async fn list_sweep_jobs(
        &self,
        status: Option<SweepStatus>,
        limit: i64,
    ) -> Result<Vec<SweepJob>, AppError>;

    /// Durably note a submitted gas top-up. Returns `false` if the claim was lost.
    async fn record_gas_topup(&self, id: Uuid, claim: Uuid, tx_hash: &TxHash)
    -> Result<bool, AppError>;

    /// Durably note a submitted sweep transfer. The stored hash is replaced
    /// only while it still equals `replaces`, so an unresolved earlier
    /// transfer is never overwritten. Returns `false` if nothing was written.
    async fn record_sweep_submission(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
        replaces: Option<&TxHash>,
    ) -> Result<bool, AppError>;

    /// pending → sent under the claim. Returns `false` if the job was not
    /// pending or the claim was lost.
    async fn mark_sweep_sent(&self, id: Uuid, claim: Uuid, tx_hash: &TxHash)
    -> Result<bool, AppError>;

    /// pending → failed under the claim. Returns `false` if the job was not
    /// pending or the claim was lost.
    async fn mark_sweep_failed(&self, id: Uuid, claim: Uuid, error: &str)
    -> Result<bool, AppError>;

    /// failed → pending. Returns `false` if the job was not failed.
    async fn requeue_sweep(&self, id: Uuid) -> Result<bool, AppError>;

    /// Every failed job → pending. Returns the number re-queued.
    async fn requeue_failed_sweeps(&self) -> Result<u64, AppError>;

    async fn get_stats(&self) -> Result<LedgerStats, AppError>;
}

/// Chain access for the tracked token and the main wallet
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Current chain head
    async fn block_number(&self) -> Result<u64, AppError>;

    /// Decimal precision declared by the token contract
    async fn token_decimals(&self) -> Result<u8, AppError>;

    /// Transfer events of the token in the inclusive block range
    async fn transfer_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AppError>;

    /// Subscribe to new transfer events
    async fn subscribe_transfers(&self) -> Result<TransferStream, AppError> {
        Err(AppError::NotSupported(
            "subscribe_transfers not implemented".to_string(),
        ))
    }

    /// Subscribe to new block notifications
    async fn subscribe_blocks(&self) -> Result<BlockStream, AppError> {
        Err(AppError::NotSupported(
            "subscribe_blocks not implemented".to_string(),
        ))
    }

    /// Receipt of a transaction on the canonical chain, if any
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<ReceiptInfo>, AppError>;

    /// Whether the node still knows the transaction, mined or in its mempool
    async fn transaction_known(&self, tx_hash: &TxHash) -> Result<bool, AppError>;

    /// Token balance in raw units
    async fn token_balance(&self, owner: &Address) -> Result<U256, AppError>;

    /// Native currency balance in wei
    async fn native_balance(&self, owner: &Address) -> Result<U256, AppError>;

    /// Address of the custodial main wallet
    fn main_wallet_address(&self) -> Address;

    /// Send native currency from the main wallet. Returns once submitted.
    async fn send_native(&self, to: &Address, amount_wei: U256) -> Result<TxHash, AppError>;

    /// Sign a token transfer with the given hex private key and submit it.
    /// Returns once submitted.
    async fn send_token_transfer(
        &self,
        private_key: &SecretString,
        to: &Address,
        amount: U256,
    ) -> Result<TxHash, AppError>;

    /// Poll for a receipt until it appears or `timeout` elapses
    async fn wait_for_receipt(
        &self,
        tx_hash: &TxHash,
        timeout: Duration,
    ) -> Result<ReceiptInfo, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Blockchain(BlockchainError::Timeout(format!(
                    "no receipt for {} after {}s",
                    tx_hash,
                    timeout.as_secs()
                ))));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL.min(timeout)).await;
        }
    }
}
