//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use secrecy::SecretString;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{
    AppError, BlockStream, BlockchainError, ChainClient, DatabaseError, Deposit, DepositStatus,
    LedgerStats, LedgerStore, NewDeposit, NewUserBinding, ReceiptInfo, SweepClaim, SweepJob,
    SweepStatus, TransferEvent, TransferStream, UserBinding, WalletError,
};
use crate::infra::wallet::address_from_private_key;

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    last_index: u32,
    bindings: HashMap<String, UserBinding>,
    deposits: HashMap<TxHash, Deposit>,
    deposit_order: Vec<TxHash>,
    sweeps: HashMap<Uuid, SweepJob>,
    sweep_order: Vec<Uuid>,
    claims: HashMap<Uuid, Uuid>,
    watermark: Option<u64>,
}

impl LedgerState {
    /// The job, if it is pending and `claim` still holds its lease
    fn claimed_pending(&mut self, id: Uuid, claim: Uuid) -> Option<&mut SweepJob> {
        if self.claims.get(&id) != Some(&claim) {
            return None;
        }
        self.sweeps
            .get_mut(&id)
            .filter(|job| job.status == SweepStatus::Pending)
    }
}

/// In-memory ledger for testing. All transitions happen under one lock, so
/// they are as atomic as the Postgres ones.
pub struct MockLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    address_lookups: AtomicUsize,
}

impl MockLedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            config,
            is_healthy: AtomicBool::new(true),
            address_lookups: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Insert a binding directly, bypassing index allocation
    pub fn seed_binding(
        &self,
        user_id: &str,
        derivation_index: u32,
        address: Address,
        encrypted_private_key: &str,
    ) -> UserBinding {
        let binding = UserBinding {
            user_id: user_id.to_string(),
            derivation_index,
            address,
            encrypted_private_key: encrypted_private_key.to_string(),
            credited_balance: U256::ZERO,
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.last_index = state.last_index.max(derivation_index);
        state.bindings.insert(user_id.to_string(), binding.clone());
        binding
    }

    /// All deposits in insertion order (for testing)
    pub fn deposits(&self) -> Vec<Deposit> {
        let state = self.state.lock().unwrap();
        state
            .deposit_order
            .iter()
            .filter_map(|h| state.deposits.get(h).cloned())
            .collect()
    }

    /// All sweep jobs in creation order (for testing)
    pub fn sweep_jobs(&self) -> Vec<SweepJob> {
        let state = self.state.lock().unwrap();
        state
            .sweep_order
            .iter()
            .filter_map(|id| state.sweeps.get(id).cloned())
            .collect()
    }

    pub fn binding(&self, user_id: &str) -> Option<UserBinding> {
        self.state.lock().unwrap().bindings.get(user_id).cloned()
    }

    /// Number of `find_user_by_address` calls that reached the store
    pub fn address_lookups(&self) -> usize {
        self.address_lookups.load(Ordering::SeqCst)
    }

    /// Force a job's lease to expire (for testing)
    pub fn expire_lease(&self, id: Uuid) {
        if let Some(job) = self.state.lock().unwrap().sweeps.get_mut(&id) {
            job.locked_until = None;
        }
    }

    /// Move a job straight to failed, bypassing any claim (for testing)
    pub fn force_sweep_failed(&self, id: Uuid, error: &str) {
        let mut state = self.state.lock().unwrap();
        state.claims.remove(&id);
        if let Some(job) = state.sweeps.get_mut(&id) {
            job.status = SweepStatus::Failed;
            job.last_error = Some(error.to_string());
            job.locked_until = None;
        }
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

impl Default for MockLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn next_derivation_index(&self) -> Result<u32, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        state.last_index += 1;
        Ok(state.last_index)
    }

    async fn insert_user_binding(
        &self,
        binding: &NewUserBinding,
    ) -> Result<UserBinding, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let conflict = state.bindings.values().any(|b| {
            b.user_id == binding.user_id
                || b.derivation_index == binding.derivation_index
                || b.address == binding.address
        });
        if conflict {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "binding for {}",
                binding.user_id
            ))));
        }

        let stored = UserBinding {
            user_id: binding.user_id.clone(),
            derivation_index: binding.derivation_index,
            address: binding.address,
            encrypted_private_key: binding.encrypted_private_key.clone(),
            credited_balance: U256::ZERO,
            created_at: Utc::now(),
        };
        state.bindings.insert(binding.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_user_binding(&self, user_id: &str) -> Result<Option<UserBinding>, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().bindings.get(user_id).cloned())
    }

    async fn find_user_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<UserBinding>, AppError> {
        self.check_should_fail()?;
        self.address_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .bindings
            .values()
            .find(|b| b.address == *address)
            .cloned())
    }

    async fn list_user_bindings(&self, limit: i64) -> Result<Vec<UserBinding>, AppError> {
        self.check_should_fail()?;
        let mut bindings: Vec<UserBinding> =
            self.state.lock().unwrap().bindings.values().cloned().collect();
        bindings.sort_by_key(|b| b.derivation_index);
        bindings.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(bindings)
    }

    async fn insert_deposit(&self, deposit: &NewDeposit) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        if state.deposits.contains_key(&deposit.tx_hash) {
            return Ok(false);
        }
        let now = Utc::now();
        state.deposits.insert(
            deposit.tx_hash,
            Deposit {
                tx_hash: deposit.tx_hash,
                user_id: deposit.user_id.clone(),
                from_address: deposit.from_address,
                to_address: deposit.to_address,
                amount: deposit.amount,
                block_number: deposit.block_number,
                confirmations: 0,
                status: DepositStatus::Pending,
                missed_checks: 0,
                failure_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
        state.deposit_order.push(deposit.tx_hash);
        Ok(true)
    }

    async fn get_deposit(&self, tx_hash: &TxHash) -> Result<Option<Deposit>, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().deposits.get(tx_hash).cloned())
    }

    async fn get_pending_deposits(&self, limit: i64) -> Result<Vec<Deposit>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .deposits()
            .into_iter()
            .filter(|d| d.status == DepositStatus::Pending)
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn list_user_deposits(
        &self,
        user_id: &str,
        status: Option<DepositStatus>,
    ) -> Result<Vec<Deposit>, AppError> {
        self.check_should_fail()?;
        let mut deposits: Vec<Deposit> = self
            .deposits()
            .into_iter()
            .filter(|d| d.user_id == user_id && status.is_none_or(|s| d.status == s))
            .collect();
        deposits.reverse();
        Ok(deposits)
    }

    async fn list_deposits(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
    ) -> Result<Vec<Deposit>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .deposits()
            .into_iter()
            .rev()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn update_confirmations(
        &self,
        tx_hash: &TxHash,
        confirmations: u64,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        match state.deposits.get_mut(tx_hash) {
            Some(d) if d.status == DepositStatus::Pending => {
                d.confirmations = confirmations;
                d.missed_checks = 0;
                d.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_missing_receipt(&self, tx_hash: &TxHash) -> Result<u32, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        match state.deposits.get_mut(tx_hash) {
            Some(d) if d.status == DepositStatus::Pending => {
                d.missed_checks += 1;
                d.updated_at = Utc::now();
                Ok(d.missed_checks)
            }
            _ => Ok(0),
        }
    }

    async fn complete_deposit(
        &self,
        tx_hash: &TxHash,
        confirmations: u64,
    ) -> Result<Option<SweepJob>, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        let (user_id, child_address, amount) = match state.deposits.get_mut(tx_hash) {
            Some(d) if d.status == DepositStatus::Pending => {
                d.status = DepositStatus::Completed;
                d.confirmations = confirmations;
                d.missed_checks = 0;
                d.updated_at = now;
                (d.user_id.clone(), d.to_address, d.amount)
            }
            _ => return Ok(None),
        };

        if let Some(binding) = state.bindings.get_mut(&user_id) {
            binding.credited_balance += amount;
        }

        if state.sweeps.values().any(|j| j.deposit_tx_hash == *tx_hash) {
            return Ok(None);
        }
        let job = SweepJob {
            id: Uuid::now_v7(),
            deposit_tx_hash: *tx_hash,
            user_id,
            child_address,
            amount,
            status: SweepStatus::Pending,
            gas_topup_tx_hash: None,
            sweep_tx_hash: None,
            last_error: None,
            locked_until: None,
            created_at: now,
            updated_at: now,
        };
        state.sweeps.insert(job.id, job.clone());
        state.sweep_order.push(job.id);
        Ok(Some(job))
    }

    async fn fail_deposit(&self, tx_hash: &TxHash, reason: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        match state.deposits.get_mut(tx_hash) {
            Some(d) if d.status == DepositStatus::Pending => {
                d.status = DepositStatus::Failed;
                d.failure_reason = Some(reason.to_string());
                d.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_last_processed_block(&self) -> Result<Option<u64>, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().watermark)
    }

    async fn advance_last_processed_block(&self, block: u64) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        state.watermark = Some(state.watermark.map_or(block, |w| w.max(block)));
        Ok(())
    }

    async fn claim_next_sweep(&self, lease: Duration) -> Result<Option<SweepClaim>, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let until = now + chrono::Duration::from_std(lease).unwrap_or_default();
        let order = state.sweep_order.clone();

        for id in order {
            if let Some(job) = state.sweeps.get_mut(&id)
                && job.status == SweepStatus::Pending
                && job.locked_until.is_none_or(|t| t < now)
            {
                job.locked_until = Some(until);
                job.updated_at = now;
                let claim = SweepClaim {
                    job: job.clone(),
                    token: Uuid::new_v4(),
                };
                state.claims.insert(id, claim.token);
                return Ok(Some(claim));
            }
        }
        Ok(None)
    }

    async fn get_sweep_job(&self, id: Uuid) -> Result<Option<SweepJob>, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().sweeps.get(&id).cloned())
    }

    async fn list_sweep_jobs(
        &self,
        status: Option<SweepStatus>,
        limit: i64,
    ) -> Result<Vec<SweepJob>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .sweep_jobs()
            .into_iter()
            .rev()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn record_gas_topup(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.claimed_pending(id, claim) else {
            return Ok(false);
        };
        job.gas_topup_tx_hash = Some(*tx_hash);
        Ok(true)
    }

    async fn record_sweep_submission(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
        replaces: Option<&TxHash>,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        match state.claimed_pending(id, claim) {
            Some(job) if job.sweep_tx_hash.as_ref() == replaces => {
                job.sweep_tx_hash = Some(*tx_hash);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_sweep_sent(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.claimed_pending(id, claim) else {
            return Ok(false);
        };
        job.status = SweepStatus::Sent;
        job.sweep_tx_hash = Some(*tx_hash);
        job.last_error = None;
        job.locked_until = None;
        job.updated_at = Utc::now();
        state.claims.remove(&id);
        Ok(true)
    }

    async fn mark_sweep_failed(
        &self,
        id: Uuid,
        claim: Uuid,
        error: &str,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.claimed_pending(id, claim) else {
            return Ok(false);
        };
        job.status = SweepStatus::Failed;
        job.last_error = Some(error.to_string());
        job.locked_until = None;
        job.updated_at = Utc::now();
        state.claims.remove(&id);
        Ok(true)
    }

    async fn requeue_sweep(&self, id: Uuid) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let state = &mut *self.state.lock().unwrap();
        match state.sweeps.get_mut(&id) {
            Some(job) if job.status == SweepStatus::Failed => {
                job.status = SweepStatus::Pending;
                job.locked_until = None;
                job.updated_at = Utc::now();
                state.claims.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_failed_sweeps(&self) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut requeued = Vec::new();
        for job in state.sweeps.values_mut() {
            if job.status == SweepStatus::Failed {
                job.status = SweepStatus::Pending;
                job.locked_until = None;
                job.updated_at = now;
                requeued.push(job.id);
            }
        }
        for id in &requeued {
            state.claims.remove(id);
        }
        Ok(requeued.len() as u64)
    }

    async fn get_stats(&self) -> Result<LedgerStats, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        let mut stats = LedgerStats {
            total_users: state.bindings.len() as u64,
            last_processed_block: state.watermark,
            ..Default::default()
        };
        for deposit in state.deposits.values() {
            match deposit.status {
                DepositStatus::Pending => stats.pending_deposits += 1,
                DepositStatus::Completed => {
                    stats.completed_deposits += 1;
                    stats.total_deposited += deposit.amount;
                }
                DepositStatus::Failed => stats.failed_deposits += 1,
            }
        }
        for job in state.sweeps.values() {
            match job.status {
                SweepStatus::Pending => stats.pending_sweeps += 1,
                SweepStatus::Sent => {
                    stats.sent_sweeps += 1;
                    stats.total_swept += job.amount;
                }
                SweepStatus::Failed => stats.failed_sweeps += 1,
            }
        }
        Ok(stats)
    }
}

/// A token transfer submitted through the mock chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTokenSend {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub tx_hash: TxHash,
}

/// A native transfer submitted through the mock chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNativeSend {
    pub to: Address,
    pub amount: U256,
    pub tx_hash: TxHash,
}

struct ChainState {
    head: u64,
    decimals: u8,
    events: Vec<TransferEvent>,
    receipts: HashMap<TxHash, ReceiptInfo>,
    token_balances: HashMap<Address, U256>,
    native_balances: HashMap<Address, U256>,
    native_sends: Vec<RecordedNativeSend>,
    token_sends: Vec<RecordedTokenSend>,
    log_queries: Vec<(u64, u64)>,
    /// Known to the node but not mined
    mempool: HashSet<TxHash>,
}

/// Scriptable chain for testing.
///
/// Native sends credit the recipient and produce a receipt at the current
/// head. Token sends move the sender's balance and produce a successful
/// receipt. Both can be made to revert or to never be mined.
pub struct MockChainClient {
    state: Arc<Mutex<ChainState>>,
    config: MockConfig,
    main_wallet: Address,
    is_healthy: AtomicBool,
    rpc_down: AtomicBool,
    revert_topups: AtomicBool,
    withhold_topup_receipts: AtomicBool,
    revert_token_sends: AtomicBool,
    tx_counter: AtomicU64,
    live_transfers: Mutex<Option<mpsc::UnboundedReceiver<Vec<TransferEvent>>>>,
    live_blocks: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                head: 0,
                decimals: 18,
                events: Vec::new(),
                receipts: HashMap::new(),
                token_balances: HashMap::new(),
                native_balances: HashMap::new(),
                native_sends: Vec::new(),
                token_sends: Vec::new(),
                log_queries: Vec::new(),
                mempool: HashSet::new(),
            })),
            config,
            main_wallet: Address::repeat_byte(0xaa),
            is_healthy: AtomicBool::new(true),
            rpc_down: AtomicBool::new(false),
            revert_topups: AtomicBool::new(false),
            withhold_topup_receipts: AtomicBool::new(false),
            revert_token_sends: AtomicBool::new(false),
            tx_counter: AtomicU64::new(0),
            live_transfers: Mutex::new(None),
            live_blocks: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make read calls fail with a connection error
    pub fn set_rpc_down(&self, down: bool) {
        self.rpc_down.store(down, Ordering::SeqCst);
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_decimals(&self, decimals: u8) {
        self.state.lock().unwrap().decimals = decimals;
    }

    /// Add a transfer visible to `transfer_events` range queries
    pub fn push_event(&self, event: TransferEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn set_receipt(&self, tx_hash: TxHash, block_number: u64, success: bool) {
        self.state.lock().unwrap().receipts.insert(
            tx_hash,
            ReceiptInfo {
                block_number,
                success,
            },
        );
    }

    /// Make a transaction known to the node without mining it
    pub fn add_pending_transaction(&self, tx_hash: TxHash) {
        self.state.lock().unwrap().mempool.insert(tx_hash);
    }

    /// Drop a receipt, as after a reorg
    pub fn remove_receipt(&self, tx_hash: &TxHash) {
        self.state.lock().unwrap().receipts.remove(tx_hash);
    }

    pub fn set_token_balance(&self, owner: Address, balance: U256) {
        self.state.lock().unwrap().token_balances.insert(owner, balance);
    }

    pub fn set_native_balance(&self, owner: Address, balance: U256) {
        self.state.lock().unwrap().native_balances.insert(owner, balance);
    }

    pub fn set_revert_topups(&self, revert: bool) {
        self.revert_topups.store(revert, Ordering::SeqCst);
    }

    /// Top-ups are accepted but never mined
    pub fn set_withhold_topup_receipts(&self, withhold: bool) {
        self.withhold_topup_receipts.store(withhold, Ordering::SeqCst);
    }

    pub fn set_revert_token_sends(&self, revert: bool) {
        self.revert_token_sends.store(revert, Ordering::SeqCst);
    }

    /// Enable live subscriptions, returning the feeding ends
    pub fn enable_subscriptions(
        &self,
    ) -> (
        mpsc::UnboundedSender<Vec<TransferEvent>>,
        mpsc::UnboundedSender<()>,
    ) {
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let (block_tx, block_rx) = mpsc::unbounded_channel();
        *self.live_transfers.lock().unwrap() = Some(transfer_rx);
        *self.live_blocks.lock().unwrap() = Some(block_rx);
        (transfer_tx, block_tx)
    }

    pub fn native_sends(&self) -> Vec<RecordedNativeSend> {
        self.state.lock().unwrap().native_sends.clone()
    }

    pub fn token_sends(&self) -> Vec<RecordedTokenSend> {
        self.state.lock().unwrap().token_sends.clone()
    }

    /// Inclusive ranges passed to `transfer_events`
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn token_balance_of(&self, owner: &Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .token_balances
            .get(owner)
            .copied()
            .unwrap_or_default()
    }

    fn next_tx_hash(&self) -> TxHash {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut bytes = [0xee_u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        TxHash::from(bytes)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Blockchain(BlockchainError::RpcError(msg)));
        }
        if self.rpc_down.load(Ordering::SeqCst) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "mock node unreachable".to_string(),
            )));
        }
        Ok(())
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().head)
    }

    async fn token_decimals(&self) -> Result<u8, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().decimals)
    }

    async fn transfer_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        state.log_queries.push((from_block, to_block));
        Ok(state
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn subscribe_transfers(&self) -> Result<TransferStream, AppError> {
        let Some(rx) = self.live_transfers.lock().unwrap().take() else {
            return Err(AppError::NotSupported(
                "mock subscriptions disabled".to_string(),
            ));
        };
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|batch| (batch, rx))
        })))
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, AppError> {
        let Some(rx) = self.live_blocks.lock().unwrap().take() else {
            return Err(AppError::NotSupported(
                "mock subscriptions disabled".to_string(),
            ));
        };
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|()| ((), rx))
        })))
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<ReceiptInfo>, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().receipts.get(tx_hash).copied())
    }

    async fn transaction_known(&self, tx_hash: &TxHash) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state.receipts.contains_key(tx_hash) || state.mempool.contains(tx_hash))
    }

    async fn token_balance(&self, owner: &Address) -> Result<U256, AppError> {
        self.check_should_fail()?;
        Ok(self.token_balance_of(owner))
    }

    async fn native_balance(&self, owner: &Address) -> Result<U256, AppError> {
        self.check_should_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .native_balances
            .get(owner)
            .copied()
            .unwrap_or_default())
    }

    fn main_wallet_address(&self) -> Address {
        self.main_wallet
    }

    async fn send_native(&self, to: &Address, amount_wei: U256) -> Result<TxHash, AppError> {
        self.check_should_fail()?;
        let tx_hash = self.next_tx_hash();
        let revert = self.revert_topups.load(Ordering::SeqCst);
        let withhold = self.withhold_topup_receipts.load(Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.native_sends.push(RecordedNativeSend {
            to: *to,
            amount: amount_wei,
            tx_hash,
        });
        if withhold {
            state.mempool.insert(tx_hash);
            return Ok(tx_hash);
        }
        if !revert {
            *state.native_balances.entry(*to).or_default() += amount_wei;
        }
        let head = state.head;
        state.receipts.insert(
            tx_hash,
            ReceiptInfo {
                block_number: head,
                success: !revert,
            },
        );
        Ok(tx_hash)
    }

    async fn send_token_transfer(
        &self,
        private_key: &SecretString,
        to: &Address,
        amount: U256,
    ) -> Result<TxHash, AppError> {
        self.check_should_fail()?;
        let from = address_from_private_key(private_key)
            .map_err(|e| AppError::Wallet(WalletError::InvalidKey(e.to_string())))?;
        let tx_hash = self.next_tx_hash();
        let revert = self.revert_token_sends.load(Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        let balance = state.token_balances.get(&from).copied().unwrap_or_default();
        let success = !revert && balance >= amount;
        if success {
            state.token_balances.insert(from, balance - amount);
            *state.token_balances.entry(*to).or_default() += amount;
        }
        state.token_sends.push(RecordedTokenSend {
            from,
            to: *to,
            amount,
            tx_hash,
        });
        let head = state.head;
        state.receipts.insert(
            tx_hash,
            ReceiptInfo {
                block_number: head,
                success,
            },
        );
        Ok(tx_hash)
    }
}
