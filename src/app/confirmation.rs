//! Confirmation tracking for pending deposits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{AppError, ChainClient, Deposit, LedgerStore};

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Depth at which a deposit is final
    pub confirmations_required: u64,
    /// Consecutive checks without a receipt before a deposit is failed
    pub receipt_grace_checks: u32,
    /// Pending deposits examined per tick
    pub batch_size: i64,
    pub poll_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirmations_required: 3,
            receipt_grace_checks: 20,
            batch_size: 100,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Summary of one tracker tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
    pub missing_receipts: usize,
    pub errors: usize,
}

enum DepositCheck {
    Waiting,
    MissingReceipt,
    Completed,
    Failed,
}

/// Moves pending deposits to completed once they reach the required depth
pub struct ConfirmationTracker {
    ledger: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    config: TrackerConfig,
}

impl ConfirmationTracker {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            config,
        }
    }

    /// Examine one batch of pending deposits against the current head
    #[instrument(skip(self))]
    pub async fn process_tick(&self) -> Result<TickReport, AppError> {
        let pending = self
            .ledger
            .get_pending_deposits(self.config.batch_size)
            .await?;
        let mut report = TickReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        let head = self.chain.block_number().await?;
        debug!(count = pending.len(), head, "Checking pending deposits");

        for deposit in &pending {
            report.checked += 1;
            match self.check_deposit(deposit, head).await {
                Ok(DepositCheck::Waiting) => {}
                Ok(DepositCheck::MissingReceipt) => report.missing_receipts += 1,
                Ok(DepositCheck::Completed) => report.completed += 1,
                Ok(DepositCheck::Failed) => report.failed += 1,
                Err(e) => {
                    report.errors += 1;
                    if e.is_transient() {
                        warn!(tx_hash = %deposit.tx_hash, error = %e, "Confirmation check failed");
                    } else {
                        error!(tx_hash = %deposit.tx_hash, error = %e, "Confirmation check failed");
                    }
                }
            }
        }

        Ok(report)
    }

    async fn check_deposit(&self, deposit: &Deposit, head: u64) -> Result<DepositCheck, AppError> {
        let tx_hash = &deposit.tx_hash;

        let Some(receipt) = self.chain.receipt(tx_hash).await? else {
            let missed = self.ledger.record_missing_receipt(tx_hash).await?;
            if missed < self.config.receipt_grace_checks {
                debug!(tx_hash = %tx_hash, missed, "No receipt yet");
                return Ok(DepositCheck::MissingReceipt);
            }
            let reason = format!("no receipt on canonical chain after {} checks", missed);
            if self.ledger.fail_deposit(tx_hash, &reason).await? {
                error!(
                    tx_hash = %tx_hash,
                    user_id = %deposit.user_id,
                    amount = %deposit.amount,
                    reason = %reason,
                    "Deposit failed"
                );
            }
            return Ok(DepositCheck::Failed);
        };

        if !receipt.success {
            let reason = "transaction reverted";
            if self.ledger.fail_deposit(tx_hash, reason).await? {
                error!(
                    tx_hash = %tx_hash,
                    user_id = %deposit.user_id,
                    amount = %deposit.amount,
                    reason,
                    "Deposit failed"
                );
            }
            return Ok(DepositCheck::Failed);
        }

        let confirmations = head.saturating_sub(receipt.block_number);
        self.ledger
            .update_confirmations(tx_hash, confirmations)
            .await?;

        if confirmations < self.config.confirmations_required {
            debug!(
                tx_hash = %tx_hash,
                confirmations,
                required = self.config.confirmations_required,
                "Awaiting confirmations"
            );
            return Ok(DepositCheck::Waiting);
        }

        match self.ledger.complete_deposit(tx_hash, confirmations).await? {
            Some(job) => {
                info!(
                    tx_hash = %tx_hash,
                    user_id = %deposit.user_id,
                    amount = %deposit.amount,
                    confirmations,
                    sweep_job = %job.id,
                    "Deposit confirmed and credited"
                );
                Ok(DepositCheck::Completed)
            }
            None => {
                debug!(tx_hash = %tx_hash, "Deposit already completed");
                Ok(DepositCheck::Waiting)
            }
        }
    }

    /// Tick on the configured interval until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            confirmations_required = self.config.confirmations_required,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Confirmation tracker started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.process_tick().await {
                        Ok(report) if report.completed > 0 || report.failed > 0 => {
                            info!(
                                checked = report.checked,
                                completed = report.completed,
                                failed = report.failed,
                                "Confirmation tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) if e.is_transient() => warn!(error = %e, "Confirmation tick failed"),
                        Err(e) => error!(error = %e, "Confirmation tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Confirmation tracker stopped");
    }
}
