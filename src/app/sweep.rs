//! Sweep engine: consolidates credited child balances into the main wallet.
//!
//! A job moves pending → sent or pending → failed, never back on its own.
//! Submitted transaction hashes are written to the job before waiting on
//! receipts, so an interrupted pass can tell whether its transfer landed.
//! A recorded transfer that may still be mined blocks any new one.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{TxHash, U256};
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{AppError, ChainClient, LedgerStore, SweepClaim, SweepJob};
use crate::infra::wallet::{SecretStore, address_from_private_key};

/// 0.00045 ether
const DEFAULT_GAS_RESERVE_WEI: u64 = 450_000_000_000_000;
/// 0.0005 ether
const DEFAULT_GAS_TOPUP_WEI: u64 = 500_000_000_000_000;

/// Sweep engine configuration
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Native balance below which a child address is topped up
    pub gas_reserve: U256,
    /// Native amount sent per top-up
    pub gas_topup: U256,
    /// How long to wait for a submitted transaction to be mined
    pub receipt_timeout: Duration,
    /// Jobs processed per pass, each claimed just before it is processed
    pub batch_size: usize,
    /// Lease on a single claimed job; must exceed the time one job can take
    pub lease: Duration,
    pub poll_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            gas_reserve: U256::from(DEFAULT_GAS_RESERVE_WEI),
            gas_topup: U256::from(DEFAULT_GAS_TOPUP_WEI),
            receipt_timeout: Duration::from_secs(120),
            batch_size: 10,
            lease: Duration::from_secs(600),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Summary of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: usize,
}

enum SweepOutcome {
    Sent(TxHash),
    Failed(String),
}

/// What became of a transfer recorded by an earlier pass
enum EarlierSweep {
    Mined,
    Reverted,
    /// The node no longer knows the transaction
    Dropped,
    Unresolved(String),
}

/// Processes pending sweep jobs
pub struct SweepEngine {
    ledger: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    secrets: Arc<SecretStore>,
    config: SweepConfig,
}

impl SweepEngine {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        secrets: Arc<SecretStore>,
        config: SweepConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            secrets,
            config,
        }
    }

    /// Claim pending jobs one at a time and drive each to a terminal state
    #[instrument(skip(self))]
    pub async fn process_pending(&self) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        while report.claimed < self.config.batch_size {
            let claim = match self.ledger.claim_next_sweep(self.config.lease).await {
                Ok(Some(claim)) => claim,
                Ok(None) => break,
                Err(e) if report.claimed == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Failed to claim next sweep job");
                    break;
                }
            };
            report.claimed += 1;
            self.process_claim(&claim, &mut report).await;
        }

        Ok(report)
    }

    async fn process_claim(&self, claim: &SweepClaim, report: &mut SweepReport) {
        let job = &claim.job;
        let outcome = match self.sweep(claim).await {
            Ok(outcome) => outcome,
            Err(e) => SweepOutcome::Failed(e.to_string()),
        };

        let recorded = match &outcome {
            SweepOutcome::Sent(tx_hash) => {
                self.ledger
                    .mark_sweep_sent(job.id, claim.token, tx_hash)
                    .await
            }
            SweepOutcome::Failed(reason) => {
                self.ledger
                    .mark_sweep_failed(job.id, claim.token, reason)
                    .await
            }
        };

        match (outcome, recorded) {
            (SweepOutcome::Sent(tx_hash), Ok(true)) => {
                report.sent += 1;
                info!(
                    job_id = %job.id,
                    user_id = %job.user_id,
                    child = %job.child_address,
                    tx_hash = %tx_hash,
                    "Sweep completed"
                );
            }
            (SweepOutcome::Failed(reason), Ok(true)) => {
                report.failed += 1;
                error!(
                    job_id = %job.id,
                    user_id = %job.user_id,
                    child = %job.child_address,
                    reason = %reason,
                    "Sweep failed"
                );
            }
            (_, Ok(false)) => {
                report.errors += 1;
                warn!(job_id = %job.id, "Sweep claim was taken over, outcome not recorded");
            }
            (_, Err(e)) => {
                // Job stays pending; the lease expiry makes it claimable again
                report.errors += 1;
                error!(job_id = %job.id, error = %e, "Failed to record sweep outcome");
            }
        }
    }

    /// Find out whether a transfer recorded by an earlier pass can still land
    async fn resolve_earlier_sweep(&self, tx_hash: &TxHash) -> Result<EarlierSweep, AppError> {
        if let Some(receipt) = self.chain.receipt(tx_hash).await? {
            return Ok(if receipt.success {
                EarlierSweep::Mined
            } else {
                EarlierSweep::Reverted
            });
        }
        if !self.chain.transaction_known(tx_hash).await? {
            return Ok(EarlierSweep::Dropped);
        }
        match self
            .chain
            .wait_for_receipt(tx_hash, self.config.receipt_timeout)
            .await
        {
            Ok(receipt) if receipt.success => Ok(EarlierSweep::Mined),
            Ok(_) => Ok(EarlierSweep::Reverted),
            Err(e) => Ok(EarlierSweep::Unresolved(e.to_string())),
        }
    }

    async fn sweep(&self, claim: &SweepClaim) -> Result<SweepOutcome, AppError> {
        let job: &SweepJob = &claim.job;

        if let Some(earlier) = job.sweep_tx_hash {
            match self.resolve_earlier_sweep(&earlier).await? {
                EarlierSweep::Mined => {
                    info!(job_id = %job.id, tx_hash = %earlier, "Earlier sweep transfer was mined");
                    return Ok(SweepOutcome::Sent(earlier));
                }
                EarlierSweep::Unresolved(reason) => {
                    return Ok(SweepOutcome::Failed(format!(
                        "previous sweep {} unresolved: {}",
                        earlier, reason
                    )));
                }
                EarlierSweep::Reverted => {
                    warn!(job_id = %job.id, tx_hash = %earlier, "Earlier sweep transfer reverted");
                }
                EarlierSweep::Dropped => {
                    warn!(
                        job_id = %job.id,
                        tx_hash = %earlier,
                        "Earlier sweep transfer was dropped"
                    );
                }
            }
        }

        let Some(binding) = self.ledger.find_user_by_address(&job.child_address).await? else {
            return Ok(SweepOutcome::Failed(format!(
                "no binding for child address {}",
                job.child_address
            )));
        };
        let private_key = self.secrets.decrypt(&binding.encrypted_private_key);
        if private_key.expose_secret().is_empty() {
            return Ok(SweepOutcome::Failed(
                "child key unavailable: stored key could not be decrypted".to_string(),
            ));
        }
        if address_from_private_key(&private_key)? != job.child_address {
            return Ok(SweepOutcome::Failed(
                "decrypted key does not control the child address".to_string(),
            ));
        }

        let balance = self.chain.token_balance(&job.child_address).await?;
        if balance.is_zero() {
            return Ok(SweepOutcome::Failed(
                "nothing to sweep: token balance is zero".to_string(),
            ));
        }
        if balance < job.amount {
            warn!(
                job_id = %job.id,
                child = %job.child_address,
                expected = %job.amount,
                observed = %balance,
                "Child balance below credited amount, sweeping observed balance"
            );
        }

        let gas = self.chain.native_balance(&job.child_address).await?;
        if gas < self.config.gas_reserve {
            info!(
                job_id = %job.id,
                child = %job.child_address,
                balance_wei = %gas,
                topup_wei = %self.config.gas_topup,
                "Topping up gas"
            );
            let topup = self
                .chain
                .send_native(&job.child_address, self.config.gas_topup)
                .await?;
            if !self
                .ledger
                .record_gas_topup(job.id, claim.token, &topup)
                .await?
            {
                return Ok(SweepOutcome::Failed(format!(
                    "claim lost after gas top-up {}",
                    topup
                )));
            }

            let receipt = self
                .chain
                .wait_for_receipt(&topup, self.config.receipt_timeout)
                .await?;
            if !receipt.success {
                return Ok(SweepOutcome::Failed(format!(
                    "gas top-up {} reverted",
                    topup
                )));
            }
            debug!(job_id = %job.id, tx_hash = %topup, "Gas top-up mined");
        }

        let main_wallet = self.chain.main_wallet_address();
        let tx_hash = self
            .chain
            .send_token_transfer(&private_key, &main_wallet, balance)
            .await?;
        let recorded = self
            .ledger
            .record_sweep_submission(job.id, claim.token, &tx_hash, job.sweep_tx_hash.as_ref())
            .await?;
        if !recorded {
            error!(
                job_id = %job.id,
                tx_hash = %tx_hash,
                "Sweep transfer submitted but the job record changed, reconcile manually"
            );
            return Ok(SweepOutcome::Failed(format!(
                "sweep transfer {} submitted but not recorded",
                tx_hash
            )));
        }
        info!(
            job_id = %job.id,
            tx_hash = %tx_hash,
            amount = %balance,
            "Sweep transfer submitted"
        );

        let receipt = self
            .chain
            .wait_for_receipt(&tx_hash, self.config.receipt_timeout)
            .await?;
        if !receipt.success {
            return Ok(SweepOutcome::Failed(format!(
                "sweep transfer {} reverted",
                tx_hash
            )));
        }

        Ok(SweepOutcome::Sent(tx_hash))
    }

    /// Process jobs on the configured interval until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            gas_reserve_wei = %self.config.gas_reserve,
            "Sweep engine started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.process_pending().await {
                        Ok(report) if report.claimed > 0 => {
                            info!(
                                claimed = report.claimed,
                                sent = report.sent,
                                failed = report.failed,
                                "Sweep pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) if e.is_transient() => warn!(error = %e, "Sweep pass failed"),
                        Err(e) => error!(error = %e, "Sweep pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Sweep engine stopped");
    }
}
