//! Deposit service: user provisioning and ledger queries.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    AppError, ChainClient, DatabaseError, Deposit, DepositStatus, HealthResponse, HealthStatus,
    LedgerStats, LedgerStore, NewUserBinding, ProvisionUserRequest, SweepJob, SweepStatus,
    TransactionStatusView, UserBinding, ValidationError,
};
use crate::infra::wallet::{HdWallet, SecretStore};

/// Upper bound on rows returned by history queries
pub const MAX_LIST_LIMIT: i64 = 500;

/// Application service consumed by the REST layer
pub struct DepositService {
    ledger: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    wallet: Arc<HdWallet>,
    secrets: Arc<SecretStore>,
    token_decimals: u8,
}

impl DepositService {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        wallet: Arc<HdWallet>,
        secrets: Arc<SecretStore>,
        token_decimals: u8,
    ) -> Self {
        Self {
            ledger,
            chain,
            wallet,
            secrets,
            token_decimals,
        }
    }

    /// Decimals read from the token contract at startup
    #[must_use]
    pub fn token_decimals(&self) -> u8 {
        self.token_decimals
    }

    /// Bind a user to a freshly derived deposit address.
    /// Calling it again for the same user returns the existing binding.
    #[instrument(skip(self))]
    pub async fn provision_user(&self, user_id: &str) -> Result<UserBinding, AppError> {
        let request = ProvisionUserRequest::new(user_id);
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        if let Some(existing) = self.ledger.get_user_binding(&request.user_id).await? {
            return Ok(existing);
        }

        let index = self.ledger.next_derivation_index().await?;
        let key = self.wallet.derive(index)?;
        let encrypted_private_key = self.secrets.encrypt(&key.private_key)?;

        let binding = NewUserBinding {
            user_id: request.user_id.clone(),
            derivation_index: index,
            address: key.address,
            encrypted_private_key,
        };

        match self.ledger.insert_user_binding(&binding).await {
            Ok(stored) => {
                info!(
                    user_id = %stored.user_id,
                    derivation_index = stored.derivation_index,
                    address = %stored.address,
                    "User provisioned"
                );
                Ok(stored)
            }
            Err(AppError::Database(DatabaseError::Duplicate(_))) => {
                // Lost a race with a concurrent provision for the same user.
                // The allocated index is skipped, never reused.
                self.ledger
                    .get_user_binding(&request.user_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Database(DatabaseError::Duplicate(format!(
                            "binding conflict for user {}",
                            request.user_id
                        )))
                    })
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_deposit_address(&self, user_id: &str) -> Result<Address, AppError> {
        self.require_binding(user_id).await.map(|b| b.address)
    }

    #[instrument(skip(self))]
    pub async fn get_transaction_status(
        &self,
        tx_hash: &TxHash,
    ) -> Result<TransactionStatusView, AppError> {
        let deposit = self.ledger.get_deposit(tx_hash).await?.ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!("deposit {}", tx_hash)))
        })?;
        Ok(TransactionStatusView::from(&deposit))
    }

    /// Deposits of a user still awaiting confirmation
    #[instrument(skip(self))]
    pub async fn list_pending_deposits(&self, user_id: &str) -> Result<Vec<Deposit>, AppError> {
        self.require_binding(user_id).await?;
        self.ledger
            .list_user_deposits(user_id, Some(DepositStatus::Pending))
            .await
    }

    /// Sum of a user's completed deposits in raw token units
    #[instrument(skip(self))]
    pub async fn get_credited_balance(&self, user_id: &str) -> Result<U256, AppError> {
        self.require_binding(user_id)
            .await
            .map(|b| b.credited_balance)
    }

    pub async fn get_stats(&self) -> Result<LedgerStats, AppError> {
        self.ledger.get_stats().await
    }

    #[instrument(skip(self))]
    pub async fn list_sweep_jobs(
        &self,
        status: Option<SweepStatus>,
        limit: i64,
    ) -> Result<Vec<SweepJob>, AppError> {
        self.ledger
            .list_sweep_jobs(status, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// Put a failed sweep job back in the queue
    #[instrument(skip(self))]
    pub async fn requeue_sweep(&self, id: Uuid) -> Result<SweepJob, AppError> {
        let job = self.ledger.get_sweep_job(id).await?.ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!("sweep job {}", id)))
        })?;

        if job.status != SweepStatus::Failed || !self.ledger.requeue_sweep(id).await? {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "status".to_string(),
                message: format!(
                    "sweep job {} is {}, only failed jobs can be requeued",
                    id, job.status
                ),
            }));
        }
        info!(job_id = %id, previous_error = ?job.last_error, "Sweep job requeued");

        self.ledger.get_sweep_job(id).await?.ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!("sweep job {}", id)))
        })
    }

    /// Deposits across all users, newest first
    #[instrument(skip(self))]
    pub async fn list_deposits(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
    ) -> Result<Vec<Deposit>, AppError> {
        self.ledger
            .list_deposits(status, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// Provisioned users ordered by derivation index
    #[instrument(skip(self))]
    pub async fn list_users(&self, limit: i64) -> Result<Vec<UserBinding>, AppError> {
        self.ledger
            .list_user_bindings(limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// Put every failed sweep job back in the queue, returning how many moved
    #[instrument(skip(self))]
    pub async fn requeue_failed_sweeps(&self) -> Result<u64, AppError> {
        let requeued = self.ledger.requeue_failed_sweeps().await?;
        if requeued > 0 {
            info!(requeued, "Failed sweep jobs requeued");
        }
        Ok(requeued)
    }

    /// Health check for ledger and node
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.ledger.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let blockchain = match self.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(database, blockchain)
    }

    async fn require_binding(&self, user_id: &str) -> Result<UserBinding, AppError> {
        self.ledger.get_user_binding(user_id).await?.ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!("user {}", user_id)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewDeposit;
    use crate::infra::wallet::DEFAULT_DERIVATION_PATH_PREFIX;
    use crate::test_utils::{MockChainClient, MockLedgerStore};
    use secrecy::{ExposeSecret, SecretString};

    const PHRASE: &str = "test test test test test test test test test test test junk";

    fn secrets() -> Arc<SecretStore> {
        Arc::new(SecretStore::new(&SecretString::from("service-test".to_string())).unwrap())
    }

    fn wallet() -> Arc<HdWallet> {
        Arc::new(
            HdWallet::from_mnemonic(
                &SecretString::from(PHRASE.to_string()),
                DEFAULT_DERIVATION_PATH_PREFIX,
            )
            .unwrap(),
        )
    }

    fn service(ledger: Arc<MockLedgerStore>, chain: Arc<MockChainClient>) -> DepositService {
        DepositService::new(ledger, chain, wallet(), secrets(), 6)
    }

    #[tokio::test]
    async fn test_provision_derives_and_encrypts() {
        let ledger = Arc::new(MockLedgerStore::new());
        let svc = service(ledger.clone(), Arc::new(MockChainClient::new()));

        let binding = svc.provision_user("alice").await.unwrap();
        assert_eq!(binding.derivation_index, 1);
        assert_eq!(binding.address, wallet().derive(1).unwrap().address);

        let key = secrets().decrypt(&binding.encrypted_private_key);
        assert_eq!(
            key.expose_secret(),
            wallet().derive(1).unwrap().private_key.expose_secret()
        );
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let ledger = Arc::new(MockLedgerStore::new());
        let svc = service(ledger.clone(), Arc::new(MockChainClient::new()));

        let first = svc.provision_user("alice").await.unwrap();
        let second = svc.provision_user("alice").await.unwrap();
        assert_eq!(first.address, second.address);

        let bob = svc.provision_user("bob").await.unwrap();
        assert_eq!(bob.derivation_index, 2);
        assert_ne!(bob.address, first.address);
    }

    #[tokio::test]
    async fn test_provision_rejects_empty_user() {
        let svc = service(
            Arc::new(MockLedgerStore::new()),
            Arc::new(MockChainClient::new()),
        );
        let result = svc.provision_user("").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_user_not_found() {
        let svc = service(
            Arc::new(MockLedgerStore::new()),
            Arc::new(MockChainClient::new()),
        );
        assert!(matches!(
            svc.get_deposit_address("ghost").await,
            Err(AppError::Database(DatabaseError::NotFound(_)))
        ));
        assert!(matches!(
            svc.get_credited_balance("ghost").await,
            Err(AppError::Database(DatabaseError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_status_and_pending_queries() {
        let ledger = Arc::new(MockLedgerStore::new());
        let svc = service(ledger.clone(), Arc::new(MockChainClient::new()));
        let binding = svc.provision_user("alice").await.unwrap();

        let tx_hash = TxHash::repeat_byte(0x05);
        ledger
            .insert_deposit(&NewDeposit {
                tx_hash,
                user_id: "alice".to_string(),
                from_address: Address::repeat_byte(0x99),
                to_address: binding.address,
                amount: U256::from(5_000_000u64),
                block_number: 50,
            })
            .await
            .unwrap();
        ledger.update_confirmations(&tx_hash, 1).await.unwrap();

        let status = svc.get_transaction_status(&tx_hash).await.unwrap();
        assert_eq!(status.status, DepositStatus::Pending);
        assert_eq!(status.confirmations, 1);
        assert_eq!(svc.list_pending_deposits("alice").await.unwrap().len(), 1);
        assert_eq!(svc.get_credited_balance("alice").await.unwrap(), U256::ZERO);

        ledger.complete_deposit(&tx_hash, 3).await.unwrap();
        assert!(svc.list_pending_deposits("alice").await.unwrap().is_empty());
        assert_eq!(
            svc.get_credited_balance("alice").await.unwrap(),
            U256::from(5_000_000u64)
        );

        assert!(matches!(
            svc.get_transaction_status(&TxHash::repeat_byte(0x06)).await,
            Err(AppError::Database(DatabaseError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_requeue_only_failed_jobs() {
        let ledger = Arc::new(MockLedgerStore::new());
        let svc = service(ledger.clone(), Arc::new(MockChainClient::new()));
        let binding = svc.provision_user("alice").await.unwrap();
        let tx_hash = TxHash::repeat_byte(0x07);
        ledger
            .insert_deposit(&NewDeposit {
                tx_hash,
                user_id: "alice".to_string(),
                from_address: Address::repeat_byte(0x99),
                to_address: binding.address,
                amount: U256::from(10u64),
                block_number: 1,
            })
            .await
            .unwrap();
        let job = ledger.complete_deposit(&tx_hash, 3).await.unwrap().unwrap();

        assert!(matches!(
            svc.requeue_sweep(job.id).await,
            Err(AppError::Validation(_))
        ));

        ledger.force_sweep_failed(job.id, "boom");
        let requeued = svc.requeue_sweep(job.id).await.unwrap();
        assert_eq!(requeued.status, SweepStatus::Pending);

        assert!(matches!(
            svc.requeue_sweep(Uuid::now_v7()).await,
            Err(AppError::Database(DatabaseError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_requeue_failed_sweeps_counts_jobs() {
        let ledger = Arc::new(MockLedgerStore::new());
        let svc = service(ledger.clone(), Arc::new(MockChainClient::new()));
        let binding = svc.provision_user("alice").await.unwrap();

        let mut jobs = Vec::new();
        for byte in [0x11u8, 0x12, 0x13] {
            let tx_hash = TxHash::repeat_byte(byte);
            ledger
                .insert_deposit(&NewDeposit {
                    tx_hash,
                    user_id: "alice".to_string(),
                    from_address: Address::repeat_byte(0x99),
                    to_address: binding.address,
                    amount: U256::from(10u64),
                    block_number: 1,
                })
                .await
                .unwrap();
            jobs.push(ledger.complete_deposit(&tx_hash, 3).await.unwrap().unwrap());
        }
        ledger.force_sweep_failed(jobs[0].id, "boom");
        ledger.force_sweep_failed(jobs[1].id, "boom");

        assert_eq!(svc.requeue_failed_sweeps().await.unwrap(), 2);
        assert_eq!(svc.requeue_failed_sweeps().await.unwrap(), 0);
        let pending = svc
            .list_sweep_jobs(Some(SweepStatus::Pending), 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_list_users_in_derivation_order() {
        let svc = service(
            Arc::new(MockLedgerStore::new()),
            Arc::new(MockChainClient::new()),
        );
        svc.provision_user("bob").await.unwrap();
        svc.provision_user("alice").await.unwrap();

        let users = svc.list_users(0).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "bob");

        let users = svc.list_users(10).await.unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, ["bob", "alice"]);
    }

    #[tokio::test]
    async fn test_health_check_degraded_without_node() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_healthy(false);
        let svc = service(Arc::new(MockLedgerStore::new()), chain);

        let health = svc.health_check().await;
        assert_eq!(health.database, HealthStatus::Healthy);
        assert_eq!(health.blockchain, HealthStatus::Unhealthy);
        assert_eq!(health.status, HealthStatus::Degraded);
    }
}
