//! PostgreSQL ledger implementation.
//!
//! Token amounts are stored as `NUMERIC(78, 0)` and cross the driver boundary
//! as decimal text, so the full U256 range survives. Addresses and hashes are
//! stored as lowercase 0x-prefixed hex.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, DatabaseError, Deposit, DepositStatus, LedgerStats, LedgerStore, NewDeposit,
    NewUserBinding, SweepClaim, SweepJob, SweepStatus, UserBinding,
};

macro_rules! binding_columns {
    () => {
        "user_id, derivation_index, address, encrypted_private_key, \
         credited_balance::text AS credited_balance, created_at"
    };
}

macro_rules! deposit_columns {
    () => {
        "tx_hash, user_id, from_address, to_address, amount::text AS amount, \
         block_number, confirmations, status, missed_checks, failure_reason, \
         created_at, updated_at"
    };
}

macro_rules! sweep_job_columns {
    () => {
        "id, deposit_tx_hash, user_id, child_address, amount::text AS amount, \
         status, gas_topup_tx_hash, sweep_tx_hash, last_error, locked_until, \
         created_at, updated_at"
    };
}

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Duplicate(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(e.to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound(e.to_string()),
            _ => Self::Query(e.to_string()),
        }
    }
}

/// Ledger backed by a PostgreSQL connection pool
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a new ledger with custom pool configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new ledger with default pool configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_binding(row: &PgRow) -> Result<UserBinding, AppError> {
        Ok(UserBinding {
            user_id: get(row, "user_id")?,
            derivation_index: to_u32(get(row, "derivation_index")?, "derivation_index")?,
            address: parse(row, "address")?,
            encrypted_private_key: get(row, "encrypted_private_key")?,
            credited_balance: parse(row, "credited_balance")?,
            created_at: get(row, "created_at")?,
        })
    }

    fn row_to_deposit(row: &PgRow) -> Result<Deposit, AppError> {
        Ok(Deposit {
            tx_hash: parse(row, "tx_hash")?,
            user_id: get(row, "user_id")?,
            from_address: parse(row, "from_address")?,
            to_address: parse(row, "to_address")?,
            amount: parse(row, "amount")?,
            block_number: to_u64(get(row, "block_number")?, "block_number")?,
            confirmations: to_u64(get(row, "confirmations")?, "confirmations")?,
            status: parse::<DepositStatus>(row, "status")?,
            missed_checks: to_u32(get(row, "missed_checks")?, "missed_checks")?,
            failure_reason: get(row, "failure_reason")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn row_to_sweep_job(row: &PgRow) -> Result<SweepJob, AppError> {
        Ok(SweepJob {
            id: get(row, "id")?,
            deposit_tx_hash: parse(row, "deposit_tx_hash")?,
            user_id: get(row, "user_id")?,
            child_address: parse(row, "child_address")?,
            amount: parse(row, "amount")?,
            status: parse::<SweepStatus>(row, "status")?,
            gas_topup_tx_hash: parse_optional(row, "gas_topup_tx_hash")?,
            sweep_tx_hash: parse_optional(row, "sweep_tx_hash")?,
            last_error: get(row, "last_error")?,
            locked_until: get(row, "locked_until")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }
}

/// Lowercase 0x-prefixed hex used for every stored address and hash
fn hex_string(value: impl std::fmt::LowerHex) -> String {
    format!("{:#x}", value)
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| AppError::Database(DatabaseError::CorruptRow(format!("{}: {}", column, e))))
}

fn parse<T>(row: &PgRow, column: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = get(row, column)?;
    raw.parse().map_err(|e: T::Err| {
        AppError::Database(DatabaseError::CorruptRow(format!(
            "{} '{}': {}",
            column, raw, e
        )))
    })
}

fn parse_optional<T>(row: &PgRow, column: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = get(row, column)?;
    raw.map(|raw| {
        raw.parse().map_err(|e: T::Err| {
            AppError::Database(DatabaseError::CorruptRow(format!(
                "{} '{}': {}",
                column, raw, e
            )))
        })
    })
    .transpose()
}

fn to_u64(value: i64, column: &str) -> Result<u64, AppError> {
    u64::try_from(value).map_err(|_| {
        AppError::Database(DatabaseError::CorruptRow(format!(
            "{} is negative: {}",
            column, value
        )))
    })
}

fn to_u32(value: i32, column: &str) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| {
        AppError::Database(DatabaseError::CorruptRow(format!(
            "{} is negative: {}",
            column, value
        )))
    })
}

fn to_i64(value: u64, column: &str) -> Result<i64, AppError> {
    i64::try_from(value).map_err(|_| {
        AppError::Database(DatabaseError::Query(format!(
            "{} out of range: {}",
            column, value
        )))
    })
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn next_derivation_index(&self) -> Result<u32, AppError> {
        let row = sqlx::query("SELECT nextval('derivation_index_seq') AS idx")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        let index: i64 = get(&row, "idx")?;
        u32::try_from(index).map_err(|_| {
            AppError::Database(DatabaseError::Query(format!(
                "derivation index out of range: {}",
                index
            )))
        })
    }

    #[instrument(skip(self, binding), fields(user_id = %binding.user_id, index = binding.derivation_index))]
    async fn insert_user_binding(
        &self,
        binding: &NewUserBinding,
    ) -> Result<UserBinding, AppError> {
        let index = i32::try_from(binding.derivation_index).map_err(|_| {
            AppError::Database(DatabaseError::Query(format!(
                "derivation index out of range: {}",
                binding.derivation_index
            )))
        })?;

        let row = sqlx::query(concat!(
            "INSERT INTO user_bindings (user_id, derivation_index, address, encrypted_private_key) \
             VALUES ($1, $2, $3, $4) \
             RETURNING ",
            binding_columns!()
        ))
        .bind(&binding.user_id)
        .bind(index)
        .bind(hex_string(binding.address))
        .bind(&binding.encrypted_private_key)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Self::row_to_binding(&row)
    }

    #[instrument(skip(self))]
    async fn get_user_binding(&self, user_id: &str) -> Result<Option<UserBinding>, AppError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            binding_columns!(),
            " FROM user_bindings WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_binding).transpose()
    }

    #[instrument(skip(self))]
    async fn find_user_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<UserBinding>, AppError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            binding_columns!(),
            " FROM user_bindings WHERE address = $1"
        ))
        .bind(hex_string(address))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_binding).transpose()
    }

    #[instrument(skip(self))]
    async fn list_user_bindings(&self, limit: i64) -> Result<Vec<UserBinding>, AppError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            binding_columns!(),
            " FROM user_bindings ORDER BY derivation_index ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_binding).collect()
    }

    #[instrument(skip(self, deposit), fields(tx_hash = %deposit.tx_hash, user_id = %deposit.user_id))]
    async fn insert_deposit(&self, deposit: &NewDeposit) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposits (
                tx_hash, user_id, from_address, to_address, amount, block_number,
                confirmations, status, missed_checks
            )
            VALUES ($1, $2, $3, $4, $5::numeric, $6, 0, 'pending', 0)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(hex_string(deposit.tx_hash))
        .bind(&deposit.user_id)
        .bind(hex_string(deposit.from_address))
        .bind(hex_string(deposit.to_address))
        .bind(deposit.amount.to_string())
        .bind(to_i64(deposit.block_number, "block_number")?)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn get_deposit(&self, tx_hash: &TxHash) -> Result<Option<Deposit>, AppError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            deposit_columns!(),
            " FROM deposits WHERE tx_hash = $1"
        ))
        .bind(hex_string(tx_hash))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_deposit).transpose()
    }

    #[instrument(skip(self))]
    async fn get_pending_deposits(&self, limit: i64) -> Result<Vec<Deposit>, AppError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            deposit_columns!(),
            " FROM deposits WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_deposit).collect()
    }

    #[instrument(skip(self))]
    async fn list_user_deposits(
        &self,
        user_id: &str,
        status: Option<DepositStatus>,
    ) -> Result<Vec<Deposit>, AppError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            deposit_columns!(),
            " FROM deposits \
             WHERE user_id = $1 AND ($2::text IS NULL OR status = $2::text) \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_deposit).collect()
    }

    #[instrument(skip(self))]
    async fn list_deposits(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
    ) -> Result<Vec<Deposit>, AppError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            deposit_columns!(),
            " FROM deposits \
             WHERE ($1::text IS NULL OR status = $1::text) \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_deposit).collect()
    }

    #[instrument(skip(self))]
    async fn update_confirmations(
        &self,
        tx_hash: &TxHash,
        confirmations: u64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deposits
            SET confirmations = $2,
                missed_checks = 0,
                updated_at = NOW()
            WHERE tx_hash = $1 AND status = 'pending'
            "#,
        )
        .bind(hex_string(tx_hash))
        .bind(to_i64(confirmations, "confirmations")?)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn record_missing_receipt(&self, tx_hash: &TxHash) -> Result<u32, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE deposits
            SET missed_checks = missed_checks + 1,
                updated_at = NOW()
            WHERE tx_hash = $1 AND status = 'pending'
            RETURNING missed_checks
            "#,
        )
        .bind(hex_string(tx_hash))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        match row {
            Some(row) => to_u32(get(&row, "missed_checks")?, "missed_checks"),
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn complete_deposit(
        &self,
        tx_hash: &TxHash,
        confirmations: u64,
    ) -> Result<Option<SweepJob>, AppError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let completed = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'completed',
                confirmations = $2,
                missed_checks = 0,
                updated_at = NOW()
            WHERE tx_hash = $1 AND status = 'pending'
            RETURNING user_id, to_address, amount::text AS amount
            "#,
        )
        .bind(hex_string(tx_hash))
        .bind(to_i64(confirmations, "confirmations")?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        let Some(completed) = completed else {
            tx.rollback().await.map_err(DatabaseError::from)?;
            debug!(tx_hash = %tx_hash, "Deposit already left pending");
            return Ok(None);
        };

        let user_id: String = get(&completed, "user_id")?;
        let child_address: String = get(&completed, "to_address")?;
        let amount: String = get(&completed, "amount")?;

        sqlx::query(
            r#"
            UPDATE user_bindings
            SET credited_balance = credited_balance + $2::numeric
            WHERE user_id = $1
            "#,
        )
        .bind(&user_id)
        .bind(&amount)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        let job = sqlx::query(concat!(
            "INSERT INTO sweep_jobs (id, deposit_tx_hash, user_id, child_address, amount, status) \
             VALUES ($1, $2, $3, $4, $5::numeric, 'pending') \
             ON CONFLICT (deposit_tx_hash) DO NOTHING \
             RETURNING ",
            sweep_job_columns!()
        ))
        .bind(Uuid::now_v7())
        .bind(hex_string(tx_hash))
        .bind(&user_id)
        .bind(&child_address)
        .bind(&amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        tx.commit().await.map_err(DatabaseError::from)?;

        job.as_ref().map(Self::row_to_sweep_job).transpose()
    }

    #[instrument(skip(self))]
    async fn fail_deposit(&self, tx_hash: &TxHash, reason: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'failed',
                failure_reason = $2,
                updated_at = NOW()
            WHERE tx_hash = $1 AND status = 'pending'
            "#,
        )
        .bind(hex_string(tx_hash))
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_last_processed_block(&self) -> Result<Option<u64>, AppError> {
        let row = sqlx::query("SELECT last_processed_block FROM listener_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        row.map(|row| to_u64(get(&row, "last_processed_block")?, "last_processed_block"))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn advance_last_processed_block(&self, block: u64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO listener_state (id, last_processed_block, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE
            SET last_processed_block = GREATEST(listener_state.last_processed_block, EXCLUDED.last_processed_block),
                updated_at = NOW()
            "#,
        )
        .bind(to_i64(block, "last_processed_block")?)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_next_sweep(&self, lease: Duration) -> Result<Option<SweepClaim>, AppError> {
        let token = Uuid::new_v4();
        let row = sqlx::query(concat!(
            "UPDATE sweep_jobs \
             SET locked_until = NOW() + make_interval(secs => $1), \
                 claim_token = $2, \
                 updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM sweep_jobs \
                 WHERE status = 'pending' AND (locked_until IS NULL OR locked_until < NOW()) \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING ",
            sweep_job_columns!()
        ))
        .bind(lease.as_secs_f64())
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref()
            .map(|row| {
                Ok(SweepClaim {
                    job: Self::row_to_sweep_job(row)?,
                    token,
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_sweep_job(&self, id: Uuid) -> Result<Option<SweepJob>, AppError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            sweep_job_columns!(),
            " FROM sweep_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_sweep_job).transpose()
    }

    #[instrument(skip(self))]
    async fn list_sweep_jobs(
        &self,
        status: Option<SweepStatus>,
        limit: i64,
    ) -> Result<Vec<SweepJob>, AppError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            sweep_job_columns!(),
            " FROM sweep_jobs \
             WHERE ($1::text IS NULL OR status = $1::text) \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_sweep_job).collect()
    }

    #[instrument(skip(self))]
    async fn record_gas_topup(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET gas_topup_tx_hash = $3, updated_at = NOW()
            WHERE id = $1 AND claim_token = $2 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(claim)
        .bind(hex_string(tx_hash))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn record_sweep_submission(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
        replaces: Option<&TxHash>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET sweep_tx_hash = $3, updated_at = NOW()
            WHERE id = $1
              AND claim_token = $2
              AND status = 'pending'
              AND sweep_tx_hash IS NOT DISTINCT FROM $4::text
            "#,
        )
        .bind(id)
        .bind(claim)
        .bind(hex_string(tx_hash))
        .bind(replaces.map(hex_string))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_sweep_sent(
        &self,
        id: Uuid,
        claim: Uuid,
        tx_hash: &TxHash,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET status = 'sent',
                sweep_tx_hash = $3,
                last_error = NULL,
                locked_until = NULL,
                claim_token = NULL,
                updated_at = NOW()
            WHERE id = $1 AND claim_token = $2 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(claim)
        .bind(hex_string(tx_hash))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_sweep_failed(
        &self,
        id: Uuid,
        claim: Uuid,
        error: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET status = 'failed',
                last_error = $3,
                locked_until = NULL,
                claim_token = NULL,
                updated_at = NOW()
            WHERE id = $1 AND claim_token = $2 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(claim)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn requeue_sweep(&self, id: Uuid) -> Result<bool, AppError> {
        // Submitted hashes are kept so the next pass can resolve an earlier sweep first
        let result = sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET status = 'pending',
                locked_until = NULL,
                claim_token = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn requeue_failed_sweeps(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET status = 'pending',
                locked_until = NULL,
                claim_token = NULL,
                updated_at = NOW()
            WHERE status = 'failed'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> Result<LedgerStats, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM user_bindings) AS total_users,
                (SELECT COUNT(*) FROM deposits WHERE status = 'pending') AS pending_deposits,
                (SELECT COUNT(*) FROM deposits WHERE status = 'completed') AS completed_deposits,
                (SELECT COUNT(*) FROM deposits WHERE status = 'failed') AS failed_deposits,
                (SELECT COALESCE(SUM(amount), 0)::text FROM deposits WHERE status = 'completed') AS total_deposited,
                (SELECT COUNT(*) FROM sweep_jobs WHERE status = 'pending') AS pending_sweeps,
                (SELECT COUNT(*) FROM sweep_jobs WHERE status = 'sent') AS sent_sweeps,
                (SELECT COUNT(*) FROM sweep_jobs WHERE status = 'failed') AS failed_sweeps,
                (SELECT COALESCE(SUM(amount), 0)::text FROM sweep_jobs WHERE status = 'sent') AS total_swept,
                (SELECT last_processed_block FROM listener_state WHERE id = 1) AS last_processed_block
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let count = |column: &str| -> Result<u64, AppError> { to_u64(get(&row, column)?, column) };
        let last_processed_block: Option<i64> = get(&row, "last_processed_block")?;

        Ok(LedgerStats {
            total_users: count("total_users")?,
            pending_deposits: count("pending_deposits")?,
            completed_deposits: count("completed_deposits")?,
            failed_deposits: count("failed_deposits")?,
            total_deposited: parse::<U256>(&row, "total_deposited")?,
            pending_sweeps: count("pending_sweeps")?,
            sent_sweeps: count("sent_sweeps")?,
            failed_sweeps: count("failed_sweeps")?,
            total_swept: parse::<U256>(&row, "total_swept")?,
            last_processed_block: last_processed_block
                .map(|b| to_u64(b, "last_processed_block"))
                .transpose()?,
        })
    }
}
