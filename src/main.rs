//! Application entry point.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use deposit_sweeper::api::create_router;
use deposit_sweeper::app::{
    AppState, ConfirmationTracker, DepositListener, DepositService, ListenerConfig, SweepConfig,
    SweepEngine, TrackerConfig, WorkerHandle, spawn_confirmation_tracker, spawn_listener,
    spawn_sweep_engine,
};
use deposit_sweeper::domain::{ChainClient, LedgerStore, parse_token_amount};
use deposit_sweeper::infra::{
    DEFAULT_DERIVATION_PATH_PREFIX, EvmChainClient, EvmClientConfig, HdWallet, PostgresConfig,
    PostgresLedger, SecretStore,
};

/// Application configuration
struct Config {
    database_url: String,
    rpc_url: String,
    token_address: Address,
    main_wallet_key: SecretString,
    mnemonic: SecretString,
    encryption_key: SecretString,
    derivation_path: String,
    /// Human-readable, converted at the token's decimals after startup
    min_deposit_amount: String,
    host: String,
    port: u16,
    enable_background_worker: bool,
    listener: ListenerConfig,
    tracker: TrackerConfig,
    sweep: SweepConfig,
    evm: EvmClientConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let rpc_url = required("RPC_URL")?;
        let token_address = required("TOKEN_CONTRACT_ADDRESS")?
            .parse::<Address>()
            .context("TOKEN_CONTRACT_ADDRESS is not a valid address")?;
        let main_wallet_key = SecretString::from(required("MAIN_WALLET_PRIVATE_KEY")?);
        let mnemonic = SecretString::from(required("MNEMONIC")?);
        let encryption_key = SecretString::from(required("ENCRYPTION_KEY")?);

        let derivation_path = env::var("DERIVATION_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_DERIVATION_PATH_PREFIX.to_string());
        let min_deposit_amount = env::var("MIN_DEPOSIT_AMOUNT")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "1".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parsed_or("PORT", 3000)?;
        let enable_background_worker = env::var("ENABLE_BACKGROUND_WORKER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let listener_defaults = ListenerConfig::default();
        let listener = ListenerConfig {
            max_block_range: parsed_or("MAX_BLOCK_RANGE", listener_defaults.max_block_range)?,
            start_block: parsed_opt("LISTENER_START_BLOCK")?,
            ..listener_defaults
        };

        let tracker_defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            confirmations_required: parsed_or(
                "CONFIRMATIONS_REQUIRED",
                tracker_defaults.confirmations_required,
            )?,
            receipt_grace_checks: parsed_or(
                "RECEIPT_GRACE_CHECKS",
                tracker_defaults.receipt_grace_checks,
            )?,
            poll_interval: Duration::from_secs(parsed_or(
                "CONFIRMATION_POLL_SECS",
                tracker_defaults.poll_interval.as_secs(),
            )?),
            ..tracker_defaults
        };

        let sweep_defaults = SweepConfig::default();
        let sweep = SweepConfig {
            gas_reserve: parsed_or::<U256>("GAS_RESERVE_WEI", sweep_defaults.gas_reserve)?,
            gas_topup: parsed_or::<U256>("GAS_TOPUP_WEI", sweep_defaults.gas_topup)?,
            receipt_timeout: Duration::from_secs(parsed_or(
                "RECEIPT_TIMEOUT_SECS",
                sweep_defaults.receipt_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_secs(parsed_or(
                "SWEEP_POLL_SECS",
                sweep_defaults.poll_interval.as_secs(),
            )?),
            ..sweep_defaults
        };

        let evm_defaults = EvmClientConfig::default();
        let evm = EvmClientConfig {
            request_timeout: Duration::from_secs(parsed_or(
                "RPC_TIMEOUT_SECS",
                evm_defaults.request_timeout.as_secs(),
            )?),
            gas_price: parsed_opt("GAS_PRICE_WEI")?,
            gas_limit: parsed_opt("GAS_LIMIT")?,
            ..evm_defaults
        };

        Ok(Self {
            database_url,
            rpc_url,
            token_address,
            main_wallet_key,
            mnemonic,
            encryption_key,
            derivation_path,
            min_deposit_amount,
            host,
            port,
            enable_background_worker,
            listener,
            tracker,
            sweep,
            evm,
        })
    }
}

fn required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("{} environment variable is not set", name),
    }
}

fn parsed_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        _ => Ok(None),
    }
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parsed_opt(name)?.unwrap_or(default))
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    // Read ahead of Config so configuration errors are logged in the chosen format
    let json_logs = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    init_tracing(json_logs);

    info!("Deposit sweeper v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("Initializing infrastructure...");

    let ledger = PostgresLedger::new(&config.database_url, PostgresConfig::default())
        .await
        .context("Failed to connect to the ledger database")?;
    ledger
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;
    info!("   ✓ Database connected and migrations applied");

    let chain = EvmChainClient::new(
        &config.rpc_url,
        config.token_address,
        &config.main_wallet_key,
        config.evm.clone(),
    )
    .context("Failed to create chain client")?;
    let decimals = chain
        .token_decimals()
        .await
        .context("Failed to read token decimals")?;
    info!(
        token = %config.token_address,
        decimals,
        main_wallet = %chain.main_wallet_address(),
        "   ✓ Chain client ready"
    );

    let min_deposit = parse_token_amount(&config.min_deposit_amount, decimals)
        .context("MIN_DEPOSIT_AMOUNT is not a valid amount")?;

    let wallet = HdWallet::from_mnemonic(&config.mnemonic, config.derivation_path.clone())
        .context("MNEMONIC or DERIVATION_PATH is invalid")?;
    let secrets = SecretStore::new(&config.encryption_key).context("ENCRYPTION_KEY is invalid")?;
    info!(path = %wallet.path_for(0), "   ✓ Key derivation ready");

    let ledger: Arc<dyn LedgerStore> = Arc::new(ledger);
    let chain: Arc<dyn ChainClient> = Arc::new(chain);
    let secrets = Arc::new(secrets);

    let service = Arc::new(DepositService::new(
        Arc::clone(&ledger),
        Arc::clone(&chain),
        Arc::new(wallet),
        Arc::clone(&secrets),
        decimals,
    ));
    let app_state = Arc::new(AppState::new(service));

    let workers: Vec<WorkerHandle> = if config.enable_background_worker {
        let listener = DepositListener::new(
            Arc::clone(&ledger),
            Arc::clone(&chain),
            ListenerConfig {
                min_deposit,
                ..config.listener.clone()
            },
        );
        let tracker =
            ConfirmationTracker::new(Arc::clone(&ledger), Arc::clone(&chain), config.tracker.clone());
        let engine = SweepEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&chain),
            Arc::clone(&secrets),
            config.sweep.clone(),
        );
        info!(
            min_deposit = %min_deposit,
            confirmations = config.tracker.confirmations_required,
            "   ✓ Background workers started"
        );
        vec![
            spawn_listener(Arc::new(listener)),
            spawn_confirmation_tracker(Arc::new(tracker)),
            spawn_sweep_engine(Arc::new(engine)),
        ]
    } else {
        warn!("   ○ Background workers disabled");
        Vec::new()
    };

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Operator API listening on http://{}", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for worker in workers {
        info!(worker = worker.name, "Stopping worker");
        worker.stop().await;
    }

    info!("Shutdown complete");
    Ok(())
}
