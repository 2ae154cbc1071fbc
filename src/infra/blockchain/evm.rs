//! JSON-RPC client for an EVM chain and a single ERC-20 token.
//!
//! Reads go through one provider signing as the main wallet. Token sweeps are
//! signed by child keys, so each sweep builds a short-lived provider around
//! the decrypted child signer. Every network call is bounded by the
//! configured request timeout.

use std::fmt::Display;
use std::future::IntoFuture;
use std::str::FromStr;
use std::time::Duration;

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, BlockStream, BlockchainError, ChainClient, ConfigError, ReceiptInfo, TransferEvent,
    TransferStream, WalletError,
};

sol! {
    #[sol(rpc)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// Configuration for the EVM client
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// Upper bound for any single RPC call
    pub request_timeout: Duration,
    /// Poll interval of filter-based subscriptions over HTTP
    pub poll_interval: Duration,
    /// Fixed legacy gas price in wei; estimated by the node when unset
    pub gas_price: Option<u128>,
    /// Fixed gas limit for top-ups and token transfers; estimated when unset
    pub gas_limit: Option<u64>,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(4),
            gas_price: None,
            gas_limit: None,
        }
    }
}

/// EVM chain client bound to one token contract and the main wallet
pub struct EvmChainClient {
    provider: DynProvider,
    rpc_url: Url,
    token: Address,
    main_wallet: Address,
    config: EvmClientConfig,
}

impl EvmChainClient {
    /// Create a client. Nothing is contacted until the first call.
    pub fn new(
        rpc_url: &str,
        token: Address,
        main_wallet_key: &SecretString,
        config: EvmClientConfig,
    ) -> Result<Self, AppError> {
        let rpc_url = Url::parse(rpc_url).map_err(|e| ConfigError::InvalidValue {
            name: "RPC_URL".to_string(),
            message: e.to_string(),
        })?;
        let signer = parse_signer(main_wallet_key)?;
        let main_wallet = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.clone())
            .erased();

        info!(
            rpc_url = %rpc_url,
            token = %token,
            main_wallet = %main_wallet,
            "Created EVM chain client"
        );
        Ok(Self {
            provider,
            rpc_url,
            token,
            main_wallet,
            config,
        })
    }

    #[must_use]
    pub fn token_address(&self) -> Address {
        self.token
    }

    fn transfer_filter(&self) -> Filter {
        Filter::new()
            .address(self.token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
    }

    /// Main-wallet native transfer carrying the configured gas overrides
    fn native_transfer_request(&self, to: &Address, amount_wei: U256) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .with_to(*to)
            .with_value(amount_wei);
        if let Some(gas_price) = self.config.gas_price {
            tx = tx.with_gas_price(gas_price);
        }
        if let Some(gas_limit) = self.config.gas_limit {
            tx = tx.with_gas_limit(gas_limit);
        }
        tx
    }

    /// Run an RPC future under the request timeout, classifying failures
    async fn call<T, E, F>(&self, method: &'static str, fut: F) -> Result<T, AppError>
    where
        E: Display,
        F: IntoFuture<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.config.request_timeout, fut.into_future()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_rpc_error(method, e)),
            Err(_) => Err(AppError::Blockchain(BlockchainError::Timeout(format!(
                "{} exceeded {}s",
                method,
                self.config.request_timeout.as_secs()
            )))),
        }
    }
}

fn parse_signer(private_key: &SecretString) -> Result<PrivateKeySigner, AppError> {
    let key = private_key.expose_secret().trim();
    if key.is_empty() {
        return Err(WalletError::InvalidKey("private key is empty".to_string()).into());
    }
    PrivateKeySigner::from_str(key).map_err(|e| WalletError::InvalidKey(e.to_string()).into())
}

/// Map an alloy transport or contract error onto the domain taxonomy
fn classify_rpc_error(method: &str, error: impl Display) -> AppError {
    let message = error.to_string();
    let lower = message.to_lowercase();

    let kind = if lower.contains("insufficient funds") {
        BlockchainError::InsufficientFunds
    } else if lower.contains("execution reverted") {
        BlockchainError::Reverted(format!("{}: {}", method, message))
    } else if lower.contains("connection") || lower.contains("error sending request") {
        BlockchainError::Connection(format!("{}: {}", method, message))
    } else if lower.contains("deserialization") || lower.contains("deserialize") {
        BlockchainError::InvalidResponse(format!("{}: {}", method, message))
    } else {
        BlockchainError::RpcError(format!("{}: {}", method, message))
    };
    AppError::Blockchain(kind)
}

/// Decode a log into a transfer event. Removed or incomplete logs are skipped.
fn decode_transfer(log: &Log) -> Option<TransferEvent> {
    if log.removed {
        return None;
    }
    let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number) else {
        debug!("Skipping transfer log without inclusion data");
        return None;
    };

    match log.log_decode::<IERC20::Transfer>() {
        Ok(decoded) => {
            let transfer = decoded.inner.data;
            Some(TransferEvent {
                tx_hash,
                block_number,
                log_index: log.log_index.unwrap_or_default(),
                from: transfer.from,
                to: transfer.to,
                value: transfer.value,
            })
        }
        Err(e) => {
            warn!(tx_hash = %tx_hash, error = %e, "Undecodable transfer log");
            None
        }
    }
}

fn decode_batch(logs: &[Log]) -> Vec<TransferEvent> {
    let mut events: Vec<TransferEvent> = logs.iter().filter_map(decode_transfer).collect();
    events.sort_by_key(|e| (e.block_number, e.log_index));
    events
}

#[async_trait]
impl ChainClient for EvmChainClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.block_number().await.map(|_| ())
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.call("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    #[instrument(skip(self))]
    async fn token_decimals(&self) -> Result<u8, AppError> {
        let token = IERC20::new(self.token, &self.provider);
        self.call("decimals", token.decimals().call()).await
    }

    #[instrument(skip(self))]
    async fn transfer_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AppError> {
        let filter = self
            .transfer_filter()
            .from_block(from_block)
            .to_block(to_block);
        let logs = self
            .call("eth_getLogs", self.provider.get_logs(&filter))
            .await?;

        let events = decode_batch(&logs);
        debug!(
            from_block,
            to_block,
            logs = logs.len(),
            transfers = events.len(),
            "Fetched transfer logs"
        );
        Ok(events)
    }

    async fn subscribe_transfers(&self) -> Result<TransferStream, AppError> {
        let poller = self
            .call("eth_newFilter", self.provider.watch_logs(&self.transfer_filter()))
            .await?;
        let logs = poller
            .with_poll_interval(self.config.poll_interval)
            .into_stream();
        let stream = StreamExt::map(logs, |logs| decode_batch(&logs));

        info!(token = %self.token, "Subscribed to token transfers");
        Ok(Box::pin(stream))
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, AppError> {
        let poller = self
            .call("eth_newBlockFilter", self.provider.watch_blocks())
            .await?;
        let hashes = poller
            .with_poll_interval(self.config.poll_interval)
            .into_stream();
        let stream = StreamExt::map(hashes, |_| ());
        Ok(Box::pin(stream))
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<ReceiptInfo>, AppError> {
        let receipt = self
            .call(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(*tx_hash),
            )
            .await?;

        // A receipt without a block is not yet canonical
        Ok(receipt.and_then(|r| {
            r.block_number().map(|block_number| ReceiptInfo {
                block_number,
                success: r.status(),
            })
        }))
    }

    async fn transaction_known(&self, tx_hash: &TxHash) -> Result<bool, AppError> {
        let tx = self
            .call(
                "eth_getTransactionByHash",
                self.provider.get_transaction_by_hash(*tx_hash),
            )
            .await?;
        Ok(tx.is_some())
    }

    async fn token_balance(&self, owner: &Address) -> Result<U256, AppError> {
        let token = IERC20::new(self.token, &self.provider);
        self.call("balanceOf", token.balanceOf(*owner).call()).await
    }

    async fn native_balance(&self, owner: &Address) -> Result<U256, AppError> {
        self.call("eth_getBalance", self.provider.get_balance(*owner))
            .await
    }

    fn main_wallet_address(&self) -> Address {
        self.main_wallet
    }

    #[instrument(skip(self), fields(to = %to, amount_wei = %amount_wei))]
    async fn send_native(&self, to: &Address, amount_wei: U256) -> Result<TxHash, AppError> {
        let tx = self.native_transfer_request(to, amount_wei);
        let pending = self
            .call("eth_sendTransaction", self.provider.send_transaction(tx))
            .await?;
        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, "Submitted native transfer");
        Ok(tx_hash)
    }

    #[instrument(skip(self, private_key), fields(to = %to, amount = %amount))]
    async fn send_token_transfer(
        &self,
        private_key: &SecretString,
        to: &Address,
        amount: U256,
    ) -> Result<TxHash, AppError> {
        let signer = parse_signer(private_key)?;
        let from = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(self.rpc_url.clone());

        let token = IERC20::new(self.token, &provider);
        let mut call = token.transfer(*to, amount);
        if let Some(gas_price) = self.config.gas_price {
            call = call.gas_price(gas_price);
        }
        if let Some(gas_limit) = self.config.gas_limit {
            call = call.gas(gas_limit);
        }

        let pending = self.call("transfer", call.send()).await?;
        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, from = %from, "Submitted token transfer");
        Ok(tx_hash)
    }
}
