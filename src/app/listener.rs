//! Deposit listener: turns token transfer events into pending deposits.
//!
//! Live events and historical catch-up feed the same `handle_transfer` path.
//! The ledger's unique transaction hash makes the two sources safe to overlap.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, BlockStream, ChainClient, LedgerStore, NewDeposit, TransferEvent, TransferStream,
};

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Smallest accepted deposit in raw token units
    pub min_deposit: U256,
    /// Largest inclusive block window per log query
    pub max_block_range: u64,
    /// First block to scan when no watermark exists; defaults to the head
    pub start_block: Option<u64>,
    /// Catch-up interval when live subscriptions are unavailable
    pub poll_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            min_deposit: U256::from(1u64),
            max_block_range: 2_000,
            start_block: None,
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// What happened to a single transfer event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Recorded,
    Duplicate,
    UnknownAddress,
    BelowMinimum,
}

/// Summary of one catch-up scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub from_block: u64,
    pub to_block: u64,
    pub windows: u32,
    pub recorded: usize,
    pub duplicates: usize,
}

/// In-memory cache of deposit address → user id.
///
/// Only positive lookups are cached; an address provisioned after a miss is
/// found on the next event.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: DashMap<Address, String>,
}

impl AddressBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<String> {
        self.entries.get(address).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, address: Address, user_id: String) {
        self.entries.insert(address, user_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Watches the token contract and records deposits into known addresses
pub struct DepositListener {
    ledger: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    config: ListenerConfig,
    address_book: AddressBook,
}

impl DepositListener {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            config,
            address_book: AddressBook::new(),
        }
    }

    #[must_use]
    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    async fn resolve_user(&self, address: &Address) -> Result<Option<String>, AppError> {
        if let Some(user_id) = self.address_book.get(address) {
            return Ok(Some(user_id));
        }
        let binding = self.ledger.find_user_by_address(address).await?;
        Ok(binding.map(|b| {
            self.address_book.insert(b.address, b.user_id.clone());
            b.user_id
        }))
    }

    /// Record one transfer event as a pending deposit if it targets a user
    pub async fn handle_transfer(&self, event: &TransferEvent) -> Result<TransferOutcome, AppError> {
        let Some(user_id) = self.resolve_user(&event.to).await? else {
            debug!(to = %event.to, tx_hash = %event.tx_hash, "Transfer to unknown address ignored");
            return Ok(TransferOutcome::UnknownAddress);
        };

        if event.value < self.config.min_deposit {
            info!(
                tx_hash = %event.tx_hash,
                user_id = %user_id,
                amount = %event.value,
                min_deposit = %self.config.min_deposit,
                "Deposit below minimum ignored"
            );
            return Ok(TransferOutcome::BelowMinimum);
        }

        let deposit = NewDeposit::from_event(event, user_id);
        if self.ledger.insert_deposit(&deposit).await? {
            info!(
                tx_hash = %deposit.tx_hash,
                user_id = %deposit.user_id,
                amount = %deposit.amount,
                block = deposit.block_number,
                "Deposit detected"
            );
            Ok(TransferOutcome::Recorded)
        } else {
            debug!(tx_hash = %deposit.tx_hash, "Deposit already recorded");
            Ok(TransferOutcome::Duplicate)
        }
    }

    /// Scan from the watermark to the head in bounded windows
    #[instrument(skip(self))]
    pub async fn catch_up(&self) -> Result<CatchUpReport, AppError> {
        let head = self.chain.block_number().await?;
        let from_block = match self.ledger.get_last_processed_block().await? {
            Some(watermark) => watermark,
            None => self.config.start_block.unwrap_or(head),
        };

        let mut report = CatchUpReport {
            from_block,
            to_block: head,
            ..Default::default()
        };
        if from_block > head {
            debug!(from_block, head, "Watermark ahead of head, nothing to scan");
            return Ok(report);
        }

        let span = self.config.max_block_range.max(1) - 1;
        let mut start = from_block;
        loop {
            let end = start.saturating_add(span).min(head);
            let events = self.chain.transfer_events(start, end).await?;
            for event in &events {
                match self.handle_transfer(event).await? {
                    TransferOutcome::Recorded => report.recorded += 1,
                    TransferOutcome::Duplicate => report.duplicates += 1,
                    TransferOutcome::UnknownAddress | TransferOutcome::BelowMinimum => {}
                }
            }
            self.ledger.advance_last_processed_block(end).await?;
            report.windows += 1;

            if end >= head {
                break;
            }
            start = end + 1;
        }

        Ok(report)
    }

    async fn catch_up_logged(&self) {
        match self.catch_up().await {
            Ok(report) if report.recorded > 0 => {
                info!(
                    from_block = report.from_block,
                    to_block = report.to_block,
                    recorded = report.recorded,
                    "Catch-up recorded deposits"
                );
            }
            Ok(report) => {
                debug!(
                    from_block = report.from_block,
                    to_block = report.to_block,
                    windows = report.windows,
                    "Catch-up complete"
                );
            }
            Err(e) if e.is_transient() => warn!(error = %e, "Catch-up failed, retrying later"),
            Err(e) => error!(error = %e, "Catch-up failed"),
        }
    }

    /// Run until shutdown: initial catch-up, then live events with a
    /// catch-up per new block, or interval catch-up without subscriptions.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_block_range = self.config.max_block_range,
            min_deposit = %self.config.min_deposit,
            "Deposit listener started"
        );
        self.catch_up_logged().await;

        let subscriptions = match (
            self.chain.subscribe_transfers().await,
            self.chain.subscribe_blocks().await,
        ) {
            (Ok(transfers), Ok(blocks)) => Some((transfers, blocks)),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Live subscriptions unavailable, polling instead");
                None
            }
        };

        let fall_back = match subscriptions {
            Some((transfers, blocks)) => self.run_live(transfers, blocks, &mut shutdown).await,
            None => true,
        };
        if fall_back {
            self.run_polling(&mut shutdown).await;
        }

        info!("Deposit listener stopped");
    }

    /// Returns `true` when a stream ended and polling should take over
    async fn run_live(
        &self,
        mut transfers: TransferStream,
        mut blocks: BlockStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        info!("Listening for live transfers");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                batch = transfers.next() => match batch {
                    Some(events) => {
                        for event in &events {
                            if let Err(e) = self.handle_transfer(event).await {
                                error!(tx_hash = %event.tx_hash, error = %e, "Failed to record live transfer");
                            }
                        }
                    }
                    None => {
                        warn!("Transfer subscription ended");
                        return true;
                    }
                },
                block = blocks.next() => match block {
                    Some(()) => self.catch_up_logged().await,
                    None => {
                        warn!("Block subscription ended");
                        return true;
                    }
                },
            }
        }
    }

    async fn run_polling(&self, shutdown: &mut watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.catch_up_logged().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
