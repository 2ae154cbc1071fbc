//! End-to-end pipeline scenarios on in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;

use deposit_sweeper::app::{
    ConfirmationTracker, DepositListener, DepositService, ListenerConfig, SweepConfig,
    SweepEngine, TrackerConfig,
};
use deposit_sweeper::domain::{
    ChainClient, DepositStatus, LedgerStore, SweepStatus, TransferEvent, UserBinding,
    format_token_amount, parse_token_amount,
};
use deposit_sweeper::infra::{DEFAULT_DERIVATION_PATH_PREFIX, HdWallet, SecretStore};
use deposit_sweeper::test_utils::{MockChainClient, MockLedgerStore};

const PHRASE: &str = "test test test test test test test test test test test junk";
const DEPOSIT_BLOCK: u64 = 1_000;
const TOKEN_DECIMALS: u8 = 6;

struct Pipeline {
    ledger: Arc<MockLedgerStore>,
    chain: Arc<MockChainClient>,
    secrets: Arc<SecretStore>,
    service: DepositService,
    listener: Arc<DepositListener>,
    tracker: ConfirmationTracker,
    engine: SweepEngine,
}

fn pipeline() -> Pipeline {
    let ledger = Arc::new(MockLedgerStore::new());
    let chain = Arc::new(MockChainClient::new());
    chain.set_head(DEPOSIT_BLOCK);
    let wallet = Arc::new(
        HdWallet::from_mnemonic(
            &SecretString::from(PHRASE.to_string()),
            DEFAULT_DERIVATION_PATH_PREFIX,
        )
        .unwrap(),
    );
    let secrets =
        Arc::new(SecretStore::new(&SecretString::from("pipeline-secret".to_string())).unwrap());

    let service = DepositService::new(
        ledger.clone(),
        chain.clone(),
        wallet,
        Arc::clone(&secrets),
        TOKEN_DECIMALS,
    );
    let listener = Arc::new(DepositListener::new(
        ledger.clone(),
        chain.clone(),
        ListenerConfig {
            start_block: Some(DEPOSIT_BLOCK),
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        },
    ));
    let tracker = ConfirmationTracker::new(ledger.clone(), chain.clone(), TrackerConfig::default());
    let engine = SweepEngine::new(
        ledger.clone(),
        chain.clone(),
        Arc::clone(&secrets),
        SweepConfig::default(),
    );

    Pipeline {
        ledger,
        chain,
        secrets,
        service,
        listener,
        tracker,
        engine,
    }
}

fn transfer(byte: u8, to: Address, value: u64, block: u64) -> TransferEvent {
    TransferEvent {
        tx_hash: TxHash::repeat_byte(byte),
        block_number: block,
        log_index: 0,
        from: Address::repeat_byte(0x99),
        to,
        value: U256::from(value),
    }
}

/// Put a transfer on chain: the token arrives at `to` and the tx is mined
fn land_transfer(p: &Pipeline, event: &TransferEvent) {
    p.chain.push_event(event.clone());
    p.chain.set_receipt(event.tx_hash, event.block_number, true);
    let balance = p.chain.token_balance_of(&event.to);
    p.chain.set_token_balance(event.to, balance + event.value);
}

async fn provision(p: &Pipeline, user_id: &str) -> UserBinding {
    p.service.provision_user(user_id).await.unwrap()
}

#[tokio::test]
async fn test_deposit_flows_from_transfer_to_main_wallet() {
    let p = pipeline();
    let alice = provision(&p, "alice").await;
    let fifty = parse_token_amount("50.0", TOKEN_DECIMALS).unwrap();
    let deposit = transfer(0x01, alice.address, fifty.to::<u64>(), DEPOSIT_BLOCK);
    land_transfer(&p, &deposit);

    let report = p.listener.catch_up().await.unwrap();
    assert_eq!(report.recorded, 1);
    let status = p.service.get_transaction_status(&deposit.tx_hash).await.unwrap();
    assert_eq!(status.status, DepositStatus::Pending);

    // N + 2: not yet final
    p.chain.set_head(DEPOSIT_BLOCK + 2);
    p.tracker.process_tick().await.unwrap();
    assert_eq!(
        p.service.get_transaction_status(&deposit.tx_hash).await.unwrap().status,
        DepositStatus::Pending
    );
    assert_eq!(p.service.get_credited_balance("alice").await.unwrap(), U256::ZERO);

    // N + 3: completed and credited
    p.chain.set_head(DEPOSIT_BLOCK + 3);
    p.tracker.process_tick().await.unwrap();
    let status = p.service.get_transaction_status(&deposit.tx_hash).await.unwrap();
    assert_eq!(status.status, DepositStatus::Completed);
    assert_eq!(status.confirmations, 3);
    let credited = p.service.get_credited_balance("alice").await.unwrap();
    assert_eq!(credited, fifty);
    assert_eq!(format_token_amount(credited, TOKEN_DECIMALS), "50.000000");
    assert!(p.service.list_pending_deposits("alice").await.unwrap().is_empty());

    let report = p.engine.process_pending().await.unwrap();
    assert_eq!(report.sent, 1);

    // Gas top-up went out before the token transfer
    let topups = p.chain.native_sends();
    let sends = p.chain.token_sends();
    assert_eq!(topups.len(), 1);
    assert_eq!(sends.len(), 1);
    assert_eq!(topups[0].to, alice.address);
    assert!(topups[0].tx_hash < sends[0].tx_hash);

    let main = p.chain.main_wallet_address();
    assert_eq!(p.chain.token_balance_of(&main), fifty);
    assert_eq!(p.chain.token_balance_of(&alice.address), U256::ZERO);

    let jobs = p.ledger.sweep_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, SweepStatus::Sent);
}

#[tokio::test]
async fn test_live_and_catch_up_observations_record_once() {
    let p = pipeline();
    let alice = provision(&p, "alice").await;
    let (transfer_tx, block_tx) = p.chain.enable_subscriptions();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = Arc::clone(&p.listener);
    let handle = tokio::spawn(async move { listener.run(shutdown_rx).await });

    let initial_scan = async {
        while p.chain.log_queries().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), initial_scan)
        .await
        .unwrap();

    let deposit = transfer(0x02, alice.address, 700, DEPOSIT_BLOCK + 1);
    land_transfer(&p, &deposit);
    p.chain.set_head(DEPOSIT_BLOCK + 1);

    transfer_tx.send(vec![deposit.clone()]).unwrap();
    block_tx.send(()).unwrap();

    let scanned = async {
        while !p
            .chain
            .log_queries()
            .iter()
            .any(|&(_, to)| to == DEPOSIT_BLOCK + 1)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), scanned)
        .await
        .unwrap();

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let deposits = p.ledger.deposits();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].tx_hash, deposit.tx_hash);
    assert_eq!(deposits[0].amount, U256::from(700u64));
}

#[tokio::test]
async fn test_transfer_to_unknown_address_leaves_no_rows() {
    let p = pipeline();
    provision(&p, "alice").await;
    land_transfer(&p, &transfer(0x03, Address::repeat_byte(0x42), 1_000, DEPOSIT_BLOCK));

    let report = p.listener.catch_up().await.unwrap();
    assert_eq!(report.recorded, 0);
    assert!(p.ledger.deposits().is_empty());
}

#[tokio::test]
async fn test_repeated_ticks_credit_once() {
    let p = pipeline();
    let alice = provision(&p, "alice").await;
    land_transfer(&p, &transfer(0x04, alice.address, 900, DEPOSIT_BLOCK));
    p.listener.catch_up().await.unwrap();

    p.chain.set_head(DEPOSIT_BLOCK + 10);
    for _ in 0..5 {
        p.tracker.process_tick().await.unwrap();
    }

    assert_eq!(
        p.service.get_credited_balance("alice").await.unwrap(),
        U256::from(900u64)
    );
    assert_eq!(p.ledger.sweep_jobs().len(), 1);
}

#[tokio::test]
async fn test_failed_topup_never_sends_tokens() {
    let p = pipeline();
    let alice = provision(&p, "alice").await;
    land_transfer(&p, &transfer(0x05, alice.address, 300, DEPOSIT_BLOCK));
    p.listener.catch_up().await.unwrap();
    p.chain.set_head(DEPOSIT_BLOCK + 3);
    p.tracker.process_tick().await.unwrap();

    p.chain.set_revert_topups(true);
    let report = p.engine.process_pending().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(p.chain.token_sends().is_empty());
    assert_eq!(p.chain.token_balance_of(&alice.address), U256::from(300u64));

    // Credit stands even though the sweep failed
    assert_eq!(
        p.service.get_credited_balance("alice").await.unwrap(),
        U256::from(300u64)
    );

    // Operator requeues once gas is available again
    p.chain.set_revert_topups(false);
    let job = p.ledger.sweep_jobs()[0].clone();
    p.service.requeue_sweep(job.id).await.unwrap();
    let report = p.engine.process_pending().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(
        p.chain.token_balance_of(&p.chain.main_wallet_address()),
        U256::from(300u64)
    );
}

#[tokio::test]
async fn test_undecryptable_key_is_never_signed_with() {
    let p = pipeline();
    assert!(p.secrets.decrypt("").expose_secret().is_empty());

    // Binding whose stored key was sealed under a different secret
    let other = SecretStore::new(&SecretString::from("rotated".to_string())).unwrap();
    let alice = provision(&p, "alice").await;
    let key = p.secrets.decrypt(&alice.encrypted_private_key);
    let foreign_envelope = other.encrypt(&key).unwrap();
    p.ledger
        .seed_binding("alice", alice.derivation_index, alice.address, &foreign_envelope);

    land_transfer(&p, &transfer(0x06, alice.address, 100, DEPOSIT_BLOCK));
    p.listener.catch_up().await.unwrap();
    p.chain.set_head(DEPOSIT_BLOCK + 3);
    p.tracker.process_tick().await.unwrap();

    let report = p.engine.process_pending().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(p.chain.native_sends().is_empty());
    assert!(p.chain.token_sends().is_empty());
    assert!(
        p.ledger.sweep_jobs()[0]
            .last_error
            .as_ref()
            .unwrap()
            .contains("could not be decrypted")
    );
}

#[tokio::test]
async fn test_reorged_deposit_fails_without_credit() {
    let p = pipeline();
    let alice = provision(&p, "alice").await;
    let deposit = transfer(0x07, alice.address, 100, DEPOSIT_BLOCK);
    land_transfer(&p, &deposit);
    p.listener.catch_up().await.unwrap();

    p.chain.remove_receipt(&deposit.tx_hash);
    p.chain.set_head(DEPOSIT_BLOCK + 30);
    for _ in 0..TrackerConfig::default().receipt_grace_checks {
        p.tracker.process_tick().await.unwrap();
    }

    let status = p.service.get_transaction_status(&deposit.tx_hash).await.unwrap();
    assert_eq!(status.status, DepositStatus::Failed);
    assert_eq!(p.service.get_credited_balance("alice").await.unwrap(), U256::ZERO);
    assert!(p.ledger.sweep_jobs().is_empty());
}
