//! Replay, recovery and lifecycle scenarios for the registry and service
//! ledgers.

mod common;

use common::*;
use ledger_engine::{
    FileStorageProvider, HashChainWriter, LedgerConfig, LedgerError, LedgerState,
    MemoryStorageProvider, MemoryTransactionStorage, RegistryLedger, TransactionSlice,
    TransactionStorage,
};
use ledger_types::{BinaryRecord, ChainInfoOperation, DataPayload, CORE_ACCOUNT_KEY_INDEX};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;

fn registry(provider: &dyn ledger_engine::StorageProvider) -> RegistryLedger {
    init_tracing();
    let ledger = RegistryLedger::new(LedgerConfig::default(), registry_deps());
    ledger.initialize(provider).unwrap();
    ledger
}

/// Four account operations in one block: ids 1 to 4.
fn four_accounts() -> TransactionSlice {
    let mut log = LogBuilder::new();
    for account in 1..=4u64 {
        log.push(account_op(1_000 + account, account, account as u8));
    }
    log.slice()
}

// =============================================================================
// IDEMPOTENCE
// =============================================================================

#[test]
fn test_replaying_same_slice_changes_nothing() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);
    let slice = log.slice();

    let first = ledger.build_meta_data(&slice).unwrap();
    assert_eq!(first.applied, 3);
    let owner = ledger.get_account(OWNER).unwrap().unwrap();
    let chain = ledger.get_chain_info(SERVICE_CHAIN).unwrap().unwrap();

    let second = ledger.build_meta_data(&slice).unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.checkpoint, first.checkpoint);
    assert_eq!(ledger.checkpoint().unwrap(), first.checkpoint);

    ledger.clear_meta_data();
    assert_eq!(ledger.get_account(OWNER).unwrap().unwrap(), owner);
    assert_eq!(ledger.get_chain_info(SERVICE_CHAIN).unwrap().unwrap(), chain);
}

#[test]
fn test_overlapping_slice_applies_only_new_entries() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let all = four_accounts().transactions;

    ledger
        .build_meta_data(&TransactionSlice::new(1, all[..2].to_vec()))
        .unwrap();
    let report = ledger
        .build_meta_data(&TransactionSlice::new(2, all[1..].to_vec()))
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 2);
    assert_eq!(report.checkpoint.last_transaction_id, 4);
    for account in 1..=4 {
        assert!(ledger.account_exists(account).unwrap());
    }
}

// =============================================================================
// TAMPER DETECTION
// =============================================================================

#[test]
fn test_every_flipped_byte_fails_the_ledger() {
    let clean = four_accounts();
    let target = 1;

    for position in 0..clean.transactions[target].raw.len() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry(&provider);
        let mut tampered = clean.clone();
        tampered.transactions[target].raw[position] ^= 0x01;

        let err = ledger.build_meta_data(&tampered).unwrap_err();
        assert!(err.is_fatal(), "byte {}: {}", position, err);
        assert_eq!(ledger.state(), LedgerState::Failed);
        assert!(matches!(
            ledger.get_account(1),
            Err(LedgerError::NotReadable(LedgerState::Failed))
        ));
        assert!(matches!(
            ledger.build_meta_data(&clean),
            Err(LedgerError::InvalidState { .. })
        ));

        ledger.rebuild(&provider).unwrap();
        assert_eq!(ledger.state(), LedgerState::Replaying);
        assert_eq!(ledger.checkpoint().unwrap().last_transaction_id, 0);
        assert!(!ledger.account_exists(1).unwrap());
    }
}

#[test]
fn test_rebuild_resumes_from_last_committed_slice() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);
    let committed = ledger.build_meta_data(&log.slice()).unwrap().checkpoint;

    log.push(account_op(2_000, 9, 9));
    log.push(account_op(2_000, 10, 10));
    let next = log.slice();
    let mut broken = next.clone();
    broken.transactions[0].raw[0] ^= 0xFF;

    assert!(ledger.build_meta_data(&broken).is_err());
    assert_eq!(ledger.state(), LedgerState::Failed);
    assert!(matches!(
        ledger.activate(),
        Err(LedgerError::InvalidState { .. })
    ));

    ledger.rebuild(&provider).unwrap();
    assert_eq!(ledger.checkpoint().unwrap(), committed);
    assert!(ledger.account_exists(OWNER).unwrap());
    assert!(!ledger.account_exists(9).unwrap());

    let report = ledger.build_meta_data(&next).unwrap();
    assert_eq!(report.applied, 2);
    ledger.activate().unwrap();
    assert!(ledger.account_exists(10).unwrap());
}

#[test]
fn test_rebuild_only_from_failed() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    assert!(matches!(
        ledger.rebuild(&provider),
        Err(LedgerError::InvalidState {
            operation: "rebuild",
            state: LedgerState::Replaying
        })
    ));
}

// =============================================================================
// CACHES
// =============================================================================

#[test]
fn test_cleared_caches_reload_identical_records() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);
    ledger.build_meta_data(&log.slice()).unwrap();

    let account = ledger.get_account(USER).unwrap().unwrap();
    let chain = ledger.get_chain_info(SERVICE_CHAIN).unwrap().unwrap();
    assert!(Arc::ptr_eq(&account, &ledger.get_account(USER).unwrap().unwrap()));

    ledger.clear_meta_data();

    let reloaded_account = ledger.get_account(USER).unwrap().unwrap();
    let reloaded_chain = ledger.get_chain_info(SERVICE_CHAIN).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&account, &reloaded_account));
    assert_eq!(account.to_bytes().unwrap(), reloaded_account.to_bytes().unwrap());
    assert_eq!(chain.to_bytes().unwrap(), reloaded_chain.to_bytes().unwrap());
}

#[test]
fn test_failed_commit_leaves_caches_and_stores_untouched() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let mut log = LogBuilder::new();
    log.push(account_op(1_000, OWNER, 1));
    ledger.build_meta_data(&log.slice()).unwrap();

    provider
        .store(ledger_engine::ledger::registry::ACCOUNTS_STORE)
        .unwrap()
        .set_fail_commits(true);
    log.push(account_op(1_001, USER, 42));
    let slice = log.slice();

    let err = ledger.build_meta_data(&slice).unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(ledger.state(), LedgerState::Replaying);
    assert!(!ledger.account_exists(USER).unwrap());

    provider
        .store(ledger_engine::ledger::registry::ACCOUNTS_STORE)
        .unwrap()
        .set_fail_commits(false);
    assert_eq!(ledger.build_meta_data(&slice).unwrap().applied, 1);
    assert!(ledger.account_exists(USER).unwrap());
}

// =============================================================================
// RESTART
// =============================================================================

#[test]
fn test_restart_from_files_keeps_checkpoint() {
    let dir = tempdir().unwrap();
    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);

    let committed = {
        let ledger = registry(&FileStorageProvider::new(dir.path()));
        ledger.build_meta_data(&log.slice()).unwrap().checkpoint
    };

    let provider = FileStorageProvider::new(dir.path());
    let ledger = registry(&provider);
    assert_eq!(ledger.checkpoint().unwrap(), committed);
    assert!(ledger.account_exists(USER).unwrap());
    let chain = ledger.get_chain_info(SERVICE_CHAIN).unwrap().unwrap();
    assert_eq!(chain.account_id, OWNER);

    log.push(chain_op(
        2_000,
        ChainInfoOperation::update(SERVICE_CHAIN, OWNER).with_endpoint("tcp://service-b:7000"),
    ));
    assert_eq!(ledger.build_meta_data(&log.slice()).unwrap().applied, 1);
    let chain = ledger.get_chain_info(SERVICE_CHAIN).unwrap().unwrap();
    assert_eq!(chain.endpoints.len(), 2);
}

#[test]
fn test_slice_must_continue_checkpoint_hash() {
    let dir = tempdir().unwrap();
    let provider = FileStorageProvider::new(dir.path());
    let ledger = registry(&provider);
    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);
    let committed = ledger.build_meta_data(&log.slice()).unwrap().checkpoint;

    let mut forged = HashChainWriter::resume(committed.last_transaction_id, [9u8; 32]);
    let stored = forged.seal(2, account_op(2_000, 77, 77)).unwrap();
    let slice = TransactionSlice::new(2, vec![stored]);

    assert!(matches!(
        ledger.build_meta_data(&slice),
        Err(LedgerError::HashChainBroken { transaction_id: 4, .. })
    ));
    assert_eq!(ledger.state(), LedgerState::Failed);

    ledger.rebuild(&provider).unwrap();
    assert_eq!(ledger.checkpoint().unwrap(), committed);
}

#[test]
fn test_overlapping_slice_must_repeat_the_committed_entry() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let all = four_accounts().transactions;
    let committed = ledger
        .build_meta_data(&TransactionSlice::new(1, all[..2].to_vec()))
        .unwrap()
        .checkpoint;

    // Same ids, but entry 2 creates account 99 and entry 3 links to it.
    let mut other = LogBuilder::new();
    other.push(account_op(1_001, 1, 1));
    other.push(account_op(1_002, 99, 99));
    other.push(account_op(1_003, 77, 77));
    let rewritten = other.slice().transactions[1..].to_vec();

    assert!(matches!(
        ledger.build_meta_data(&TransactionSlice::new(2, rewritten)),
        Err(LedgerError::HashChainBroken { transaction_id: 2, .. })
    ));
    assert_eq!(ledger.state(), LedgerState::Failed);

    ledger.rebuild(&provider).unwrap();
    assert_eq!(ledger.checkpoint().unwrap(), committed);
    assert!(!ledger.account_exists(77).unwrap());
    assert!(!ledger.account_exists(99).unwrap());
}

#[test]
fn test_slice_after_a_gap_is_rejected() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let all = four_accounts().transactions;
    let committed = ledger
        .build_meta_data(&TransactionSlice::new(1, all[..2].to_vec()))
        .unwrap()
        .checkpoint;

    let mut skipping = HashChainWriter::resume(3, [9u8; 32]);
    let stored = skipping.seal(2, account_op(2_000, 77, 77)).unwrap();

    assert!(matches!(
        ledger.build_meta_data(&TransactionSlice::new(2, vec![stored])),
        Err(LedgerError::MissingEntries { after: 2, found: 4 })
    ));
    assert_eq!(ledger.state(), LedgerState::Failed);

    ledger.rebuild(&provider).unwrap();
    assert_eq!(ledger.checkpoint().unwrap(), committed);
    let report = ledger
        .build_meta_data(&TransactionSlice::new(2, all[2..].to_vec()))
        .unwrap();
    assert_eq!(report.applied, 2);
    assert!(!ledger.account_exists(77).unwrap());
}

#[test]
fn test_slice_boundary_checks_can_be_disabled() {
    init_tracing();
    let provider = MemoryStorageProvider::new();
    let ledger = RegistryLedger::new(
        LedgerConfig::default().with_slice_boundary_checks(false),
        registry_deps(),
    );
    ledger.initialize(&provider).unwrap();
    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);
    let committed = ledger.build_meta_data(&log.slice()).unwrap().checkpoint;

    let mut forged = HashChainWriter::resume(committed.last_transaction_id, [9u8; 32]);
    let stored = forged.seal(2, account_op(2_000, 77, 77)).unwrap();

    let report = ledger
        .build_meta_data(&TransactionSlice::new(2, vec![stored]))
        .unwrap();
    assert_eq!(report.applied, 1);
    assert!(ledger.account_exists(77).unwrap());
}

// =============================================================================
// CATCH-UP
// =============================================================================

#[test]
fn test_catch_up_replays_saved_history_only() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let storage = MemoryTransactionStorage::new();

    let mut log = LogBuilder::new();
    bootstrap_registry(&mut log);
    for stored in log.slice().transactions {
        storage.append(stored).unwrap();
    }
    log.push(account_op(2_000, 9, 9));
    log.push(account_op(2_000, 10, 10));
    for stored in log.slice().transactions {
        storage.append(stored).unwrap();
    }
    storage.save().unwrap();

    log.push(account_op(3_000, 11, 11));
    for stored in log.slice().transactions {
        storage.append(stored).unwrap();
    }

    assert_eq!(ledger.catch_up(&storage, 2).unwrap(), 5);
    assert_eq!(ledger.checkpoint().unwrap().last_transaction_id, 5);
    assert!(!ledger.account_exists(11).unwrap());
    assert_eq!(ledger.catch_up(&storage, 2).unwrap(), 0);

    storage.save().unwrap();
    assert_eq!(ledger.catch_up(&storage, 2).unwrap(), 1);
    assert!(ledger.account_exists(11).unwrap());
}

#[test]
fn test_service_ledger_replays_joins_and_stamps() {
    let mut network = Network::new();
    network.join(None);
    let account = network.service.get_service_account(USER).unwrap().unwrap();
    assert_eq!(account.last_transaction_id, 1);
    assert!(account.keys.is_empty());

    let data = core_signed(data_tx(
        USER,
        CORE_ACCOUNT_KEY_INDEX,
        NOW + 1,
        DataPayload::Data { content: vec![7] },
    ));
    network.commit(vec![data]);

    let account = network.service.get_service_account(USER).unwrap().unwrap();
    assert_eq!(account.last_transaction_id, 2);
    assert_eq!(network.service.checkpoint().unwrap().last_transaction_id, 2);

    assert_eq!(
        network
            .service
            .catch_up(network.transactions.as_ref(), 16)
            .unwrap(),
        0
    );
}

#[test]
fn test_service_join_twice_is_declined() {
    let mut network = Network::new();
    network.join(Some(service_key(1, 61, 0)));
    let key_before = network.service.get_service_account(USER).unwrap().unwrap();

    network.join(Some(service_key(2, 62, 0)));

    let account = network.service.get_service_account(USER).unwrap().unwrap();
    assert_eq!(account.keys, key_before.keys);
    assert_eq!(network.service.checkpoint().unwrap().last_transaction_id, 2);
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_stop_and_reinitialize() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    ledger.build_meta_data(&four_accounts()).unwrap();
    ledger.activate().unwrap();

    ledger.stop().unwrap();
    assert!(matches!(
        ledger.get_account(1),
        Err(LedgerError::NotReadable(LedgerState::Stopped))
    ));
    assert!(matches!(
        ledger.build_meta_data(&four_accounts()),
        Err(LedgerError::InvalidState { .. })
    ));

    ledger.initialize(&provider).unwrap();
    assert_eq!(ledger.checkpoint().unwrap().last_transaction_id, 4);
    assert!(ledger.account_exists(4).unwrap());
}

#[test]
fn test_failed_ledger_can_be_stopped() {
    let provider = MemoryStorageProvider::new();
    let ledger = registry(&provider);
    let all = four_accounts().transactions;
    ledger
        .build_meta_data(&TransactionSlice::new(1, all[..2].to_vec()))
        .unwrap();
    let mut tampered = TransactionSlice::new(2, all[2..].to_vec());
    tampered.transactions[0].raw[0] ^= 0xFF;
    assert!(ledger.build_meta_data(&tampered).is_err());
    assert_eq!(ledger.state(), LedgerState::Failed);

    ledger.stop().unwrap();
    assert_eq!(ledger.state(), LedgerState::Stopped);

    ledger.initialize(&provider).unwrap();
    assert_eq!(ledger.checkpoint().unwrap().last_transaction_id, 2);
    assert!(ledger.account_exists(2).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_cache_sweeper_exits_on_shutdown() {
    let provider = MemoryStorageProvider::new();
    let ledger = Arc::new(registry(&provider));
    let (shutdown, receiver) = watch::channel(false);

    let handle = ledger.spawn_cache_sweeper(receiver);
    tokio::time::sleep(Duration::from_secs(180)).await;
    assert!(!handle.is_finished());

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cache_sweeper_exits_after_stop() {
    let provider = MemoryStorageProvider::new();
    let ledger = Arc::new(registry(&provider));
    let (_shutdown, receiver) = watch::channel(false);

    let handle = ledger.spawn_cache_sweeper(receiver);
    ledger.stop().unwrap();

    tokio::time::timeout(Duration::from_secs(600), handle)
        .await
        .unwrap()
        .unwrap();
}
