//! Shared fixtures for unit and scenario tests.
//!
//! Enable with the `test-utils` feature outside this crate.

use crate::adapters::{Ed25519Verifier, MemoryStorageProvider, ThresholdQuorum};
use crate::domain::config::LedgerConfig;
use crate::domain::hash_chain::HashChainWriter;
use crate::domain::slice::{StoredTransaction, TransactionSlice};
use crate::ledger::{RegistryDependencies, RegistryLedger};
use ed25519_dalek::{Signer, SigningKey};
use ledger_types::{
    AccountId, AccountOperation, BlockId, ChainId, ChainInfoOperation, CoreOperation,
    CoreOperationPayload, LedgerEntry, PublicKey, Signature,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test writer; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_key(seed: u8) -> PublicKey {
    signing_key(seed).verifying_key().to_bytes()
}

pub fn sign(seed: u8, message: &[u8]) -> Signature {
    signing_key(seed).sign(message).to_bytes()
}

pub const GENESIS_SEED: u8 = 0xEE;

/// Builds a hash-linked log, one block at a time.
#[derive(Debug, Default)]
pub struct LogBuilder {
    writer: HashChainWriter,
    block_id: BlockId,
    pending: Vec<StoredTransaction>,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self {
            block_id: 1,
            ..Self::default()
        }
    }

    pub fn push<E: LedgerEntry>(&mut self, entry: E) -> u64 {
        let stored = self.writer.seal(self.block_id, entry).unwrap();
        let id = stored.transaction_id;
        self.pending.push(stored);
        id
    }

    /// Close the current block and return its transactions as a slice.
    pub fn slice(&mut self) -> TransactionSlice {
        let slice = TransactionSlice::new(self.block_id, std::mem::take(&mut self.pending));
        self.block_id += 1;
        slice
    }
}

pub fn account_op(timestamp: u64, account_id: AccountId, seed: u8) -> CoreOperation {
    CoreOperation::new(
        timestamp,
        CoreOperationPayload::Account(AccountOperation {
            account_id,
            public_key: public_key(seed),
        }),
    )
}

pub fn chain_op(timestamp: u64, op: ChainInfoOperation) -> CoreOperation {
    CoreOperation::new(timestamp, CoreOperationPayload::ChainInfo(op))
}

pub fn new_chain_op(timestamp: u64, chain_id: ChainId, owner: AccountId) -> CoreOperation {
    chain_op(
        timestamp,
        ChainInfoOperation::new_chain(chain_id, owner, format!("chain-{}", chain_id)),
    )
}

pub fn registry_deps() -> RegistryDependencies {
    RegistryDependencies {
        genesis_key: public_key(GENESIS_SEED),
        verifier: Arc::new(Ed25519Verifier),
        quorum: Arc::new(ThresholdQuorum::default()),
    }
}

/// A registry ledger initialized on `provider`, in `Replaying`.
pub fn registry_on(provider: &MemoryStorageProvider) -> RegistryLedger {
    init_tracing();
    let ledger = RegistryLedger::new(LedgerConfig::default(), registry_deps());
    ledger.initialize(provider).unwrap();
    ledger
}
