//! # Ledger Engine
//!
//! Replication and admission engine for the registry chain and the service
//! chains that hang off it.
//!
//! ## Architecture
//!
//! ```text
//! transaction storage ──slices──→ Ledger<K>::build_meta_data
//!                                   │  hash-chain check (every entry)
//!                                   │  checkpoint gate (per store)
//!                                   │  apply → dirty set
//!                                   ↓
//!                          record stores (staged → commit + checkpoint)
//!                                   ↓
//!                               bounded caches ←── readers / admission
//! ```
//!
//! `Ledger<K>` is one engine generic over its `LedgerKind`:
//!
//! - `RegistryLedger` (`Ledger<RegistryState>`): registry accounts and chain
//!   registrations, block signature checks.
//! - `ServiceLedger` (`Ledger<ServiceState>`): service accounts of one chain
//!   and the transaction admission pipeline.
//!
//! ## Invariants
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | An entry is applied at most once | per-store checkpoint gate |
//! | Replay stops on the first broken link | `HashChainVerifier` |
//! | Stores only ever hold whole slices | staged writes, commit with checkpoint |
//! | Caches hold committed state only | publish after commit, clear on abort |
//! | One writer per ledger | writer lock around `build_meta_data` |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - cache, single-flight loader, dirty sets, hash chain, config,
//!   lifecycle, errors
//! - `ports/` - inbound API and outbound collaborator traits
//! - `adapters/` - in-memory and file-backed stores, ed25519, quorum, clocks
//! - `ledger/` - the engine and the two ledger kinds
//! - `validation/` - admission pipeline and feature handlers
//!
//! ## Usage
//!
//! ```ignore
//! use ledger_engine::{LedgerConfig, MemoryStorageProvider, RegistryLedger};
//!
//! let provider = MemoryStorageProvider::new();
//! let registry = RegistryLedger::new(LedgerConfig::default(), deps);
//! registry.initialize(&provider)?;
//! registry.catch_up(&transactions, 256)?;
//! registry.activate()?;
//!
//! let exists = registry.account_exists(42)?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ledger;
pub mod ports;
pub mod validation;

/// Key, log and registry fixtures for tests.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapters::{
    Ed25519NodeSigner, Ed25519Verifier, FileRecordStore, FileStorageProvider,
    ManualTimeSource, MemoryAttachmentStore, MemoryRecordStore, MemoryStorageProvider,
    MemoryTransactionStorage, SystemTimeSource, ThresholdQuorum,
};
pub use domain::{
    CacheConfig, HashChainVerifier, HashChainWriter, LedgerConfig, LedgerError, LedgerResult,
    LedgerState, SharedCache, SingleFlightLoader, StoreError, StoredTransaction,
    TransactionSlice, ValidationConfig,
};
pub use ledger::{
    Ledger, LedgerKind, RegistryDependencies, RegistryLedger, RegistryState, ReplayReport,
    ServiceDependencies, ServiceLedger, ServiceState, StoreSlot,
};
pub use ports::{
    AttachmentStore, NodeSigner, QuorumValidator, RecordLayout, RecordStore, RegistryView,
    ServiceHost, ServiceResponse, ServiceVerdict, SignatureVerifier, StorageProvider,
    TimeSource, TransactionAdmission, TransactionStorage,
};
pub use validation::{FeatureCheck, FeatureHandler, FeatureRegistry};
