//! # Ledger Engine
//!
//! One engine, generic over the kind of ledger it replays. The engine owns the
//! lifecycle, the hash-chain check, the checkpoint gate and the commit
//! protocol; a `LedgerKind` owns its stores, caches and apply rules.
//!
//! ## Commit Protocol (per slice)
//!
//! 1. Every entry is decoded and checked against the hash chain, including
//!    entries at or below the checkpoint.
//! 2. Entries above the checkpoint are applied. Rules stage new and modified
//!    entities in the kind's dirty set; nothing reaches a store yet.
//! 3. After the slice is drained the dirty set is staged into the stores and
//!    each store commits its data together with the new checkpoint.
//! 4. Only then are the committed entities published into the caches.
//!
//! Any failure before step 3 completes discards the staged store writes and
//! drops the caches. Integrity failures additionally move the ledger to
//! `Failed`.

pub mod registry;
pub mod service;

use crate::domain::cache::SharedCache;
use crate::domain::config::LedgerConfig;
use crate::domain::dirty::{DirtyKind, DirtyMap};
use crate::domain::errors::{LedgerError, LedgerResult};
use crate::domain::hash_chain::HashChainVerifier;
use crate::domain::slice::TransactionSlice;
use crate::domain::state::{next_state, LedgerEvent, LedgerState};
use crate::ports::outbound::{RecordLayout, RecordStore, StorageProvider, TransactionStorage};
use ledger_types::{BinaryRecord, Checkpoint, LedgerEntry, OperationId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use registry::{RegistryDependencies, RegistryLedger, RegistryState};
pub use service::{ServiceDependencies, ServiceLedger, ServiceState};

// =============================================================================
// STORE SLOTS
// =============================================================================

/// A named record store a ledger kind persists into, opened by
/// `new_meta_storage`.
pub struct StoreSlot {
    name: String,
    layout: RecordLayout,
    store: RwLock<Option<Arc<dyn RecordStore>>>,
}

impl StoreSlot {
    pub fn new(name: impl Into<String>, layout: RecordLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            store: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(&self, provider: &dyn StorageProvider) -> LedgerResult<()> {
        let store = provider.open_store(&self.name, self.layout)?;
        *self.store.write() = Some(store);
        Ok(())
    }

    pub fn get(&self) -> LedgerResult<Arc<dyn RecordStore>> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| LedgerError::StorageNotOpen(self.name.clone()))
    }

    /// True unless the store's checkpoint already covers `operation_id`.
    pub fn admits(&self, operation_id: OperationId) -> LedgerResult<bool> {
        Ok(!self.get()?.checkpoint().covers(operation_id))
    }

    fn discard(&self) {
        if let Some(store) = self.store.read().as_ref() {
            store.discard();
        }
    }
}

impl fmt::Debug for StoreSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSlot")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("open", &self.store.read().is_some())
            .finish()
    }
}

/// Cache-first read of one record.
///
/// On a miss the record is loaded and decoded outside the cache lock, then
/// published with `insert_if_absent` so racing loaders converge on one `Arc`.
/// A record carrying another id than requested is corruption.
pub(crate) fn read_through<K, V>(
    slot: &StoreSlot,
    cache: &SharedCache<K, V>,
    key: K,
    id_of: impl Fn(&V) -> u64,
) -> LedgerResult<Option<Arc<V>>>
where
    K: Eq + Hash + Clone + Into<u64>,
    V: BinaryRecord,
{
    if let Some(cached) = cache.get(&key) {
        return Ok(Some(cached));
    }

    let index: u64 = key.clone().into();
    let Some(bytes) = slot.get()?.get_by_index(index)? else {
        return Ok(None);
    };
    let record = V::from_bytes(&bytes).map_err(|source| LedgerError::CorruptedRecord {
        store: slot.name().to_string(),
        index,
        source,
    })?;

    let found = id_of(&record);
    if found != index {
        return Err(LedgerError::RecordIdMismatch {
            store: slot.name().to_string(),
            requested: index,
            found,
        });
    }

    Ok(Some(cache.insert_if_absent(key, record)))
}

/// Dirty entity if staged in this slice, else the committed one.
pub(crate) fn current<K, V>(
    dirty: &DirtyMap<K, V>,
    committed: impl FnOnce() -> LedgerResult<Option<Arc<V>>>,
    key: &K,
) -> LedgerResult<Option<Arc<V>>>
where
    K: Ord + Copy,
{
    match dirty.get(key) {
        Some(staged) => Ok(Some(staged)),
        None => committed(),
    }
}

/// Stage every dirty entity into its store.
pub(crate) fn stage_dirty<K, V>(slot: &StoreSlot, dirty: &DirtyMap<K, V>) -> LedgerResult<()>
where
    K: Ord + Copy + Into<u64>,
    V: BinaryRecord,
{
    if dirty.is_empty() {
        return Ok(());
    }
    let store = slot.get()?;
    for (key, kind, value) in dirty.iter() {
        let bytes = value.to_bytes()?;
        match kind {
            DirtyKind::Created => store.add_entry((*key).into(), bytes)?,
            DirtyKind::Updated => store.update_entry((*key).into(), bytes)?,
        }
    }
    Ok(())
}

/// Publish committed entities into a cache.
pub(crate) fn publish_dirty<K, V>(cache: &SharedCache<K, V>, dirty: &DirtyMap<K, V>)
where
    K: Ord + Copy + Eq + Hash,
{
    for (key, _, value) in dirty.iter() {
        cache.set(*key, Arc::clone(value));
    }
}

// =============================================================================
// LEDGER KIND
// =============================================================================

/// What distinguishes one kind of ledger from another: its entries, stores,
/// caches and apply rules.
pub trait LedgerKind: Send + Sync + 'static {
    type Entry: LedgerEntry + fmt::Debug + Send + Sync;
    type Dirty: Default + Send;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Stores of this kind, in commit order.
    fn slots(&self) -> Vec<&StoreSlot>;

    /// Apply one entry above the ledger checkpoint.
    ///
    /// Rules gate each store on its own checkpoint (`StoreSlot::admits`).
    /// `Ok(false)` means "not applied": a precondition was not met or every
    /// store already covers the entry. No partial mutation is staged then.
    fn apply(&self, entry: &Self::Entry, dirty: &mut Self::Dirty) -> LedgerResult<bool>;

    /// Stage the dirty set into the stores.
    fn stage(&self, dirty: &Self::Dirty) -> LedgerResult<()>;

    /// Publish committed entities into the caches.
    fn publish(&self, dirty: &Self::Dirty);

    fn clear_caches(&self);

    /// Evict expired cache generations; returns the number of evicted entries.
    fn sweep_caches(&self) -> usize;

    /// Endpoints advertised by this ledger's chain registration.
    fn advertised_endpoints(&self) -> Vec<String>;
}

/// Result of replaying one slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub slice_id: u64,
    pub applied: usize,
    /// Entries above the checkpoint whose rules declined them.
    pub rejected: Vec<OperationId>,
    /// Entries at or below the checkpoint.
    pub skipped: usize,
    pub checkpoint: Checkpoint,
}

// =============================================================================
// LEDGER
// =============================================================================

/// The replication engine for one chain.
pub struct Ledger<K: LedgerKind> {
    config: LedgerConfig,
    kind: K,
    state: RwLock<LedgerState>,
    endpoints: RwLock<BTreeSet<String>>,
    /// One logical writer: slices are applied strictly one after another.
    writer: Mutex<()>,
}

impl<K: LedgerKind> Ledger<K> {
    pub fn with_kind(config: LedgerConfig, kind: K) -> Self {
        Self {
            config,
            kind,
            state: RwLock::new(LedgerState::Uninitialized),
            endpoints: RwLock::new(BTreeSet::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn state(&self) -> LedgerState {
        *self.state.read()
    }

    fn transition(&self, operation: &'static str, event: LedgerEvent) -> LedgerResult<LedgerState> {
        let mut state = self.state.write();
        let next = next_state(*state, event).ok_or(LedgerError::InvalidState {
            operation,
            state: *state,
        })?;
        debug!("[ledger] {} {} -> {}", self.kind.name(), *state, next);
        *state = next;
        Ok(next)
    }

    /// Move to `Failed` on an integrity error, pass every result through.
    fn guard<T>(&self, result: LedgerResult<T>) -> LedgerResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!("[ledger] {} integrity failure: {}", self.kind.name(), e);
                let mut state = self.state.write();
                if let Some(next) = next_state(*state, LedgerEvent::IntegrityFailure) {
                    *state = next;
                }
                drop(state);
                self.kind.clear_caches();
            }
        }
        result
    }

    pub fn ensure_readable(&self) -> LedgerResult<()> {
        let state = self.state();
        if state.is_readable() {
            Ok(())
        } else {
            Err(LedgerError::NotReadable(state))
        }
    }

    /// Open storage, collect endpoints and move to `Replaying`.
    pub fn initialize(&self, provider: &dyn StorageProvider) -> LedgerResult<()> {
        self.transition("initialize", LedgerEvent::InitializeRequested)?;

        if let Err(e) = self.new_meta_storage(provider) {
            self.transition("initialize", LedgerEvent::StorageFailed)?;
            return Err(e);
        }

        let mut endpoints: BTreeSet<String> = self.config.endpoints.clone();
        endpoints.extend(self.config.beacons.iter().cloned());
        endpoints.extend(self.kind.advertised_endpoints());
        let count = endpoints.len();
        *self.endpoints.write() = endpoints;

        self.transition("initialize", LedgerEvent::StorageReady)?;
        info!(
            "[ledger] {} initialized at {} with {} endpoints",
            self.kind.name(),
            self.checkpoint()?,
            count
        );
        Ok(())
    }

    /// (Re)open the record stores of this ledger and drop the caches.
    pub fn new_meta_storage(&self, provider: &dyn StorageProvider) -> LedgerResult<()> {
        for slot in self.kind.slots() {
            if let Err(e) = slot.open(provider) {
                error!(
                    "[ledger] {} cannot open store '{}': {}",
                    self.kind.name(),
                    slot.name(),
                    e
                );
                return Err(e);
            }
        }
        self.kind.clear_caches();
        Ok(())
    }

    /// Drop all in-memory caches. Reads rebuild them from storage.
    pub fn clear_meta_data(&self) {
        self.kind.clear_caches();
        info!("[ledger] {} caches cleared", self.kind.name());
    }

    pub fn activate(&self) -> LedgerResult<()> {
        self.transition("activate", LedgerEvent::Activated)?;
        info!("[ledger] {} active", self.kind.name());
        Ok(())
    }

    /// Stop serving. Waits for an in-flight slice to finish.
    pub fn stop(&self) -> LedgerResult<()> {
        let _writer = self.writer.lock();
        self.transition("stop", LedgerEvent::StopRequested)?;
        info!("[ledger] {} stopped", self.kind.name());
        Ok(())
    }

    /// Operator-triggered recovery from `Failed`: reopen storage from the last
    /// committed checkpoints and resume replay.
    pub fn rebuild(&self, provider: &dyn StorageProvider) -> LedgerResult<()> {
        let _writer = self.writer.lock();
        let state = self.state();
        if state != LedgerState::Failed {
            return Err(LedgerError::InvalidState {
                operation: "rebuild",
                state,
            });
        }
        self.new_meta_storage(provider)?;
        self.transition("rebuild", LedgerEvent::RebuildRequested)?;
        warn!(
            "[ledger] {} rebuilt, replay resumes after {}",
            self.kind.name(),
            self.checkpoint()?
        );
        Ok(())
    }

    /// Ledger checkpoint: the least advanced store.
    pub fn checkpoint(&self) -> LedgerResult<Checkpoint> {
        let mut lowest: Option<Checkpoint> = None;
        for slot in self.kind.slots() {
            let checkpoint = slot.get()?.checkpoint();
            if lowest.map_or(true, |l| checkpoint.last_transaction_id < l.last_transaction_id) {
                lowest = Some(checkpoint);
            }
        }
        Ok(lowest.unwrap_or_default())
    }

    pub fn endpoints(&self) -> BTreeSet<String> {
        self.endpoints.read().clone()
    }

    /// Replay one slice.
    pub fn build_meta_data(&self, slice: &TransactionSlice) -> LedgerResult<ReplayReport> {
        let _writer = self.writer.lock();
        let state = self.state();
        if !state.accepts_entries() {
            return Err(LedgerError::InvalidState {
                operation: "build_meta_data",
                state,
            });
        }

        let result = self.replay(slice);
        if result.is_err() {
            for slot in self.kind.slots() {
                slot.discard();
            }
            self.kind.clear_caches();
        }
        self.guard(result)
    }

    fn replay(&self, slice: &TransactionSlice) -> LedgerResult<ReplayReport> {
        let checkpoint = self.checkpoint()?;
        let anchor = match checkpoint.last_transaction_hash {
            Some(hash) if self.config.verify_slice_boundaries => {
                Some((checkpoint.last_transaction_id, hash))
            }
            _ => None,
        };

        let mut verifier = HashChainVerifier::new(anchor);
        let mut dirty = K::Dirty::default();
        let mut report = ReplayReport {
            slice_id: slice.slice_id,
            checkpoint,
            ..ReplayReport::default()
        };
        let mut last_applied = None;

        for (position, stored) in slice.transactions.iter().enumerate() {
            let entry: K::Entry =
                stored
                    .decode()
                    .map_err(|source| LedgerError::UndecodableEntry {
                        slice_id: slice.slice_id,
                        position,
                        source,
                    })?;
            if entry.entry_id() != stored.transaction_id {
                return Err(LedgerError::RecordIdMismatch {
                    store: "transactions".to_string(),
                    requested: stored.transaction_id,
                    found: entry.entry_id(),
                });
            }
            verifier.verify(&entry, &stored.raw)?;

            if checkpoint.covers(entry.entry_id()) {
                report.skipped += 1;
                continue;
            }

            if self.kind.apply(&entry, &mut dirty)? {
                report.applied += 1;
            } else {
                debug!(
                    "[ledger] {} did not apply transaction {}",
                    self.kind.name(),
                    entry.entry_id()
                );
                report.rejected.push(entry.entry_id());
            }
            last_applied = Some((stored.block_id, entry.entry_id(), stored.hash()));
        }

        let Some((block_id, transaction_id, hash)) = last_applied else {
            debug!(
                "[ledger] {} slice {} already applied",
                self.kind.name(),
                slice.slice_id
            );
            return Ok(report);
        };

        let next = Checkpoint {
            last_block_id: block_id,
            last_transaction_id: transaction_id,
            last_transaction_hash: Some(hash),
        };
        self.kind.stage(&dirty)?;
        for slot in self.kind.slots() {
            let store = slot.get()?;
            if !store.checkpoint().covers(transaction_id) {
                store.commit(next)?;
            }
        }
        self.kind.publish(&dirty);

        report.checkpoint = next;
        info!(
            "[ledger] {} slice {} committed: {} applied, {} rejected, {} skipped, now at {}",
            self.kind.name(),
            slice.slice_id,
            report.applied,
            report.rejected.len(),
            report.skipped,
            next
        );
        Ok(report)
    }

    /// Replay everything transaction storage holds beyond the checkpoint, in
    /// slices of `batch` transactions.
    pub fn catch_up(&self, storage: &dyn TransactionStorage, batch: usize) -> LedgerResult<usize> {
        let mut applied = 0;
        loop {
            let after = self.checkpoint()?.last_transaction_id;
            let slice = storage.slice_after(after, batch.max(1))?;
            if slice.is_empty() {
                return Ok(applied);
            }
            let report = self.build_meta_data(&slice)?;
            applied += report.applied;
        }
    }

    /// Spawn the cooperative cache sweeper.
    ///
    /// Exits when `shutdown` flips to `true` (or its sender is dropped) or
    /// once the ledger has stopped.
    pub fn spawn_cache_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if matches!(ledger.state(), LedgerState::Stopped) {
                            break;
                        }
                        let evicted = ledger.kind.sweep_caches();
                        if evicted > 0 {
                            debug!("[ledger] {} swept {} cache entries", ledger.kind.name(), evicted);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("[ledger] {} cache sweeper exited", ledger.kind.name());
        })
    }
}

impl<K: LedgerKind> fmt::Debug for Ledger<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("kind", &self.kind.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStorageProvider;
    use crate::ledger::registry::{RegistryLedger, ACCOUNTS_STORE};
    use crate::test_utils::*;
    use ledger_types::{Account, ChainInfoOperation, CORE_CHAIN_ID};

    #[test]
    fn test_initialize_unions_endpoints() {
        init_tracing();
        let provider = MemoryStorageProvider::new();
        let config = LedgerConfig::new()
            .with_endpoint("tcp://local:1")
            .with_beacon("tcp://beacon:1");
        let ledger = RegistryLedger::new(config, registry_deps());
        ledger.initialize(&provider).unwrap();
        assert_eq!(ledger.endpoints().len(), 2);

        let mut log = LogBuilder::new();
        log.push(chain_op(
            1_000,
            ChainInfoOperation::new_chain(CORE_CHAIN_ID, 0, "core")
                .with_endpoint("tcp://core:1")
                .with_endpoint("tcp://beacon:1"),
        ));
        ledger.build_meta_data(&log.slice()).unwrap();
        ledger.stop().unwrap();
        ledger.initialize(&provider).unwrap();

        let endpoints: Vec<String> = ledger.endpoints().into_iter().collect();
        assert_eq!(
            endpoints,
            vec!["tcp://beacon:1", "tcp://core:1", "tcp://local:1"]
        );
    }

    #[test]
    fn test_unavailable_storage_keeps_ledger_uninitialized() {
        init_tracing();
        let provider = MemoryStorageProvider::new();
        provider.set_unavailable(true);
        let ledger = RegistryLedger::new(LedgerConfig::default(), registry_deps());

        assert!(matches!(
            ledger.initialize(&provider),
            Err(LedgerError::Store(_))
        ));
        assert_eq!(ledger.state(), LedgerState::Uninitialized);

        provider.set_unavailable(false);
        ledger.initialize(&provider).unwrap();
        assert_eq!(ledger.state(), LedgerState::Replaying);
    }

    #[test]
    fn test_record_under_wrong_key_is_fatal() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 42, 1));
        ledger.build_meta_data(&log.slice()).unwrap();
        ledger.clear_meta_data();

        let foreign = Account::new(43, public_key(2), 1).to_bytes().unwrap();
        provider.store(ACCOUNTS_STORE).unwrap().corrupt(42, foreign);

        assert!(matches!(
            ledger.get_account(42),
            Err(LedgerError::RecordIdMismatch {
                requested: 42,
                found: 43,
                ..
            })
        ));
        assert_eq!(ledger.state(), LedgerState::Failed);
    }
}
