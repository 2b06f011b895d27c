//! # Registry Ledger
//!
//! The core chain: registry accounts (fixed-record store, one 64-byte record
//! per account id) and chain registrations (append store).
//!
//! ## Apply Rules
//!
//! | Operation | Precondition | Effect |
//! |-----------|--------------|--------|
//! | Account | account absent | create account |
//! | ChainInfo (new) | registration absent, owner exists* | create registration |
//! | ChainInfo (update) | registration present, owner exists* | apply deltas |
//! | Revenue | registration present | set revenue parameters |
//! | AccountUpdate | every account and chain present, no overflow | balances, payouts |
//! | BlockState | every chain present | record block states |
//!
//! *not required for `CORE_CHAIN_ID`. A failed precondition rejects the whole
//! operation with nothing staged.

use super::{
    current, publish_dirty, read_through, stage_dirty, Ledger, LedgerKind, StoreSlot,
};
use crate::domain::cache::SharedCache;
use crate::domain::config::LedgerConfig;
use crate::domain::dirty::DirtyMap;
use crate::domain::errors::LedgerResult;
use crate::ports::inbound::RegistryView;
use crate::ports::outbound::{QuorumValidator, RecordLayout, SignatureVerifier};
use ledger_types::{
    Account, AccountId, AccountOperation, AccountUpdateOperation, BlockSignatures,
    BlockStateOperation, ChainId, ChainInfoOperation, ChainKey, ChainRegistration, ChainType,
    CoreOperation, CoreOperationPayload, OperationId, PublicKey, RevenueOperation, CORE_CHAIN_ID,
    GENESIS_BLOCK_ID,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCOUNTS_STORE: &str = "registry-accounts";
pub const CHAINS_STORE: &str = "registry-chains";

/// Collaborators of the registry ledger.
#[derive(Clone)]
pub struct RegistryDependencies {
    /// Key that must sign the genesis block.
    pub genesis_key: PublicKey,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub quorum: Arc<dyn QuorumValidator>,
}

/// Entities staged while applying one slice.
#[derive(Debug, Default)]
pub struct RegistryDirty {
    pub accounts: DirtyMap<AccountId, Account>,
    pub chains: DirtyMap<ChainId, ChainRegistration>,
}

/// Registry ledger kind: stores, caches and apply rules.
pub struct RegistryState {
    accounts: StoreSlot,
    chains: StoreSlot,
    account_cache: SharedCache<AccountId, Account>,
    chain_cache: SharedCache<ChainId, ChainRegistration>,
    deps: RegistryDependencies,
}

pub type RegistryLedger = Ledger<RegistryState>;

impl RegistryState {
    pub fn new(config: &LedgerConfig, deps: RegistryDependencies) -> Self {
        Self {
            accounts: StoreSlot::new(
                ACCOUNTS_STORE,
                RecordLayout::Fixed {
                    record_size: Account::RECORD_SIZE,
                },
            ),
            chains: StoreSlot::new(CHAINS_STORE, RecordLayout::Append),
            account_cache: SharedCache::new(config.account_cache.clone()),
            chain_cache: SharedCache::new(config.registration_cache.clone()),
            deps,
        }
    }

    fn load_account(&self, account_id: AccountId) -> LedgerResult<Option<Arc<Account>>> {
        read_through(&self.accounts, &self.account_cache, account_id, |a: &Account| {
            a.account_id
        })
    }

    fn load_chain(&self, chain_id: ChainId) -> LedgerResult<Option<Arc<ChainRegistration>>> {
        read_through(&self.chains, &self.chain_cache, chain_id, |c: &ChainRegistration| {
            u64::from(c.chain_id)
        })
    }

    fn account(&self, dirty: &RegistryDirty, id: AccountId) -> LedgerResult<Option<Arc<Account>>> {
        current(&dirty.accounts, || self.load_account(id), &id)
    }

    fn chain(
        &self,
        dirty: &RegistryDirty,
        id: ChainId,
    ) -> LedgerResult<Option<Arc<ChainRegistration>>> {
        current(&dirty.chains, || self.load_chain(id), &id)
    }

    fn apply_account(
        &self,
        id: OperationId,
        op: &AccountOperation,
        dirty: &mut RegistryDirty,
    ) -> LedgerResult<bool> {
        if !self.accounts.admits(id)? {
            return Ok(false);
        }
        if self.account(dirty, op.account_id)?.is_some() {
            debug!("[registry] account {} already exists", op.account_id);
            return Ok(false);
        }
        dirty
            .accounts
            .created(op.account_id, Account::new(op.account_id, op.public_key, id));
        Ok(true)
    }

    fn apply_chain_info(
        &self,
        id: OperationId,
        timestamp: u64,
        op: &ChainInfoOperation,
        dirty: &mut RegistryDirty,
    ) -> LedgerResult<bool> {
        let chain_admitted = self.chains.admits(id)?;
        let account_admitted = op.chain_id != CORE_CHAIN_ID && self.accounts.admits(id)?;
        if !chain_admitted && !account_admitted {
            return Ok(false);
        }

        let existing = self.chain(dirty, op.chain_id)?;
        if !chain_admitted {
            // The registration already holds this operation; only the owner lags.
            let owner_id = existing.as_ref().map_or(op.account_id, |r| r.account_id);
            let Some(owner) = self.account(dirty, owner_id)? else {
                return Ok(false);
            };
            let mut owner = Account::clone(&owner);
            owner.last_transaction_id = id;
            dirty.accounts.updated(owner_id, owner);
            return Ok(true);
        }

        let mut registration = match (op.is_new, existing) {
            (true, None) => ChainRegistration::new(
                op.chain_id,
                op.account_id,
                op.name.clone().unwrap_or_default(),
                op.website.clone().unwrap_or_default(),
            ),
            (false, Some(existing)) => ChainRegistration::clone(&existing),
            (true, Some(_)) => {
                debug!("[registry] chain {} already registered", op.chain_id);
                return Ok(false);
            }
            (false, None) => {
                debug!("[registry] update for unknown chain {}", op.chain_id);
                return Ok(false);
            }
        };

        let owner = if op.chain_id == CORE_CHAIN_ID {
            None
        } else {
            match self.account(dirty, registration.account_id)? {
                Some(owner) => Some(owner),
                None => {
                    debug!(
                        "[registry] chain {} owner {} does not exist",
                        op.chain_id, registration.account_id
                    );
                    return Ok(false);
                }
            }
        };

        if !op.is_new {
            if let Some(name) = &op.name {
                registration.name = name.clone();
            }
            if let Some(website) = &op.website {
                registration.website = website.clone();
            }
        }
        for endpoint in &op.endpoints_added {
            registration.endpoints.insert(endpoint.clone());
        }
        for endpoint in &op.endpoints_removed {
            registration.endpoints.remove(endpoint);
        }
        for key in &op.keys_added {
            let mut key = key.clone();
            key.created = timestamp;
            key.revoked = None;
            registration.chain_keys.push(key);
        }
        for key_index in &op.keys_revoked {
            if let Some(key) = registration
                .chain_keys
                .iter_mut()
                .rev()
                .find(|k| k.key_index == *key_index && k.revoked.is_none())
            {
                key.revoked = Some(timestamp);
            }
        }
        for purchase in &op.purchases_added {
            registration
                .purchases
                .insert(purchase.purchase_item_id, purchase.clone());
        }
        for purchase_item_id in &op.purchases_removed {
            registration.purchases.remove(purchase_item_id);
        }
        registration.last_transaction_id = id;

        if op.is_new {
            dirty.chains.created(op.chain_id, registration);
        } else {
            dirty.chains.updated(op.chain_id, registration);
        }
        if let (true, Some(owner)) = (account_admitted, owner) {
            let mut owner = Account::clone(&owner);
            owner.last_transaction_id = id;
            dirty.accounts.updated(owner.account_id, owner);
        }
        Ok(true)
    }

    fn apply_revenue(
        &self,
        id: OperationId,
        op: &RevenueOperation,
        dirty: &mut RegistryDirty,
    ) -> LedgerResult<bool> {
        if !self.chains.admits(id)? {
            return Ok(false);
        }
        let Some(existing) = self.chain(dirty, op.chain_id)? else {
            debug!("[registry] revenue for unknown chain {}", op.chain_id);
            return Ok(false);
        };
        let mut registration = ChainRegistration::clone(&existing);
        registration.revenue = op.revenue;
        registration.revenue_factor = op.revenue_factor;
        registration.last_transaction_id = id;
        dirty.chains.updated(op.chain_id, registration);
        Ok(true)
    }

    fn apply_account_update(
        &self,
        id: OperationId,
        op: &AccountUpdateOperation,
        dirty: &mut RegistryDirty,
    ) -> LedgerResult<bool> {
        let accounts_admitted = self.accounts.admits(id)?;
        let chains_admitted = self.chains.admits(id)?;
        if !accounts_admitted && !chains_admitted {
            return Ok(false);
        }

        // Work on copies; stage only if every delta applies. A store that
        // already covers the operation holds the post-state, so its side of
        // the arithmetic is not repeated.
        let mut accounts: BTreeMap<AccountId, Account> = BTreeMap::new();
        let mut chains: BTreeMap<ChainId, ChainRegistration> = BTreeMap::new();

        for update in &op.updates {
            let Some(account) = self.working_account(dirty, &mut accounts, update.account_id)? else {
                debug!("[registry] balance update for unknown account {}", update.account_id);
                return Ok(false);
            };
            if !accounts_admitted {
                continue;
            }
            let Some(balance) = account.balance.checked_add_signed(update.balance_change) else {
                warn!(
                    "[registry] balance of account {} out of range, operation {} rejected",
                    update.account_id, id
                );
                return Ok(false);
            };
            account.balance = balance;
            account.last_transaction_id = id;
        }

        for payout in &op.revenues {
            if !chains.contains_key(&payout.chain_id) {
                let Some(chain) = self.chain(dirty, payout.chain_id)? else {
                    debug!("[registry] payout from unknown chain {}", payout.chain_id);
                    return Ok(false);
                };
                chains.insert(payout.chain_id, ChainRegistration::clone(&chain));
            }
            if chains_admitted {
                let Some(chain) = chains.get_mut(&payout.chain_id) else {
                    return Ok(false);
                };
                let Some(total) = chain.total_revenue_payout.checked_add(payout.amount) else {
                    return Ok(false);
                };
                chain.total_revenue_payout = total;
                chain.last_transaction_id = id;
            }

            let Some(account) = self.working_account(dirty, &mut accounts, payout.account_id)? else {
                debug!("[registry] payout to unknown account {}", payout.account_id);
                return Ok(false);
            };
            if accounts_admitted {
                let (Some(balance), Some(paid)) = (
                    account.balance.checked_add(payout.amount),
                    account.total_revenue_payout.checked_add(payout.amount),
                ) else {
                    return Ok(false);
                };
                account.balance = balance;
                account.total_revenue_payout = paid;
                account.last_transaction_id = id;
            }
        }

        if accounts_admitted {
            for (account_id, account) in accounts {
                dirty.accounts.updated(account_id, account);
            }
        }
        if chains_admitted {
            for (chain_id, chain) in chains {
                dirty.chains.updated(chain_id, chain);
            }
        }
        Ok(true)
    }

    fn working_account<'a>(
        &self,
        dirty: &RegistryDirty,
        accounts: &'a mut BTreeMap<AccountId, Account>,
        account_id: AccountId,
    ) -> LedgerResult<Option<&'a mut Account>> {
        if !accounts.contains_key(&account_id) {
            match self.account(dirty, account_id)? {
                Some(account) => {
                    accounts.insert(account_id, Account::clone(&account));
                }
                None => return Ok(None),
            }
        }
        Ok(accounts.get_mut(&account_id))
    }

    fn apply_block_state(
        &self,
        id: OperationId,
        op: &BlockStateOperation,
        dirty: &mut RegistryDirty,
    ) -> LedgerResult<bool> {
        if !self.chains.admits(id)? {
            return Ok(false);
        }
        let mut chains: BTreeMap<ChainId, ChainRegistration> = BTreeMap::new();
        for update in &op.states {
            if !chains.contains_key(&update.chain_id) {
                let Some(chain) = self.chain(dirty, update.chain_id)? else {
                    debug!("[registry] block state for unknown chain {}", update.chain_id);
                    return Ok(false);
                };
                chains.insert(update.chain_id, ChainRegistration::clone(&chain));
            }
            if let Some(chain) = chains.get_mut(&update.chain_id) {
                chain.set_block_state(update.state.clone());
                chain.last_transaction_id = id;
            }
        }
        for (chain_id, chain) in chains {
            dirty.chains.updated(chain_id, chain);
        }
        Ok(true)
    }
}

impl LedgerKind for RegistryState {
    type Entry = CoreOperation;
    type Dirty = RegistryDirty;

    fn name(&self) -> &str {
        "registry"
    }

    fn slots(&self) -> Vec<&StoreSlot> {
        vec![&self.accounts, &self.chains]
    }

    fn apply(&self, entry: &CoreOperation, dirty: &mut RegistryDirty) -> LedgerResult<bool> {
        let id = entry.operation_id;
        let applied = match &entry.payload {
            CoreOperationPayload::Account(op) => self.apply_account(id, op, dirty)?,
            CoreOperationPayload::ChainInfo(op) => {
                self.apply_chain_info(id, entry.timestamp, op, dirty)?
            }
            CoreOperationPayload::Revenue(op) => self.apply_revenue(id, op, dirty)?,
            CoreOperationPayload::AccountUpdate(op) => self.apply_account_update(id, op, dirty)?,
            CoreOperationPayload::BlockState(op) => self.apply_block_state(id, op, dirty)?,
        };
        if !applied {
            debug!(
                "[registry] {} operation {} not applied",
                entry.payload.kind(),
                id
            );
        }
        Ok(applied)
    }

    fn stage(&self, dirty: &RegistryDirty) -> LedgerResult<()> {
        stage_dirty(&self.accounts, &dirty.accounts)?;
        stage_dirty(&self.chains, &dirty.chains)
    }

    fn publish(&self, dirty: &RegistryDirty) {
        publish_dirty(&self.account_cache, &dirty.accounts);
        publish_dirty(&self.chain_cache, &dirty.chains);
    }

    fn clear_caches(&self) {
        self.account_cache.clear();
        self.chain_cache.clear();
    }

    fn sweep_caches(&self) -> usize {
        self.account_cache.sweep() + self.chain_cache.sweep()
    }

    fn advertised_endpoints(&self) -> Vec<String> {
        match self.load_chain(CORE_CHAIN_ID) {
            Ok(Some(core)) => core.endpoints.iter().cloned().collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("[registry] cannot read core chain endpoints: {}", e);
                Vec::new()
            }
        }
    }
}

// =============================================================================
// REGISTRY LEDGER API
// =============================================================================

impl Ledger<RegistryState> {
    pub fn new(config: LedgerConfig, deps: RegistryDependencies) -> Self {
        let kind = RegistryState::new(&config, deps);
        Self::with_kind(config, kind)
    }

    pub fn get_account(&self, account_id: AccountId) -> LedgerResult<Option<Arc<Account>>> {
        self.ensure_readable()?;
        self.guard(self.kind().load_account(account_id))
    }

    pub fn account_exists(&self, account_id: AccountId) -> LedgerResult<bool> {
        Ok(self.get_account(account_id)?.is_some())
    }

    pub fn get_chain_info(&self, chain_id: ChainId) -> LedgerResult<Option<Arc<ChainRegistration>>> {
        self.ensure_readable()?;
        self.guard(self.kind().load_chain(chain_id))
    }

    pub fn chain_exists(&self, chain_id: ChainId) -> LedgerResult<bool> {
        Ok(self.get_chain_info(chain_id)?.is_some())
    }

    /// Keys of `chain_id` valid at `timestamp` for `chain_index` that may vote
    /// on blocks of `chain_type`.
    pub fn valid_chain_keys(
        &self,
        chain_id: ChainId,
        chain_type: ChainType,
        chain_index: u32,
        timestamp: u64,
    ) -> LedgerResult<Vec<ChainKey>> {
        Ok(self
            .get_chain_info(chain_id)?
            .map(|chain| {
                chain
                    .valid_keys(chain_index, timestamp, chain_type.vote_flag())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Check the votes on a block.
    ///
    /// The genesis block must carry a signature of the genesis key; any other
    /// block needs a quorum of the chain keys valid at its timestamp.
    pub fn validate_block_signatures(&self, block: &BlockSignatures) -> LedgerResult<bool> {
        self.ensure_readable()?;
        let deps = &self.kind().deps;

        if block.block_id == GENESIS_BLOCK_ID {
            let signed = block.signatures.iter().any(|s| {
                deps.verifier
                    .verify(&deps.genesis_key, &block.block_hash, &s.signature)
            });
            if !signed {
                warn!("[registry] genesis {} not signed by the genesis key", block);
            }
            return Ok(signed);
        }

        let eligible = self.valid_chain_keys(
            block.chain_id,
            block.chain_type,
            block.chain_index,
            block.timestamp,
        )?;
        let verified: Vec<u16> = block
            .signatures
            .iter()
            .filter(|s| {
                eligible
                    .iter()
                    .find(|k| k.key_index == s.key_index)
                    .is_some_and(|k| {
                        deps.verifier
                            .verify(&k.public_key, &block.block_hash, &s.signature)
                    })
            })
            .map(|s| s.key_index)
            .collect();

        let quorate = deps.quorum.has_quorum(&eligible, &verified);
        debug!(
            "[registry] {}: {}/{} valid signatures, quorum {}",
            block,
            verified.len(),
            eligible.len(),
            quorate
        );
        Ok(quorate)
    }
}

impl RegistryView for Ledger<RegistryState> {
    fn account(&self, account_id: AccountId) -> LedgerResult<Option<Arc<Account>>> {
        self.get_account(account_id)
    }

    fn chain_registration(&self, chain_id: ChainId) -> LedgerResult<Option<Arc<ChainRegistration>>> {
        self.get_chain_info(chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStorageProvider;
    use crate::domain::state::LedgerState;
    use crate::test_utils::*;
    use ledger_types::{
        AccountBalanceUpdate, BlockSignature, ChainBlockState, ChainKeyFlags, ChainStateUpdate,
        RevenuePayout,
    };

    fn update_op(updates: Vec<(AccountId, i64)>, revenues: Vec<RevenuePayout>) -> CoreOperation {
        CoreOperation::new(
            2_000,
            CoreOperationPayload::AccountUpdate(AccountUpdateOperation {
                updates: updates
                    .into_iter()
                    .map(|(account_id, balance_change)| AccountBalanceUpdate {
                        account_id,
                        balance_change,
                    })
                    .collect(),
                revenues,
            }),
        )
    }

    #[test]
    fn test_account_created_once() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 42, 1));
        let second = log.push(account_op(1_001, 42, 2));

        let report = ledger.build_meta_data(&log.slice()).unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected, vec![second]);
        let account = ledger.get_account(42).unwrap().unwrap();
        assert_eq!(account.public_key, public_key(1));
        assert_eq!(account.last_transaction_id, 1);
    }

    #[test]
    fn test_new_chain_then_update_merges_deltas() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 1, 1));
        log.push(new_chain_op(1_001, 7, 1));
        let duplicate = log.push(new_chain_op(1_002, 7, 1));
        log.push(chain_op(
            1_003,
            ChainInfoOperation::update(7, 1)
                .with_endpoint("tcp://node-a:9000")
                .with_key(ChainKey::new(0, 0, public_key(3), ChainKeyFlags::SERVICE_VOTE)),
        ));

        let report = ledger.build_meta_data(&log.slice()).unwrap();
        assert_eq!(report.rejected, vec![duplicate]);

        let chain = ledger.get_chain_info(7).unwrap().unwrap();
        assert_eq!(chain.name, "chain-7");
        assert!(chain.endpoints.contains("tcp://node-a:9000"));
        assert_eq!(chain.chain_keys.len(), 1);
        assert_eq!(chain.chain_keys[0].created, 1_003);
        assert_eq!(chain.last_transaction_id, 4);
        assert_eq!(ledger.get_account(1).unwrap().unwrap().last_transaction_id, 4);
    }

    #[test]
    fn test_chain_requires_owner_and_existing_registration() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        let orphan = log.push(new_chain_op(1_000, 7, 99));
        let unknown = log.push(chain_op(1_001, ChainInfoOperation::update(8, 1)));
        // The core chain has no owner.
        log.push(new_chain_op(1_002, CORE_CHAIN_ID, 0));

        let report = ledger.build_meta_data(&log.slice()).unwrap();

        assert_eq!(report.rejected, vec![orphan, unknown]);
        assert!(!ledger.chain_exists(7).unwrap());
        assert!(ledger.chain_exists(CORE_CHAIN_ID).unwrap());
    }

    #[test]
    fn test_account_update_is_all_or_nothing() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 1, 1));
        log.push(account_op(1_000, 2, 2));
        log.push(update_op(vec![(1, 500), (2, 300)], vec![]));
        // Account 2 would go negative: account 1 must not be debited either.
        let overdraft = log.push(update_op(vec![(1, -100), (2, -301)], vec![]));

        let report = ledger.build_meta_data(&log.slice()).unwrap();

        assert_eq!(report.rejected, vec![overdraft]);
        assert_eq!(ledger.get_account(1).unwrap().unwrap().balance, 500);
        assert_eq!(ledger.get_account(2).unwrap().unwrap().balance, 300);
    }

    #[test]
    fn test_revenue_payout_credits_account_and_chain() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 1, 1));
        log.push(new_chain_op(1_001, 7, 1));
        log.push(update_op(
            vec![],
            vec![RevenuePayout {
                chain_id: 7,
                account_id: 1,
                amount: 250,
            }],
        ));
        ledger.build_meta_data(&log.slice()).unwrap();

        let account = ledger.get_account(1).unwrap().unwrap();
        assert_eq!((account.balance, account.total_revenue_payout), (250, 250));
        assert_eq!(ledger.get_chain_info(7).unwrap().unwrap().total_revenue_payout, 250);
    }

    #[test]
    fn test_block_state_requires_every_chain() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let state = ChainBlockState {
            chain_type: ChainType::Service,
            chain_index: 0,
            last_block_id: 12,
            last_transaction_id: 40,
            last_block_hash: [4u8; 32],
        };
        let states = |ids: &[ChainId]| {
            CoreOperation::new(
                3_000,
                CoreOperationPayload::BlockState(BlockStateOperation {
                    states: ids
                        .iter()
                        .map(|&chain_id| ChainStateUpdate {
                            chain_id,
                            state: state.clone(),
                        })
                        .collect(),
                }),
            )
        };

        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 1, 1));
        log.push(new_chain_op(1_001, 7, 1));
        let partial = log.push(states(&[7, 8]));
        log.push(states(&[7]));
        let report = ledger.build_meta_data(&log.slice()).unwrap();

        assert_eq!(report.rejected, vec![partial]);
        let chain = ledger.get_chain_info(7).unwrap().unwrap();
        assert_eq!(chain.block_state(ChainType::Service, 0), Some(&state));
    }

    #[test]
    fn test_store_behind_replays_only_its_half() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut log = LogBuilder::new();
        log.push(account_op(1_000, 1, 1));
        log.push(new_chain_op(1_001, 7, 1));
        let slice = log.slice();

        let chains = provider.store(CHAINS_STORE).unwrap();
        chains.set_fail_commits(true);
        assert!(ledger.build_meta_data(&slice).is_err());
        assert_eq!(ledger.state(), LedgerState::Replaying);
        assert_eq!(ledger.checkpoint().unwrap().last_transaction_id, 0);

        chains.set_fail_commits(false);
        let report = ledger.build_meta_data(&slice).unwrap();

        // The account half was committed the first time round.
        assert_eq!(report.rejected, vec![1]);
        assert_eq!(report.applied, 1);
        assert!(ledger.chain_exists(7).unwrap());
        assert_eq!(ledger.checkpoint().unwrap().last_transaction_id, 2);
        assert_eq!(ledger.get_account(1).unwrap().unwrap().last_transaction_id, 2);
    }

    #[test]
    fn test_genesis_block_needs_genesis_key() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut block = BlockSignatures {
            chain_type: ChainType::Core,
            chain_id: CORE_CHAIN_ID,
            chain_index: 0,
            block_id: GENESIS_BLOCK_ID,
            timestamp: 1_000,
            block_hash: [1u8; 32],
            signatures: vec![BlockSignature {
                key_index: 0,
                signature: sign(GENESIS_SEED, &[1u8; 32]),
            }],
        };
        assert!(ledger.validate_block_signatures(&block).unwrap());

        block.signatures[0].signature = sign(5, &[1u8; 32]);
        assert!(!ledger.validate_block_signatures(&block).unwrap());
    }

    #[test]
    fn test_block_quorum_over_valid_keys() {
        let provider = MemoryStorageProvider::new();
        let ledger = registry_on(&provider);
        let mut update = ChainInfoOperation::update(CORE_CHAIN_ID, 0);
        for index in 0..3u16 {
            update = update.with_key(ChainKey::new(
                index,
                0,
                public_key(10 + index as u8),
                ChainKeyFlags::CORE_VOTE,
            ));
        }
        let mut log = LogBuilder::new();
        log.push(new_chain_op(1_000, CORE_CHAIN_ID, 0));
        log.push(chain_op(1_000, update));
        ledger.build_meta_data(&log.slice()).unwrap();

        let hash = [9u8; 32];
        let block = |signers: &[u16]| BlockSignatures {
            chain_type: ChainType::Core,
            chain_id: CORE_CHAIN_ID,
            chain_index: 0,
            block_id: 5,
            timestamp: 2_000,
            block_hash: hash,
            signatures: signers
                .iter()
                .map(|&i| BlockSignature {
                    key_index: i,
                    signature: sign(10 + i as u8, &hash),
                })
                .collect(),
        };

        assert!(ledger.validate_block_signatures(&block(&[0, 1])).unwrap());
        assert!(!ledger.validate_block_signatures(&block(&[2])).unwrap());

        // A signature by the wrong key does not count.
        let mut forged = block(&[0, 1]);
        forged.signatures[1].signature = sign(99, &hash);
        assert!(!ledger.validate_block_signatures(&forged).unwrap());
    }

    #[test]
    fn test_reads_refused_before_initialize() {
        let ledger = RegistryLedger::new(LedgerConfig::default(), registry_deps());
        assert!(matches!(
            ledger.get_account(1),
            Err(crate::domain::errors::LedgerError::NotReadable(LedgerState::Uninitialized))
        ));
    }
}
