//! # Service Ledger
//!
//! One per service chain. Holds the chain's service accounts (append store,
//! indexed by registry account id) and consumes data transactions.
//!
//! ## Consumption
//!
//! - `Join`: creates the service account, with its first key if given.
//! - `Purchase`: records an entitlement for an item the chain registration
//!   advertises.
//! - `Attachment`: binds the uploaded attachments to the transaction.
//! - Every carried feature (and a `FeatureRequest` payload) is handed to its
//!   registered handler.
//!
//! Registry lookups go through `RegistryView`, so a service ledger only ever
//! reads the registry.

use super::{current, publish_dirty, read_through, stage_dirty, Ledger, LedgerKind, StoreSlot};
use crate::domain::cache::SharedCache;
use crate::domain::config::LedgerConfig;
use crate::domain::dirty::DirtyMap;
use crate::domain::errors::{LedgerError, LedgerResult};
use crate::domain::single_flight::{FlightSource, SingleFlightLoader};
use crate::ports::inbound::RegistryView;
use crate::ports::outbound::{
    AttachmentStore, NodeSigner, RecordLayout, ServiceHost, SignatureVerifier, TimeSource,
    TransactionStorage,
};
use crate::validation::features::{feature_inputs, FeatureRegistry};
use ledger_types::{
    AccountId, ChainId, ChainKeyFlags, DataPayload, DataTransaction, LedgerEntry, OperationId,
    Purchase, ServiceAccount, ServiceAccountKey,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators of a service ledger.
#[derive(Clone)]
pub struct ServiceDependencies {
    pub registry: Arc<dyn RegistryView>,
    pub transactions: Arc<dyn TransactionStorage>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub service: Arc<dyn ServiceHost>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub signer: Arc<dyn NodeSigner>,
    pub time: Arc<dyn TimeSource>,
    pub features: FeatureRegistry,
}

pub type ServiceDirty = DirtyMap<AccountId, ServiceAccount>;

/// Service ledger kind.
pub struct ServiceState {
    chain_id: ChainId,
    accounts: StoreSlot,
    account_cache: SharedCache<AccountId, ServiceAccount>,
    deps: ServiceDependencies,
    node_key_loader: SingleFlightLoader,
    /// Set once the node key was found valid; never cleared.
    node_key_valid: AtomicBool,
}

pub type ServiceLedger = Ledger<ServiceState>;

pub fn accounts_store_name(chain_id: ChainId) -> String {
    format!("service-accounts-{}", chain_id)
}

impl ServiceState {
    pub fn new(chain_id: ChainId, config: &LedgerConfig, deps: ServiceDependencies) -> Self {
        Self {
            chain_id,
            accounts: StoreSlot::new(accounts_store_name(chain_id), RecordLayout::Append),
            account_cache: SharedCache::new(config.account_cache.clone()),
            deps,
            node_key_loader: SingleFlightLoader::new("service-node-key"),
            node_key_valid: AtomicBool::new(false),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn deps(&self) -> &ServiceDependencies {
        &self.deps
    }

    fn load_account(&self, account_id: AccountId) -> LedgerResult<Option<Arc<ServiceAccount>>> {
        read_through(&self.accounts, &self.account_cache, account_id, |a: &ServiceAccount| {
            a.account_id
        })
    }

    fn account(
        &self,
        dirty: &ServiceDirty,
        account_id: AccountId,
    ) -> LedgerResult<Option<Arc<ServiceAccount>>> {
        current(dirty, || self.load_account(account_id), &account_id)
    }

    /// True if this node's key is a valid service-node key of the chain.
    ///
    /// Checked against the registry once; a positive answer is kept for the
    /// life of the process, a negative one is re-checked on the next call.
    pub fn node_key_valid(&self) -> bool {
        let check = NodeKeyCheck {
            state: self,
            now: self.deps.time.now(),
        };
        self.node_key_loader.get(&self.chain_id, &check)
    }

    fn apply_join(
        &self,
        transaction: &DataTransaction,
        key: Option<&ServiceAccountKey>,
        dirty: &mut ServiceDirty,
    ) -> LedgerResult<bool> {
        let account_id = transaction.account_id;
        if self.account(dirty, account_id)?.is_some() {
            debug!("[service] {} account {} already joined", self.chain_id, account_id);
            return Ok(false);
        }
        if self.deps.registry.account(account_id)?.is_none() {
            debug!("[service] {} join by unknown account {}", self.chain_id, account_id);
            return Ok(false);
        }

        let mut account = ServiceAccount::new(self.chain_id, account_id, transaction.transaction_id);
        if let Some(key) = key {
            let mut key = key.clone();
            key.created = transaction.timestamp;
            key.revoked = None;
            account.keys.push(key);
        }
        dirty.created(account_id, account);
        Ok(true)
    }

    fn apply_purchase(
        &self,
        transaction: &DataTransaction,
        purchase_item_id: u32,
        dirty: &mut ServiceDirty,
    ) -> LedgerResult<bool> {
        let Some(existing) = self.account(dirty, transaction.account_id)? else {
            debug!(
                "[service] {} purchase by non-member {}",
                self.chain_id, transaction.account_id
            );
            return Ok(false);
        };
        let Some(registration) = self.deps.registry.chain_registration(self.chain_id)? else {
            return Ok(false);
        };
        let Some(item) = registration.purchases.get(&purchase_item_id) else {
            debug!(
                "[service] {} does not offer purchase item {}",
                self.chain_id, purchase_item_id
            );
            return Ok(false);
        };

        let expires = match item.duration {
            0 => 0,
            duration => transaction.timestamp.saturating_add(duration),
        };
        let mut account = ServiceAccount::clone(&existing);
        account
            .purchases
            .retain(|p| p.purchase_item_id != purchase_item_id);
        account.purchases.push(Purchase {
            purchase_item_id,
            group_id: item.group_id,
            expires,
        });
        account.last_transaction_id = transaction.transaction_id;
        dirty.updated(account.account_id, account);
        Ok(true)
    }

    fn consume_features(&self, transaction: &DataTransaction) -> LedgerResult<()> {
        for (feature_id, data) in feature_inputs(transaction) {
            match self.deps.features.get(feature_id) {
                Some(handler) => handler.consume(transaction, data)?,
                None => warn!(
                    "[service] {} no handler for feature {} in transaction {}",
                    self.chain_id, feature_id, transaction.transaction_id
                ),
            }
        }
        Ok(())
    }

    fn stamp(
        &self,
        transaction_id: OperationId,
        account_id: AccountId,
        dirty: &mut ServiceDirty,
    ) -> LedgerResult<()> {
        if let Some(existing) = self.account(dirty, account_id)? {
            if existing.last_transaction_id != transaction_id {
                let mut account = ServiceAccount::clone(&existing);
                account.last_transaction_id = transaction_id;
                dirty.updated(account_id, account);
            }
        }
        Ok(())
    }
}

/// Registry lookup of the node key, run under the single-flight gate.
struct NodeKeyCheck<'a> {
    state: &'a ServiceState,
    now: u64,
}

impl FlightSource<ChainId, bool> for NodeKeyCheck<'_> {
    type Error = LedgerError;

    fn query(&self, _chain_id: &ChainId) -> Option<bool> {
        self.state
            .node_key_valid
            .load(Ordering::Acquire)
            .then_some(true)
    }

    fn store(&self, chain_id: &ChainId) -> Result<bool, LedgerError> {
        let signer = &self.state.deps.signer;
        let Some(registration) = self.state.deps.registry.chain_registration(*chain_id)? else {
            return Ok(false);
        };
        let valid = registration
            .valid_keys(signer.chain_index(), self.now, ChainKeyFlags::SERVICE_NODE)
            .any(|k| k.key_index == signer.key_index() && k.public_key == signer.public_key());
        if valid {
            self.state.node_key_valid.store(true, Ordering::Release);
            info!(
                "[service] {} node key {} verified",
                chain_id,
                signer.key_index()
            );
        } else {
            warn!(
                "[service] {} node key {} is not a valid service node key",
                chain_id,
                signer.key_index()
            );
        }
        Ok(valid)
    }
}

impl LedgerKind for ServiceState {
    type Entry = DataTransaction;
    type Dirty = ServiceDirty;

    fn name(&self) -> &str {
        "service"
    }

    fn slots(&self) -> Vec<&StoreSlot> {
        vec![&self.accounts]
    }

    fn apply(&self, transaction: &DataTransaction, dirty: &mut ServiceDirty) -> LedgerResult<bool> {
        let id = transaction.entry_id();
        if !self.accounts.admits(id)? {
            return Ok(false);
        }

        let applied = match &transaction.payload {
            DataPayload::Join { key } => self.apply_join(transaction, key.as_ref(), dirty)?,
            DataPayload::Purchase { purchase_item_id } => {
                self.apply_purchase(transaction, *purchase_item_id, dirty)?
            }
            DataPayload::Attachment { attachments } => {
                self.deps
                    .attachments
                    .persist(self.chain_id, id, attachments)
                    .map_err(|e| LedgerError::Collaborator(e.to_string()))?;
                true
            }
            DataPayload::Data { .. } | DataPayload::FeatureRequest { .. } => true,
        };
        if !applied {
            return Ok(false);
        }

        self.consume_features(transaction)?;
        self.stamp(id, transaction.account_id, dirty)?;
        Ok(true)
    }

    fn stage(&self, dirty: &ServiceDirty) -> LedgerResult<()> {
        stage_dirty(&self.accounts, dirty)
    }

    fn publish(&self, dirty: &ServiceDirty) {
        publish_dirty(&self.account_cache, dirty);
    }

    fn clear_caches(&self) {
        self.account_cache.clear();
    }

    fn sweep_caches(&self) -> usize {
        self.account_cache.sweep()
    }

    fn advertised_endpoints(&self) -> Vec<String> {
        match self.deps.registry.chain_registration(self.chain_id) {
            Ok(Some(registration)) => registration.endpoints.iter().cloned().collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("[service] {} cannot read chain endpoints: {}", self.chain_id, e);
                Vec::new()
            }
        }
    }
}

// =============================================================================
// SERVICE LEDGER API
// =============================================================================

impl Ledger<ServiceState> {
    pub fn new(chain_id: ChainId, config: LedgerConfig, deps: ServiceDependencies) -> Self {
        let kind = ServiceState::new(chain_id, &config, deps);
        Self::with_kind(config, kind)
    }

    pub fn chain_id(&self) -> ChainId {
        self.kind().chain_id()
    }

    pub fn get_service_account(&self, account_id: AccountId) -> LedgerResult<Option<Arc<ServiceAccount>>> {
        self.ensure_readable()?;
        self.guard(self.kind().load_account(account_id))
    }

    pub fn service_account_exists(&self, account_id: AccountId) -> LedgerResult<bool> {
        Ok(self.get_service_account(account_id)?.is_some())
    }
}
