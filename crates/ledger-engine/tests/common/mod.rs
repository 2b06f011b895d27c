//! Fixtures shared by the scenario tests: a registry with one service chain,
//! a service ledger for it and a fake backing service.

#![allow(dead_code)]

use async_trait::async_trait;
use ledger_engine::{
    Ed25519NodeSigner, Ed25519Verifier, FeatureRegistry, LedgerConfig, ManualTimeSource,
    MemoryAttachmentStore, MemoryStorageProvider, MemoryTransactionStorage, RegistryLedger,
    RegistryView, ServiceDependencies, ServiceHost, ServiceLedger, ServiceResponse,
    TransactionStorage,
};
use ledger_types::{
    AccountId, ChainId, ChainInfoOperation, ChainKey, ChainKeyFlags, DataPayload,
    DataTransaction, LedgerEntry, PurchaseInfo, ServiceAccountKey, CORE_ACCOUNT_KEY_INDEX,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub use ledger_engine::test_utils::*;

pub const SERVICE_CHAIN: ChainId = 7;
pub const OWNER: AccountId = 1;
pub const USER: AccountId = 42;
pub const NODE_SEED: u8 = 50;
pub const PURCHASE_ITEM: u32 = 5;
pub const PURCHASE_DURATION: u64 = 100;
/// Clock value the fixtures start at.
pub const NOW: u64 = 10_000;

/// Registry operations that set up `OWNER`, `USER` and `SERVICE_CHAIN` with
/// the node key and one purchase item.
pub fn bootstrap_registry(log: &mut LogBuilder) {
    log.push(account_op(1_000, OWNER, 1));
    log.push(account_op(1_000, USER, 42));
    log.push(chain_op(
        1_001,
        ChainInfoOperation::new_chain(SERVICE_CHAIN, OWNER, "service")
            .with_endpoint("tcp://service-a:7000")
            .with_key(ChainKey::new(
                0,
                0,
                public_key(NODE_SEED),
                ChainKeyFlags::SERVICE_NODE | ChainKeyFlags::SERVICE_VOTE,
            ))
            .with_purchase(PurchaseInfo {
                purchase_item_id: PURCHASE_ITEM,
                group_id: 1,
                price: 10,
                duration: PURCHASE_DURATION,
                description: "monthly".into(),
            }),
    ));
}

/// Fake backing service with switchable answers.
#[derive(Debug)]
pub struct FakeService {
    pub available: AtomicBool,
    pub required_purchase: Mutex<Option<u32>>,
    pub response: Mutex<ServiceResponse>,
    pub content_checks: AtomicUsize,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            required_purchase: Mutex::new(None),
            response: Mutex::new(ServiceResponse::ok()),
            content_checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ServiceHost for FakeService {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Only plain content is paywalled.
    fn required_purchase(&self, transaction: &DataTransaction) -> Option<u32> {
        match transaction.payload {
            DataPayload::Data { .. } => *self.required_purchase.lock(),
            _ => None,
        }
    }

    async fn validate_content(&self, _transaction: &DataTransaction) -> ServiceResponse {
        self.content_checks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.response.lock().clone()
    }
}

/// Registry plus one service ledger, both active.
pub struct Network {
    pub provider: MemoryStorageProvider,
    pub registry: Arc<RegistryLedger>,
    pub registry_log: LogBuilder,
    pub service: ServiceLedger,
    pub service_log: LogBuilder,
    pub transactions: Arc<MemoryTransactionStorage>,
    pub attachments: Arc<MemoryAttachmentStore>,
    pub host: Arc<FakeService>,
    pub time: Arc<ManualTimeSource>,
}

impl Network {
    pub fn new() -> Self {
        Self::with_features(FeatureRegistry::new())
    }

    pub fn with_features(features: FeatureRegistry) -> Self {
        init_tracing();
        let provider = MemoryStorageProvider::new();

        let registry = Arc::new(RegistryLedger::new(LedgerConfig::default(), registry_deps()));
        registry.initialize(&provider).unwrap();
        let mut registry_log = LogBuilder::new();
        bootstrap_registry(&mut registry_log);
        registry.build_meta_data(&registry_log.slice()).unwrap();
        registry.activate().unwrap();

        let transactions = Arc::new(MemoryTransactionStorage::new());
        let attachments = Arc::new(MemoryAttachmentStore::new());
        let host = Arc::new(FakeService::default());
        let time = Arc::new(ManualTimeSource::new(NOW));
        let deps = ServiceDependencies {
            registry: Arc::clone(&registry) as Arc<dyn RegistryView>,
            transactions: Arc::clone(&transactions) as Arc<dyn TransactionStorage>,
            attachments: attachments.clone(),
            service: host.clone(),
            verifier: Arc::new(Ed25519Verifier),
            signer: Arc::new(Ed25519NodeSigner::from_seed([NODE_SEED; 32], 0, 0)),
            time: time.clone(),
            features,
        };
        let service = ServiceLedger::new(SERVICE_CHAIN, LedgerConfig::default(), deps);
        service.initialize(&provider).unwrap();
        service.activate().unwrap();

        Self {
            provider,
            registry,
            registry_log,
            service,
            service_log: LogBuilder::new(),
            transactions,
            attachments,
            host,
            time,
        }
    }

    /// Append accepted transactions to history and replay them.
    pub fn commit(&mut self, transactions: Vec<DataTransaction>) {
        for transaction in transactions {
            self.service_log.push(transaction);
        }
        for stored in self.service_log.slice().transactions {
            self.transactions.append(stored).unwrap();
        }
        self.transactions.save().unwrap();
        self.service.catch_up(self.transactions.as_ref(), 16).unwrap();
    }

    /// `USER` joins `SERVICE_CHAIN` with the given first key.
    pub fn join(&mut self, key: Option<ServiceAccountKey>) {
        let join = core_signed(data_tx(USER, CORE_ACCOUNT_KEY_INDEX, NOW, DataPayload::Join { key }));
        self.commit(vec![join]);
    }
}

pub fn data_tx(account_id: AccountId, key_index: u16, timestamp: u64, payload: DataPayload) -> DataTransaction {
    DataTransaction::new(SERVICE_CHAIN, 0, account_id, key_index, timestamp, payload)
}

/// Signed by `USER`'s registry key.
pub fn core_signed(mut transaction: DataTransaction) -> DataTransaction {
    transaction.key_index = CORE_ACCOUNT_KEY_INDEX;
    let identifier = transaction.identifier().unwrap();
    transaction.signature = sign(42, &identifier);
    transaction
}

/// Signed by the service key made from `seed`.
pub fn key_signed(mut transaction: DataTransaction, seed: u8) -> DataTransaction {
    let identifier = transaction.identifier().unwrap();
    transaction.signature = sign(seed, &identifier);
    transaction
}

/// A service key for `USER`, granted by `USER`'s registry key.
pub fn service_key(key_index: u16, seed: u8, expires: u64) -> ServiceAccountKey {
    let mut key = ServiceAccountKey {
        key_index,
        public_key: public_key(seed),
        created: 0,
        expires,
        revoked: None,
        authorization: [0u8; 64],
    };
    key.authorization = sign(42, &key.authorization_message(SERVICE_CHAIN, USER));
    key
}
