//! # Adapters
//!
//! In-process implementations of the outbound ports.

pub mod attachments;
pub mod crypto;
pub mod quorum;
pub mod storage;
pub mod time;
pub mod transactions;

pub use attachments::MemoryAttachmentStore;
pub use crypto::{Ed25519NodeSigner, Ed25519Verifier};
pub use quorum::ThresholdQuorum;
pub use storage::{FileRecordStore, FileStorageProvider, MemoryRecordStore, MemoryStorageProvider};
pub use time::{ManualTimeSource, SystemTimeSource};
pub use transactions::MemoryTransactionStorage;
