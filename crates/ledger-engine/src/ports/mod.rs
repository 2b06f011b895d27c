//! # Ports Layer
//!
//! ## Hexagonal Architecture
//!
//! - `inbound.rs` - Driving ports (what ledgers expose to other layers)
//! - `outbound.rs` - Driven ports (collaborators the ledgers consume)

pub mod inbound;
pub mod outbound;

pub use inbound::{RegistryView, TransactionAdmission};
pub use outbound::{
    AttachmentStore, NodeSigner, QuorumValidator, RecordLayout, RecordStore, ServiceHost,
    ServiceResponse, ServiceVerdict, SignatureVerifier, StorageProvider, TimeSource,
    TransactionStorage,
};
