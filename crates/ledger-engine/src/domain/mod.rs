//! # Domain Layer
//!
//! Pure engine building blocks with no knowledge of concrete storage,
//! crypto or services.

pub mod cache;
pub mod config;
pub mod dirty;
pub mod errors;
pub mod hash_chain;
pub mod single_flight;
pub mod slice;
pub mod state;

pub use cache::{BoundedCache, SharedCache};
pub use config::{CacheConfig, LedgerConfig, ValidationConfig};
pub use dirty::{DirtyKind, DirtyMap};
pub use errors::{LedgerError, LedgerResult, StoreError};
pub use hash_chain::{HashChainVerifier, HashChainWriter};
pub use single_flight::{FlightSource, SingleFlightLoader};
pub use slice::{StoredTransaction, TransactionSlice};
pub use state::{next_state, LedgerEvent, LedgerState};
