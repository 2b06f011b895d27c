//! # Ledger Types Crate
//!
//! Entities, operations and result codes shared by the registry ledger, the
//! service ledgers and the layers that sit on top of them (block production,
//! request handling, networking).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every persisted record and every operation
//!   payload is defined here, together with its canonical byte encoding.
//! - **Stable Encoding**: `BinaryRecord::to_bytes` is the on-disk format and the
//!   input of the transaction hash chain. Field order is part of the format.
//! - **No Behaviour Beyond Invariants**: entities know how to check their own
//!   validity windows; applying operations belongs to the engine.

pub mod codec;
pub mod entities;
pub mod operations;
pub mod results;

pub use codec::{BinaryRecord, CodecError};
pub use entities::*;
pub use operations::*;
pub use results::*;
