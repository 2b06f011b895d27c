//! Ledger lifecycle state machine
//!
//! ```text
//! [UNINITIALIZED] ──initialize──→ [INITIALIZING] ──storage ready──→ [REPLAYING] ──activate──→ [ACTIVE]
//!       ↑                               │                                │                        │
//!       └──────── storage failed ───────┘                                │                        │
//!                                                                        ↓                        ↓
//!                                                    integrity failure ─→ [FAILED] ──stop───→ [STOPPED]
//!                                                                           │                     │
//!                [REPLAYING] ←──────────── operator rebuild ────────────────┘     initialize ─────┘
//! ```
//!
//! Integrity failures are only possible while entries are being applied,
//! i.e. from Initializing, Replaying or Active (a new block on an active ledger
//! is a one-block replay).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LedgerState {
    #[default]
    Uninitialized,
    Initializing,
    Replaying,
    Active,
    Stopped,
    /// Terminal until an operator-triggered rebuild.
    Failed,
}

impl LedgerState {
    /// Reads are served only from replayed state.
    pub fn is_readable(self) -> bool {
        matches!(self, LedgerState::Replaying | LedgerState::Active)
    }

    /// Entries may be applied.
    pub fn accepts_entries(self) -> bool {
        matches!(self, LedgerState::Replaying | LedgerState::Active)
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that drive state transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    InitializeRequested,
    StorageReady,
    StorageFailed,
    Activated,
    IntegrityFailure,
    StopRequested,
    RebuildRequested,
}

/// Next state for `event`, or `None` if the transition is not allowed.
pub fn next_state(current: LedgerState, event: LedgerEvent) -> Option<LedgerState> {
    use LedgerEvent::*;
    use LedgerState::*;

    match (current, event) {
        (Uninitialized | Stopped, InitializeRequested) => Some(Initializing),
        (Initializing, StorageReady) => Some(Replaying),
        (Initializing, StorageFailed) => Some(Uninitialized),
        (Replaying, Activated) => Some(Active),
        (Initializing | Replaying | Active, IntegrityFailure) => Some(Failed),
        (Failed, RebuildRequested) => Some(Replaying),
        (Failed, StopRequested) => Some(Stopped),
        (Failed, _) => None,
        (Uninitialized, StopRequested) => None,
        (_, StopRequested) => Some(Stopped),
        _ => None,
    }
}
