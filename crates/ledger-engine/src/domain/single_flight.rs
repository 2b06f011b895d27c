//! # Single-Flight Loader
//!
//! At-most-once compute-or-fetch under concurrent callers.
//!
//! ## Algorithm
//!
//! 1. Fast path: `query` the source. A present value is returned without
//!    touching the gate.
//! 2. Slow path: take the loader's gate, `query` again (a previous holder may
//!    have produced the value meanwhile), and only if still absent call the
//!    expensive `store`.
//!
//! The gate is held for exactly one `store` call. A failing `store` is logged
//! and swallowed: the caller receives `V::default()`, which it must read as
//! "not available". Callers that queued behind a failed flight share its
//! result instead of retrying, so one burst of callers costs one `store`.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Source of values for a `SingleFlightLoader`.
pub trait FlightSource<K, V> {
    type Error: fmt::Display;

    /// Cheap probe. Must not block on I/O.
    fn query(&self, key: &K) -> Option<V>;

    /// Expensive fetch/construct/persist. Called at most once concurrently
    /// per loader.
    fn store(&self, key: &K) -> Result<V, Self::Error>;
}

/// Serializes the slow path of loads that must not run twice at once.
pub struct SingleFlightLoader {
    name: &'static str,
    /// Guards the slow path; holds whether the last flight failed.
    gate: Mutex<bool>,
    /// Completed flights, bumped under the gate.
    flights: AtomicU64,
}

impl SingleFlightLoader {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            gate: Mutex::new(false),
            flights: AtomicU64::new(0),
        }
    }

    pub fn get<K, V, S>(&self, key: &K, source: &S) -> V
    where
        K: fmt::Debug,
        V: Default,
        S: FlightSource<K, V>,
    {
        if let Some(value) = source.query(key) {
            return value;
        }

        let seen = self.flights.load(Ordering::Acquire);
        let mut last_failed = self.gate.lock();
        if let Some(value) = source.query(key) {
            debug!("[{}] {:?} produced by a concurrent caller", self.name, key);
            return value;
        }
        if *last_failed && self.flights.load(Ordering::Acquire) != seen {
            debug!("[{}] {:?} failed in a concurrent flight", self.name, key);
            return V::default();
        }

        let result = source.store(key);
        *last_failed = result.is_err();
        self.flights.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("[{}] load of {:?} failed: {}", self.name, key, e);
                V::default()
            }
        }
    }
}

impl fmt::Debug for SingleFlightLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightLoader")
            .field("name", &self.name)
            .finish()
    }
}
