//! # Engine Configuration
//!
//! Plain structs with defaults. Hosts embed them in their own config files;
//! every field has a default, so partial documents deserialize.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Eviction bounds of one bounded cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries untouched for this long are evicted (seconds).
    pub lifespan_secs: u64,
    /// Number of generations kept. The oldest is dropped when exceeded.
    pub depth: usize,
    /// Entries per generation before a new generation is opened.
    pub generation_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lifespan_secs: 600,
            depth: 4,
            generation_capacity: 4_096,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan_secs = lifespan.as_secs();
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_generation_capacity(mut self, capacity: usize) -> Self {
        self.generation_capacity = capacity;
        self
    }

    pub fn lifespan(&self) -> Duration {
        Duration::from_secs(self.lifespan_secs)
    }

    /// Age at which the newest generation is sealed.
    pub(crate) fn generation_span(&self) -> Duration {
        self.lifespan() / self.depth.max(1) as u32
    }
}

/// Limits enforced by the structural stage of the admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// How far a transaction timestamp may lie in the future (seconds).
    pub max_future_skew_secs: u64,
    /// Oldest acceptable transaction age (seconds).
    pub max_age_secs: u64,
    /// Maximum size of `Data` content and feature requests.
    pub max_content_size: usize,
    pub max_attachments: usize,
    pub max_attachment_size: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_future_skew_secs: 30,
            max_age_secs: 3_600,
            max_content_size: 64 * 1024,
            max_attachments: 16,
            max_attachment_size: 32 * 1024 * 1024,
        }
    }
}

impl ValidationConfig {
    pub fn with_max_future_skew(mut self, secs: u64) -> Self {
        self.max_future_skew_secs = secs;
        self
    }

    pub fn with_max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    pub fn with_max_content_size(mut self, bytes: usize) -> Self {
        self.max_content_size = bytes;
        self
    }

    pub fn with_max_attachments(mut self, count: usize) -> Self {
        self.max_attachments = count;
        self
    }
}

/// Configuration of one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Locally configured endpoints of this ledger's chain.
    pub endpoints: BTreeSet<String>,
    /// Bootstrap / beacon endpoints.
    pub beacons: BTreeSet<String>,
    pub account_cache: CacheConfig,
    pub registration_cache: CacheConfig,
    /// Check the first entry of a slice against the checkpoint hash.
    pub verify_slice_boundaries: bool,
    /// Interval of the background cache sweeper (seconds).
    pub sweep_interval_secs: u64,
    pub validation: ValidationConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoints: BTreeSet::new(),
            beacons: BTreeSet::new(),
            account_cache: CacheConfig::default(),
            registration_cache: CacheConfig::default().with_generation_capacity(512),
            verify_slice_boundaries: true,
            sweep_interval_secs: 60,
            validation: ValidationConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(endpoint.into());
        self
    }

    pub fn with_beacon(mut self, beacon: impl Into<String>) -> Self {
        self.beacons.insert(beacon.into());
        self
    }

    pub fn with_account_cache(mut self, config: CacheConfig) -> Self {
        self.account_cache = config;
        self
    }

    pub fn with_registration_cache(mut self, config: CacheConfig) -> Self {
        self.registration_cache = config;
        self
    }

    pub fn with_slice_boundary_checks(mut self, enabled: bool) -> Self {
        self.verify_slice_boundaries = enabled;
        self
    }

    pub fn with_validation(mut self, config: ValidationConfig) -> Self {
        self.validation = config;
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
