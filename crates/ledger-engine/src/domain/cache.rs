//! # Bounded Cache (Generational)
//!
//! Read accelerator over a record store. Never authoritative: an evicted entry
//! is rebuilt from storage on the next read.
//!
//! ## Algorithm: Generations
//!
//! Entries live in a deque of generations, newest first. Inserts go into the
//! newest generation. It is sealed and a fresh one opened when it is full or
//! older than `lifespan / depth`. When more than `depth` generations exist the
//! oldest is dropped as a whole. A hit in an older generation moves the entry
//! into the newest, so hot entries survive and cold ones age out, without
//! per-access timestamps.
//!
//! Generations whose last insert is older than `lifespan` are dropped on
//! access and by `sweep`.
//!
//! Every operation has an `_at(now)` variant so eviction is testable without
//! sleeping.

use super::config::CacheConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

struct Generation<K, V> {
    opened: Instant,
    last_insert: Instant,
    entries: HashMap<K, Arc<V>>,
}

impl<K: Eq + Hash, V> Generation<K, V> {
    fn new(now: Instant) -> Self {
        Self {
            opened: now,
            last_insert: now,
            entries: HashMap::new(),
        }
    }
}

/// Generation-bounded map from key to shared entity.
pub struct BoundedCache<K, V> {
    config: CacheConfig,
    generations: VecDeque<Generation<K, V>>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            generations: VecDeque::new(),
        }
    }

    pub fn try_get(&mut self, key: &K) -> Option<Arc<V>> {
        self.try_get_at(key, Instant::now())
    }

    pub fn try_get_at(&mut self, key: &K, now: Instant) -> Option<Arc<V>> {
        self.expire(now);
        let position = self
            .generations
            .iter()
            .position(|g| g.entries.contains_key(key))?;
        if position == 0 {
            return self.generations[0].entries.get(key).cloned();
        }
        let value = self.generations[position].entries.remove(key)?;
        self.insert_newest(key.clone(), Arc::clone(&value), now);
        Some(value)
    }

    /// Insert or replace.
    pub fn set(&mut self, key: K, value: Arc<V>) {
        self.set_at(key, value, Instant::now());
    }

    pub fn set_at(&mut self, key: K, value: Arc<V>, now: Instant) {
        self.expire(now);
        for generation in self.generations.iter_mut() {
            generation.entries.remove(&key);
        }
        self.insert_newest(key, value, now);
    }

    pub fn contains(&mut self, key: &K) -> bool {
        self.contains_at(key, Instant::now())
    }

    pub fn contains_at(&mut self, key: &K, now: Instant) -> bool {
        self.expire(now);
        self.generations.iter().any(|g| g.entries.contains_key(key))
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.generations
            .iter_mut()
            .find_map(|g| g.entries.remove(key))
    }

    pub fn clear(&mut self) {
        self.generations.clear();
    }

    /// Drop expired generations, returning the number of evicted entries.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        self.expire(now)
    }

    pub fn len(&self) -> usize {
        self.generations.iter().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    fn insert_newest(&mut self, key: K, value: Arc<V>, now: Instant) {
        let rotate = match self.generations.front() {
            None => true,
            Some(newest) => {
                (newest.entries.len() >= self.config.generation_capacity.max(1)
                    && !newest.entries.contains_key(&key))
                    || now.saturating_duration_since(newest.opened) >= self.config.generation_span()
            }
        };
        if rotate {
            self.generations.push_front(Generation::new(now));
            while self.generations.len() > self.config.depth.max(1) {
                self.generations.pop_back();
            }
        }
        if let Some(newest) = self.generations.front_mut() {
            newest.last_insert = now;
            newest.entries.insert(key, value);
        }
    }

    fn expire(&mut self, now: Instant) -> usize {
        let lifespan = self.config.lifespan();
        let mut evicted = 0;
        while let Some(oldest) = self.generations.back() {
            if now.saturating_duration_since(oldest.last_insert) < lifespan {
                break;
            }
            evicted += oldest.entries.len();
            self.generations.pop_back();
        }
        evicted
    }
}

/// A `BoundedCache` behind a short critical section.
///
/// The lock is held for one map operation only, never across I/O. Loaders
/// decode outside the lock and publish with `insert_if_absent`, which returns
/// the race winner, so readers always share one `Arc` per cached key.
pub struct SharedCache<K, V> {
    inner: Mutex<BoundedCache<K, V>>,
}

impl<K: Eq + Hash + Clone, V> SharedCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(BoundedCache::new(config)),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().try_get(key)
    }

    /// Publish a freshly loaded value unless another loader won the race.
    pub fn insert_if_absent(&self, key: K, value: V) -> Arc<V> {
        let mut cache = self.inner.lock();
        if let Some(existing) = cache.try_get(&key) {
            return existing;
        }
        let value = Arc::new(value);
        cache.set(key, Arc::clone(&value));
        value
    }

    pub fn set(&self, key: K, value: Arc<V>) {
        self.inner.lock().set(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn sweep(&self) -> usize {
        self.inner.lock().sweep_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
