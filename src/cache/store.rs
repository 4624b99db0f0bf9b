//! Cache Store Module
//!
//! Dual-tier cache engine: a HashMap memory tier in front of a
//! [`PersistentStore`], with TTL expiry checked on read and size-based
//! eviction on write.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::cache::persist::WriteBehind;
use crate::cache::{
    CacheEntry, CacheStats, Clock, EvictionOrder, EvictionPolicy, PersistAction, PersistenceHook,
    PersistentStore, SetOptions, SystemClock, TracingHook, MAX_KEY_LENGTH,
};
use crate::error::{CacheError, Result};

/// Default prefix for keys written to the backing store.
pub const DEFAULT_NAMESPACE: &str = "cache:";

// == Store Config ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Prefix applied to every backing-store key
    pub namespace: String,
    /// Memory-tier entry cap used when `SetOptions::max_size` is absent
    pub max_size: usize,
    /// TTL used when `SetOptions::ttl` is absent; None = no expiry
    pub default_ttl: Option<Duration>,
    pub eviction: EvictionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_size: 1000,
            default_ttl: None,
            eviction: EvictionPolicy::Fifo,
        }
    }
}

// == Memory Tier ==
struct Slot {
    entry: CacheEntry,
    size: usize,
}

#[derive(Default)]
struct MemoryTier {
    entries: HashMap<String, Slot>,
    order: EvictionOrder,
    stats: CacheStats,
}

impl MemoryTier {
    fn insert(&mut self, key: &str, entry: CacheEntry, stamp: u64) {
        let size = entry.approx_size(key);
        self.entries.insert(key.to_string(), Slot { entry, size });
        self.order.record(key, stamp);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.order.remove(key);
        self.entries.remove(key).map(|slot| slot.entry)
    }

    /// Evicts oldest entries until at most `max_size` remain.
    fn evict_to(&mut self, max_size: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > max_size {
            let Some(key) = self.order.pop_oldest() else {
                break;
            };
            if self.entries.remove(&key).is_some() {
                self.stats.record_eviction();
                evicted.push(key);
            }
        }
        evicted
    }
}

enum Lookup {
    Hit(Value),
    Expired,
    Absent,
}

// == Cache Store ==
/// Keyed store with a memory tier and a best-effort persistent tier.
///
/// The memory tier is the source of truth. Writes reach the backing store
/// through an ordered write-behind queue; its failures are reported to the
/// [`PersistenceHook`] and never surface to callers.
///
/// Construct inside a tokio runtime: the write-behind task is spawned here.
pub struct CacheStore {
    memory: Mutex<MemoryTier>,
    backing: Arc<dyn PersistentStore>,
    writer: WriteBehind,
    hook: Arc<dyn PersistenceHook>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a store on the system clock that logs persistence failures.
    pub fn new(backing: Arc<dyn PersistentStore>, config: StoreConfig) -> Self {
        Self::builder(backing).config(config).build()
    }

    pub fn builder(backing: Arc<dyn PersistentStore>) -> CacheStoreBuilder {
        CacheStoreBuilder {
            backing,
            config: StoreConfig::default(),
            clock: Arc::new(SystemClock),
            hook: Arc::new(TracingHook),
        }
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// The memory tier is updated before this returns; the backing-store
    /// write is queued. Oldest entries are evicted afterwards if the memory
    /// tier holds more than the effective `max_size`.
    pub fn set(&self, key: &str, value: Value, opts: SetOptions) -> Result<()> {
        validate_key(key)?;

        let now = self.clock.now_ms();
        let entry = CacheEntry::new(value, now, opts.ttl.or(self.config.default_ttl));
        let payload = serde_json::to_string(&entry)?;
        let max_size = opts.max_size.unwrap_or(self.config.max_size);

        // Queue under the lock so backing writes follow memory order.
        let mut memory = self.memory.lock();
        memory.insert(key, entry, now);
        let evicted = memory.evict_to(max_size);
        self.writer.write(self.namespaced(key), payload);
        self.forget(evicted, "evicted by size cap");
        Ok(())
    }

    // == Get ==
    /// Returns the value for `key`, or None on a miss.
    ///
    /// Falls back to the backing store when the memory tier has no entry and
    /// keeps what it finds there. Expired entries are removed from both
    /// tiers and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if validate_key(key).is_err() {
            self.memory.lock().stats.record_miss();
            return None;
        }

        let now = self.clock.now_ms();
        let lookup = {
            let mut memory = self.memory.lock();
            let expired = match memory.entries.get(key) {
                Some(slot) => slot.entry.is_expired(now),
                None => false,
            };

            if expired {
                memory.remove(key);
                memory.stats.record_expiration();
                memory.stats.record_miss();
                self.writer.remove(self.namespaced(key));
                Lookup::Expired
            } else if let Some(slot) = memory.entries.get(key) {
                let value = slot.entry.value.clone();
                memory.stats.record_hit();
                if self.config.eviction == EvictionPolicy::Lru {
                    memory.order.record(key, now);
                }
                Lookup::Hit(value)
            } else {
                Lookup::Absent
            }
        };

        match lookup {
            Lookup::Hit(value) => Some(value),
            Lookup::Expired => {
                debug!(key = %key, "Entry expired on read");
                self.writer.flush().await;
                None
            }
            Lookup::Absent => self.hydrate(key, now).await,
        }
    }

    /// Loads `key` from the backing store into the memory tier.
    async fn hydrate(&self, key: &str, now: u64) -> Option<Value> {
        let namespaced = self.namespaced(key);

        // Pending writes for this key must land before we read it back.
        self.writer.flush().await;

        let raw = match self.backing.get(&namespaced).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.memory.lock().stats.record_miss();
                return None;
            }
            Err(err) => {
                self.hook.on_error(PersistAction::Read, key, &err);
                self.memory.lock().stats.record_miss();
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                self.hook.on_error(PersistAction::Read, key, &err.into());
                {
                    let mut memory = self.memory.lock();
                    memory.stats.record_miss();
                    // A set that raced this read has already queued a good copy.
                    if !memory.entries.contains_key(key) {
                        self.writer.remove(namespaced);
                    }
                }
                return None;
            }
        };

        if entry.is_expired(now) {
            {
                let mut memory = self.memory.lock();
                memory.stats.record_expiration();
                memory.stats.record_miss();
                if !memory.entries.contains_key(key) {
                    self.writer.remove(namespaced);
                }
            }
            debug!(key = %key, "Persisted entry expired on read");
            self.writer.flush().await;
            return None;
        }

        let value = {
            let mut memory = self.memory.lock();
            memory.stats.record_hit();
            // A concurrent set may have landed while we were reading.
            let existing = memory.entries.get(key).map(|slot| slot.entry.value.clone());
            if let Some(value) = existing {
                value
            } else {
                let stamp = match self.config.eviction {
                    EvictionPolicy::Fifo => entry.created_at,
                    EvictionPolicy::Lru => now,
                };
                let value = entry.value.clone();
                memory.insert(key, entry, stamp);
                let evicted = memory.evict_to(self.config.max_size);
                self.forget(evicted, "evicted by size cap");
                value
            }
        };

        debug!(key = %key, "Hydrated entry from backing store");
        Some(value)
    }

    // == Has ==
    /// True if `get` would return a value. Same side effects as `get`.
    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    // == Delete ==
    /// Removes `key` from both tiers. Returns once the backing store has
    /// been told to drop it.
    pub async fn delete(&self, key: &str) {
        {
            let mut memory = self.memory.lock();
            memory.remove(key);
            self.writer.remove(self.namespaced(key));
        }
        self.writer.flush().await;
    }

    // == Clear ==
    /// Removes every entry from the memory tier and every namespaced key
    /// from the backing store.
    pub async fn clear(&self) {
        let removed = {
            let mut memory = self.memory.lock();
            let removed = memory.entries.len();
            memory.entries.clear();
            memory.order.clear();
            self.writer.purge(self.config.namespace.clone());
            removed
        };

        self.writer.flush().await;
        debug!(removed, namespace = %self.config.namespace, "Cache cleared");
    }

    // == Keys ==
    /// Keys held in either tier, sorted.
    ///
    /// Expired memory entries are dropped from both tiers first, so they are
    /// not reported even if nobody has read them since they expired.
    pub async fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let (mut keys, expired) = {
            let mut memory = self.memory.lock();
            let expired: HashSet<String> = memory
                .entries
                .iter()
                .filter(|(_, slot)| slot.entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();

            for key in &expired {
                memory.remove(key);
                memory.stats.record_expiration();
                self.writer.remove(self.namespaced(key));
            }

            let live: BTreeSet<String> = memory.entries.keys().cloned().collect();
            (live, expired)
        };

        if !expired.is_empty() {
            debug!(expired = expired.len(), "Dropped expired entries while listing keys");
        }

        self.writer.flush().await;
        match self.backing.keys().await {
            Ok(persisted) => keys.extend(
                persisted
                    .iter()
                    .filter_map(|k| k.strip_prefix(self.config.namespace.as_str()))
                    // A failed backing delete must not bring the key back
                    .filter(|k| !expired.contains(*k))
                    .map(str::to_string),
            ),
            Err(err) => self.hook.on_error(PersistAction::List, "", &err),
        }

        keys.into_iter().collect()
    }

    // == Size ==
    /// Number of entries in the memory tier.
    pub fn size(&self) -> usize {
        self.memory.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let memory = self.memory.lock();
        let mut stats = memory.stats.clone();

        stats.count = memory.entries.len();
        stats.approx_bytes = memory.entries.values().map(|slot| slot.size).sum();
        stats.oldest_created_at = memory.entries.values().map(|s| s.entry.created_at).min();
        stats.newest_created_at = memory.entries.values().map(|s| s.entry.created_at).max();
        stats
    }

    // == Sweep ==
    /// Purges expired memory entries and re-applies the size cap.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut memory = self.memory.lock();
        let expired: Vec<String> = memory
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            memory.remove(key);
            memory.stats.record_expiration();
        }

        let evicted = memory.evict_to(self.config.max_size);
        let removed = expired.len() + evicted.len();
        self.forget(expired, "expired during sweep");
        self.forget(evicted, "evicted by size cap");
        removed
    }

    // == Flush ==
    /// Waits for every queued backing-store operation to be applied.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.namespace, key)
    }

    /// Queues backing-store removals. Call with the memory lock held so the
    /// removals stay ordered with concurrent writes to the same keys.
    fn forget(&self, keys: Vec<String>, reason: &'static str) {
        for key in keys {
            debug!(key = %key, reason, "Removing entry from backing store");
            self.writer.remove(self.namespaced(&key));
        }
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("size", &self.size())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

// == Builder ==
/// Builder for a [`CacheStore`] with a custom clock or persistence hook.
pub struct CacheStoreBuilder {
    backing: Arc<dyn PersistentStore>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    hook: Arc<dyn PersistenceHook>,
}

impl CacheStoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn PersistenceHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn build(self) -> CacheStore {
        let writer = WriteBehind::spawn(Arc::clone(&self.backing), Arc::clone(&self.hook));
        CacheStore {
            memory: Mutex::new(MemoryTier::default()),
            backing: self.backing,
            writer,
            hook: self.hook,
            clock: self.clock,
            config: self.config,
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
