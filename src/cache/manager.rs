use super::registry::KeyRegistry;
use super::store::{EvictionListener, MemoryStore, StoreStats, StoredValue};
use crate::core::config::CacheConfig;
use crate::core::errors::Result;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Synthetic value occupying a key while its lock is held, tagged with the
/// registry claim that owns it
#[derive(Debug, Clone, Copy)]
struct LockMarker(u64);

/// Cache manager statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub store: StoreStats,
    pub tracked_keys: usize,
    pub loads: u64,
    pub locks_acquired: u64,
    pub lock_contentions: u64,
}

/// Thread-safe, key-tracked in-memory cache with advisory per-key locks.
///
/// Loads on miss are not de-duplicated: two callers missing the same key at
/// the same time will both run their acquire function.
#[derive(Debug)]
pub struct MemoryCacheManager {
    store: MemoryStore,
    registry: Arc<KeyRegistry>,
    config: CacheConfig,
    loads: AtomicU64,
    locks_acquired: AtomicU64,
    lock_contentions: AtomicU64,
}

impl MemoryCacheManager {
    /// Manager with its own key registry
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(KeyRegistry::new());
        let listener: Arc<dyn EvictionListener> = registry.clone();
        let store = MemoryStore::new(config.max_entries, vec![listener]);

        Ok(Self {
            store,
            registry,
            config,
            loads: AtomicU64::new(0),
            locks_acquired: AtomicU64::new(0),
            lock_contentions: AtomicU64::new(0),
        })
    }

    /// Start the background expiry sweep if `sweep_interval` is configured.
    /// Must be called from within a Tokio runtime.
    pub fn with_sweeper(mut self) -> Self {
        if let Some(period) = self.config.sweep_interval {
            self.store.start_sweeper(period);
        }
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key` for `ttl`
    pub fn set<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        self.set_value(key, Arc::new(value), ttl);
    }

    /// `set` that does nothing for `None`
    pub fn set_optional<T>(&self, key: &str, value: Option<T>, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        if let Some(value) = value {
            self.set(key, value, ttl);
        }
    }

    fn set_value(&self, key: &str, value: StoredValue, ttl: Duration) {
        if key.is_empty() {
            warn!("Ignoring cache set with an empty key");
            return;
        }
        // Store first, then register: eviction reconciliation relies on this order
        self.store.set(key, value, ttl);
        self.registry.register(key);
    }

    /// Cached value for `key` if present, unexpired and of type `T`
    pub fn peek<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.store
            .get(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// Cached value, or the result of `acquire` stored for `cache_time`.
    ///
    /// `cache_time` of `None` uses the configured default; a zero duration
    /// returns the loaded value without caching it.
    pub fn get<T, F>(&self, key: &str, acquire: F, cache_time: Option<Duration>) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        match self.try_get(key, || Ok::<T, Infallible>(acquire()), cache_time) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like `get`, but a failing `acquire` propagates its error unchanged
    /// and leaves the cache untouched.
    pub fn try_get<T, E, F>(&self, key: &str, acquire: F, cache_time: Option<Duration>) -> std::result::Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(value) = self.peek::<T>(key) {
            return Ok(value);
        }

        let value = acquire()?;
        self.loads.fetch_add(1, Ordering::Relaxed);

        let ttl = cache_time.unwrap_or(self.config.default_ttl);
        if !ttl.is_zero() {
            self.set(key, value.clone(), ttl);
        }
        Ok(value)
    }

    /// Like `get`, where `None` from `acquire` is an empty result that is never cached
    pub fn get_optional<T, F>(&self, key: &str, acquire: F, cache_time: Option<Duration>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Option<T>,
    {
        if let Some(value) = self.peek::<T>(key) {
            return Some(value);
        }

        let value = acquire();
        self.loads.fetch_add(1, Ordering::Relaxed);
        if value.is_none() {
            debug!(key, "Acquire returned no value; nothing cached");
        }

        let ttl = cache_time.unwrap_or(self.config.default_ttl);
        if !ttl.is_zero() {
            self.set_optional(key, value.clone(), ttl);
        }
        value
    }

    /// True iff `key` resolves to a live entry
    pub fn is_set(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Idempotent
    pub fn remove(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.registry.try_remove(key);
        self.store.remove(key);
    }

    /// Invalidate every entry, tracked or not
    pub fn clear(&self) {
        let keys = self.registry.tracked_keys();
        for key in &keys {
            self.store.remove(key);
        }
        self.registry.clear();

        let generation = self.store.advance_generation();
        debug!(removed = keys.len(), generation, "Cache cleared");
    }

    /// Run `action` while holding the advisory lock for `key`.
    ///
    /// Returns `Ok(false)` without running `action` if the key is empty or
    /// already locked (or tracked). The lock is released on every path, including
    /// when `action` fails or panics; a failure is returned after release.
    pub fn try_perform_action_with_lock<E, F>(
        &self,
        key: &str,
        expiration: Duration,
        action: F,
    ) -> std::result::Result<bool, E>
    where
        F: FnOnce() -> std::result::Result<(), E>,
    {
        if key.is_empty() {
            warn!("Ignoring lock request with an empty key");
            return Ok(false);
        }
        let Some(claim) = self.registry.try_claim(key) else {
            self.lock_contentions.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Lock already held");
            return Ok(false);
        };

        let _guard = LockGuard {
            manager: self,
            key,
            claim,
        };
        self.store.set(key, Arc::new(LockMarker(claim)), expiration);
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);

        action()?;
        Ok(true)
    }

    /// Infallible form of `try_perform_action_with_lock`
    pub fn perform_action_with_lock<F>(&self, key: &str, expiration: Duration, action: F) -> bool
    where
        F: FnOnce(),
    {
        let result = self.try_perform_action_with_lock(key, expiration, || {
            action();
            Ok::<(), Infallible>(())
        });
        match result {
            Ok(acquired) => acquired,
            Err(never) => match never {},
        }
    }

    /// `perform_action_with_lock` using the configured lock TTL
    pub fn with_lock<F>(&self, key: &str, action: F) -> bool
    where
        F: FnOnce(),
    {
        self.perform_action_with_lock(key, self.config.lock_ttl, action)
    }

    /// Snapshot of tracked keys; may briefly include evicted keys
    pub fn get_keys(&self) -> Vec<String> {
        self.registry.keys()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            store: self.store.stats(),
            tracked_keys: self.registry.len(),
            loads: self.loads.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
        }
    }
}

struct LockGuard<'a> {
    manager: &'a MemoryCacheManager,
    key: &'a str,
    claim: u64,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Release only what this claim still owns: if the marker expired and
        // another caller took the key, its marker and claim stay put
        let claim = self.claim;
        let manager = self.manager;
        manager.store.remove_if(self.key, |value| {
            value
                .downcast_ref::<LockMarker>()
                .is_some_and(|marker| marker.0 == claim)
        });

        // A value cached under the key during the action outlives the lock
        if manager.registry.release_claim(self.key, claim) {
            manager
                .store
                .if_live(self.key, || manager.registry.register(self.key));
        }
        debug!(key = self.key, claim, "Lock released");
    }
}
