use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

/// Type-erased cached value
pub type StoredValue = Arc<dyn Any + Send + Sync>;

/// Why an entry left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Explicit removal
    Removed,
    /// Overwritten by a newer value for the same key
    Replaced,
    /// Absolute expiration elapsed
    Expired,
    /// Created under an older invalidation generation
    Invalidated,
    /// Dropped to stay within `max_entries`
    Capacity,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Removed => "removed",
            Self::Replaced => "replaced",
            Self::Expired => "expired",
            Self::Invalidated => "invalidated",
            Self::Capacity => "capacity",
        };
        f.write_str(name)
    }
}

/// On-evict notification channel.
///
/// Listeners run on the thread that observed the eviction, after the entry
/// has left the map and with no store guards held.
pub trait EvictionListener: Send + Sync {
    fn on_evicted(&self, key: &str, reason: EvictionReason, store: StoreView<'_>);
}

/// Read-only view handed to eviction listeners
#[derive(Clone, Copy)]
pub struct StoreView<'a> {
    inner: &'a StoreInner,
}

impl StoreView<'_> {
    /// True if a live entry for `key` exists right now
    pub fn contains(&self, key: &str) -> bool {
        self.if_live(key, || ()).is_some()
    }

    /// Run `f` only if a live entry for `key` exists, holding the entry so it
    /// cannot be removed until `f` returns. `f` must not touch the store.
    pub fn if_live<R>(&self, key: &str, f: impl FnOnce() -> R) -> Option<R> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let entry = self.inner.entries.get(key)?;
        if entry.dead_reason(Instant::now(), generation).is_some() {
            return None;
        }
        let result = f();
        drop(entry);
        Some(result)
    }
}

struct StoreEntry {
    value: StoredValue,
    expires_at: Instant,
    generation: u64,
}

impl StoreEntry {
    fn dead_reason(&self, now: Instant, generation: u64) -> Option<EvictionReason> {
        if self.generation < generation {
            Some(EvictionReason::Invalidated)
        } else if now >= self.expires_at {
            Some(EvictionReason::Expired)
        } else {
            None
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub generation: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub removed_count: u64,
    pub expired_count: u64,
    pub invalidated_count: u64,
    pub capacity_evictions: u64,
    pub sweep_count: u64,
}

impl StoreStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    removed: AtomicU64,
    expired: AtomicU64,
    invalidated: AtomicU64,
    capacity: AtomicU64,
    sweeps: AtomicU64,
}

struct StoreInner {
    entries: DashMap<String, StoreEntry>,
    generation: AtomicU64,
    max_entries: Option<usize>,
    listeners: Vec<Arc<dyn EvictionListener>>,
    counters: Counters,
}

impl StoreInner {
    fn notify(&self, key: &str, reason: EvictionReason) {
        match reason {
            EvictionReason::Removed => self.counters.removed.fetch_add(1, Ordering::Relaxed),
            EvictionReason::Expired => self.counters.expired.fetch_add(1, Ordering::Relaxed),
            EvictionReason::Invalidated => {
                self.counters.invalidated.fetch_add(1, Ordering::Relaxed)
            }
            EvictionReason::Capacity => self.counters.capacity.fetch_add(1, Ordering::Relaxed),
            EvictionReason::Replaced => 0,
        };

        debug!(key, %reason, "Cache entry evicted");
        for listener in &self.listeners {
            listener.on_evicted(key, reason, StoreView { inner: self });
        }
    }

    /// Remove `key` only if it is dead, reporting the reason it died
    fn evict_if_dead(&self, key: &str) -> Option<EvictionReason> {
        let generation = self.generation.load(Ordering::SeqCst);
        let now = Instant::now();
        let (_, entry) = self
            .entries
            .remove_if(key, |_, entry| entry.dead_reason(now, generation).is_some())?;
        let reason = entry
            .dead_reason(now, generation)
            .unwrap_or(EvictionReason::Expired);
        self.notify(key, reason);
        Some(reason)
    }

    fn purge_dead(&self) -> usize {
        let generation = self.generation.load(Ordering::SeqCst);
        let now = Instant::now();
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().dead_reason(now, generation).is_some())
            .map(|entry| entry.key().clone())
            .collect();

        dead.iter()
            .filter(|key| self.evict_if_dead(key).is_some())
            .count()
    }

    fn enforce_capacity(&self, protected_key: &str) {
        let Some(max_entries) = self.max_entries else {
            return;
        };
        if self.entries.len() <= max_entries {
            return;
        }

        self.purge_dead();

        while self.entries.len() > max_entries {
            // Soonest-to-expire goes first; the entry just written is never the victim
            let victim = self
                .entries
                .iter()
                .filter(|entry| entry.key() != protected_key)
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                self.notify(&victim, EvictionReason::Capacity);
            }
        }
    }
}

/// In-memory TTL store underneath the cache manager.
///
/// Every entry carries the invalidation generation it was written under;
/// advancing the generation logically kills every older entry at once.
pub struct MemoryStore {
    inner: Arc<StoreInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryStore {
    pub fn new(max_entries: Option<usize>, listeners: Vec<Arc<dyn EvictionListener>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                generation: AtomicU64::new(0),
                max_entries,
                listeners,
                counters: Counters::default(),
            }),
            sweeper: None,
        }
    }

    /// Spawn a background task purging dead entries every `period`.
    /// Must be called from within a Tokio runtime.
    pub fn start_sweeper(&mut self, period: Duration) {
        if let Some(existing) = self.sweeper.take() {
            existing.abort();
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let start = Instant::now();
                let purged = inner.purge_dead();
                inner.counters.sweeps.fetch_add(1, Ordering::Relaxed);
                if purged > 0 {
                    debug!(purged, elapsed = ?start.elapsed(), "Cache sweep completed");
                }
            }
        });

        info!(period = ?period, "Cache sweeper started");
        self.sweeper = Some(handle);
    }

    pub fn set(&self, key: &str, value: StoredValue, ttl: Duration) {
        let entry = StoreEntry {
            value,
            expires_at: Instant::now() + ttl,
            generation: self.inner.generation.load(Ordering::SeqCst),
        };

        if self.inner.entries.insert(key.to_string(), entry).is_some() {
            self.inner.notify(key, EvictionReason::Replaced);
        }
        self.inner.enforce_capacity(key);
    }

    /// Live value for `key`; dead entries are evicted on the way
    pub fn get(&self, key: &str) -> Option<StoredValue> {
        if self.inner.evict_if_dead(key).is_none() {
            if let Some(entry) = self.inner.entries.get(key) {
                let generation = self.inner.generation.load(Ordering::SeqCst);
                if entry.dead_reason(Instant::now(), generation).is_none() {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(Arc::clone(&entry.value));
                }
            }
        }
        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.evict_if_dead(key);
        StoreView { inner: &self.inner }.contains(key)
    }

    /// See `StoreView::if_live`
    pub fn if_live<R>(&self, key: &str, f: impl FnOnce() -> R) -> Option<R> {
        StoreView { inner: &self.inner }.if_live(key, f)
    }

    /// Returns true if an entry (live or not) was removed
    pub fn remove(&self, key: &str) -> bool {
        match self.inner.entries.remove(key) {
            Some(_) => {
                self.inner.notify(key, EvictionReason::Removed);
                true
            }
            None => false,
        }
    }

    /// Remove `key` only if `predicate` accepts its current value
    pub fn remove_if<P>(&self, key: &str, predicate: P) -> bool
    where
        P: FnOnce(&StoredValue) -> bool,
    {
        match self
            .inner
            .entries
            .remove_if(key, |_, entry| predicate(&entry.value))
        {
            Some(_) => {
                self.inner.notify(key, EvictionReason::Removed);
                true
            }
            None => false,
        }
    }

    /// Invalidate every entry written so far. Returns the new generation.
    pub fn advance_generation(&self) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Cache generation advanced");
        generation
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn purge_dead(&self) -> usize {
        self.inner.purge_dead()
    }

    /// Physical entry count, including dead entries not yet purged
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let counters = &self.inner.counters;
        StoreStats {
            entries: self.inner.entries.len(),
            generation: self.generation(),
            hit_count: counters.hits.load(Ordering::Relaxed),
            miss_count: counters.misses.load(Ordering::Relaxed),
            removed_count: counters.removed.load(Ordering::Relaxed),
            expired_count: counters.expired.load(Ordering::Relaxed),
            invalidated_count: counters.invalidated.load(Ordering::Relaxed),
            capacity_evictions: counters.capacity.load(Ordering::Relaxed),
            sweep_count: counters.sweeps.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.inner.entries.len())
            .field("generation", &self.generation())
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(String, EvictionReason)>>,
    }

    impl EvictionListener for RecordingListener {
        fn on_evicted(&self, key: &str, reason: EvictionReason, _store: StoreView<'_>) {
            self.events.lock().unwrap().push((key.to_string(), reason));
        }
    }

    fn store_with_listener(max_entries: Option<usize>) -> (MemoryStore, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let store = MemoryStore::new(max_entries, vec![listener.clone() as Arc<dyn EvictionListener>]);
        (store, listener)
    }

    fn value<T: Send + Sync + 'static>(v: T) -> StoredValue {
        Arc::new(v)
    }

    #[test]
    fn test_store_basic_operations() {
        let (store, listener) = store_with_listener(None);
        store.set("k", value("v"), Duration::from_secs(60));

        let got = store.get("k").unwrap();
        assert_eq!(got.downcast_ref::<&str>(), Some(&"v"));
        assert!(store.contains("k"));

        store.set("k", value("v2"), Duration::from_secs(60));
        assert!(store.remove("k"));
        assert!(!store.remove("k"));

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("k".to_string(), EvictionReason::Replaced),
                ("k".to_string(), EvictionReason::Removed)
            ]
        );

        let stats = store.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.removed_count, 1);
    }

    #[test]
    fn test_remove_if_checks_current_value() {
        let (store, listener) = store_with_listener(None);
        store.set("k", value(1u32), Duration::from_secs(60));

        assert!(!store.remove_if("k", |v| v.downcast_ref::<u32>() == Some(&2)));
        assert!(store.contains("k"));
        assert!(store.remove_if("k", |v| v.downcast_ref::<u32>() == Some(&1)));
        assert!(!store.contains("k"));
        assert!(!store.remove_if("k", |_| true));

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(events, vec![("k".to_string(), EvictionReason::Removed)]);
    }

    #[test]
    fn test_generation_invalidates_older_entries() {
        let (store, listener) = store_with_listener(None);
        store.set("old", value(1u32), Duration::from_secs(60));
        store.advance_generation();
        store.set("new", value(2u32), Duration::from_secs(60));

        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
        assert_eq!(
            listener.events.lock().unwrap().as_slice(),
            &[("old".to_string(), EvictionReason::Invalidated)]
        );
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_on_access() {
        let (store, listener) = store_with_listener(None);
        store.set("short", value(1u8), Duration::from_millis(20));
        sleep(Duration::from_millis(40)).await;

        assert!(!store.contains("short"));
        assert!(store.is_empty());
        assert_eq!(
            listener.events.lock().unwrap().as_slice(),
            &[("short".to_string(), EvictionReason::Expired)]
        );
    }

    #[test]
    fn test_capacity_evicts_soonest_expiring() {
        let (store, listener) = store_with_listener(Some(2));
        store.set("a", value(1u8), Duration::from_secs(10));
        store.set("b", value(2u8), Duration::from_secs(100));
        store.set("c", value(3u8), Duration::from_secs(50));

        assert_eq!(store.len(), 2);
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert_eq!(
            listener.events.lock().unwrap().as_slice(),
            &[("a".to_string(), EvictionReason::Capacity)]
        );
    }

    #[tokio::test]
    async fn test_sweeper_purges_dead_entries() {
        let (mut store, listener) = store_with_listener(None);
        store.start_sweeper(Duration::from_millis(20));
        store.set("k", value(1u8), Duration::from_millis(10));

        sleep(Duration::from_millis(100)).await;

        assert!(store.is_empty());
        assert!(store.stats().sweep_count > 0);
        assert_eq!(listener.events.lock().unwrap().len(), 1);
    }
}
