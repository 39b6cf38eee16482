use super::store::{EvictionListener, EvictionReason, StoreView};
use dashmap::mapref::entry::Entry;
use dashmap::try_result::TryResult;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// What happened when a key was unregistered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Removed,
    /// The shard was busy; the key is flagged and purged on a later sweep
    MarkedAbsent,
    NotTracked,
    /// Neither removal nor marking was possible without blocking
    Deferred,
}

#[derive(Debug)]
struct KeyState {
    /// `true` means known present, `false` means evicted but not yet purged
    present: AtomicBool,
    /// Id of the lock claim that created this entry; 0 for plain registrations
    claim: u64,
}

impl KeyState {
    fn new(claim: u64) -> Self {
        Self {
            present: AtomicBool::new(true),
            claim,
        }
    }

    fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }
}

/// Tracks which keys one cache manager believes are present.
///
/// Each manager owns its registry; it is never shared across stores, since
/// reconciliation only consults the store that reported the eviction.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: DashMap<String, KeyState>,
    next_claim: AtomicU64,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` present, overwriting an absent mark
    pub fn register(&self, key: &str) {
        self.keys
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(0))
            .present
            .store(true, Ordering::SeqCst);
    }

    /// Atomic add-if-absent. Returns the claim id, or `None` if the key is
    /// already tracked.
    pub fn try_claim(&self, key: &str) -> Option<u64> {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let claim = self.next_claim.fetch_add(1, Ordering::Relaxed) + 1;
                vacant.insert(KeyState::new(claim));
                Some(claim)
            }
        }
    }

    /// Drop `key` only if it is still held by `claim`. A newer claim on the
    /// same key is left alone.
    pub fn release_claim(&self, key: &str, claim: u64) -> bool {
        self.keys
            .remove_if(key, |_, state| state.claim == claim)
            .is_some()
    }

    /// Unconditional removal
    pub fn unregister(&self, key: &str) -> bool {
        self.keys.remove(key).is_some()
    }

    /// Remove without blocking, falling back to flagging the key absent
    /// when its shard is held by a concurrent iteration.
    pub fn try_remove(&self, key: &str) -> Reconciliation {
        match self.keys.try_entry(key.to_string()) {
            Some(Entry::Occupied(occupied)) => {
                occupied.remove();
                Reconciliation::Removed
            }
            Some(Entry::Vacant(_)) => Reconciliation::NotTracked,
            None => match self.keys.try_get(key) {
                TryResult::Present(state) => {
                    state.present.store(false, Ordering::SeqCst);
                    Reconciliation::MarkedAbsent
                }
                TryResult::Absent => Reconciliation::NotTracked,
                TryResult::Locked => Reconciliation::Deferred,
            },
        }
    }

    /// Drop every key flagged absent. Returns how many were purged.
    pub fn purge_absent(&self) -> usize {
        let absent: Vec<String> = self
            .keys
            .iter()
            .filter(|entry| !entry.value().is_present())
            .map(|entry| entry.key().clone())
            .collect();

        absent
            .iter()
            .filter(|key| {
                self.keys
                    .remove_if(key.as_str(), |_, state| !state.is_present())
                    .is_some()
            })
            .count()
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .map(|state| state.is_present())
            .unwrap_or(false)
    }

    /// Snapshot of keys currently believed present
    pub fn keys(&self) -> Vec<String> {
        self.keys
            .iter()
            .filter(|entry| entry.value().is_present())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of every tracked key, including those flagged absent
    pub fn tracked_keys(&self) -> Vec<String> {
        self.keys.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl EvictionListener for KeyRegistry {
    fn on_evicted(&self, key: &str, reason: EvictionReason, store: StoreView<'_>) {
        if reason == EvictionReason::Replaced {
            return;
        }

        let purged = self.purge_absent();
        let outcome = self.try_remove(key);

        // A concurrent set may have landed between the eviction and the removal.
        // Registering under the entry keeps a fast remove from slipping in between.
        store.if_live(key, || self.register(key));

        debug!(key, %reason, ?outcome, purged, "Key registry reconciled");
    }
}
