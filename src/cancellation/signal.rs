use crate::core::errors::SparkError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::trace;

/// Where a cancellation originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    /// The caller cancelled explicitly
    User,
    /// A deadline elapsed
    Deadline,
    /// The enclosing scope (e.g. the inbound request) was cancelled
    Parent,
}

impl CancelCause {
    fn code(self) -> u8 {
        match self {
            Self::User => 1,
            Self::Deadline => 2,
            Self::Parent => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::User),
            2 => Some(Self::Deadline),
            3 => Some(Self::Parent),
            _ => None,
        }
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Deadline => write!(f, "deadline"),
            Self::Parent => write!(f, "parent"),
        }
    }
}

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

struct SignalInner {
    provenance: CancelCause,
    /// Cause code of whichever source fired first; 0 while not fired
    fired_by: AtomicU8,
    notify: Notify,
    /// Signals that must fire when this one fires, keyed by link id
    children: DashMap<u64, Weak<SignalInner>>,
}

impl SignalInner {
    fn fire(&self, cause: CancelCause) {
        if self
            .fired_by
            .compare_exchange(0, cause.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.notify.notify_waiters();

        // Drain outside of any shard guard before recursing into children
        let ids: Vec<u64> = self.children.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, child)) = self.children.remove(&id) {
                if let Some(child) = child.upgrade() {
                    child.fire(cause);
                }
            }
        }
    }

    fn cause(&self) -> Option<CancelCause> {
        CancelCause::from_code(self.fired_by.load(Ordering::SeqCst))
    }
}

/// A broadcastable, cooperative cancellation flag.
///
/// Clones share the same flag. A signal carries a provenance tag naming
/// what kind of source it is, and once fired it remembers the cause that
/// fired it: its own provenance when cancelled directly, or the cause
/// propagated from whichever linked source fired first.
#[derive(Clone)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

impl CancellationSignal {
    /// A user-driven signal
    pub fn new() -> Self {
        Self::with_provenance(CancelCause::User)
    }

    pub fn with_provenance(provenance: CancelCause) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                provenance,
                fired_by: AtomicU8::new(0),
                notify: Notify::new(),
                children: DashMap::new(),
            }),
        }
    }

    /// Convenience for an inbound request scope
    pub fn parent() -> Self {
        Self::with_provenance(CancelCause::Parent)
    }

    pub fn provenance(&self) -> CancelCause {
        self.inner.provenance
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        trace!(provenance = %self.inner.provenance, "Cancellation requested");
        self.inner.fire(self.inner.provenance);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired_by.load(Ordering::SeqCst) != 0
    }

    /// What fired this signal, or `None` while it has not fired
    pub fn cause(&self) -> Option<CancelCause> {
        self.inner.cause()
    }

    /// Cancellation error for `operation`, tagged with the firing cause
    pub fn cancellation_error(&self, operation: &str) -> SparkError {
        SparkError::cancelled_by(operation, self.cause().unwrap_or(self.inner.provenance))
    }

    /// Resolves once the signal has fired
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flag so a concurrent fire is not lost
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Make `child` fire whenever this signal fires.
    ///
    /// Returns a registration that detaches the link when dropped.
    pub(crate) fn register_child(&self, child: &CancellationSignal) -> LinkRegistration {
        let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        self.inner
            .children
            .insert(id, Arc::downgrade(&child.inner));

        // A fire that raced the insert may have drained before we got in
        if self.is_cancelled() {
            self.inner.children.remove(&id);
            if let Some(cause) = self.inner.cause() {
                child.inner.fire(cause);
            }
        }

        LinkRegistration {
            parent: Arc::downgrade(&self.inner),
            id,
        }
    }

    #[cfg(test)]
    pub(crate) fn child_count(&self) -> usize {
        self.inner.children.len()
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("provenance", &self.inner.provenance)
            .field("cause", &self.cause())
            .finish()
    }
}

/// Detaches a linked child from its parent on drop
pub(crate) struct LinkRegistration {
    parent: Weak<SignalInner>,
    id: u64,
}

impl Drop for LinkRegistration {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.upgrade() {
            parent.children.remove(&self.id);
        }
    }
}
