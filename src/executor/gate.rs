use crate::cancellation::CancellationSignal;
use crate::core::errors::{Result, SparkError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Default)]
struct GateCounters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

/// Admission control holding a fixed number of permits.
///
/// Every admitted unit holds an `ExecutionSlot`; dropping the slot is the
/// only way a permit goes back, so release happens on every exit path.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<GateCounters>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SparkError::configuration_field(
                "admission gate capacity must be greater than 0",
                "max_concurrency",
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(GateCounters::default()),
        })
    }

    /// Wait for a permit, giving up if `signal` fires first
    pub async fn acquire(&self, signal: Option<&CancellationSignal>) -> Result<ExecutionSlot> {
        let permit = match signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(signal.cancellation_error("admission"));
                    }
                    permit = self.semaphore.clone().acquire_owned() => permit?,
                }
            }
            None => self.semaphore.clone().acquire_owned().await?,
        };
        Ok(self.admit(permit))
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<ExecutionSlot> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> ExecutionSlot {
        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        debug!(in_flight, capacity = self.capacity, "Unit admitted");

        ExecutionSlot {
            counters: self.counters.clone(),
            _permit: permit,
        }
    }

    /// Stop admitting. Pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            available: self.semaphore.available_permits(),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

/// RAII admission. The in-flight count drops before the permit is returned.
#[derive(Debug)]
pub struct ExecutionSlot {
    counters: Arc<GateCounters>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub capacity: usize,
    pub available: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub admitted: u64,
    pub rejected: u64,
}
