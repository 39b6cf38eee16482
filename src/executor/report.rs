use crate::core::config::ExecutionMode;
use crate::core::errors::{is_cancellation_error, Result, SparkError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a single unit of work ended
#[derive(Debug)]
pub enum UnitOutcome<T> {
    Completed(T),
    Faulted(anyhow::Error),
    /// Never admitted, or observed cancellation cooperatively
    Cancelled,
}

impl<T> UnitOutcome<T> {
    /// Classify a unit's return value. Cancellation errors are not faults.
    pub fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(err) if is_cancellation_error(&err) => Self::Cancelled,
            Err(err) => Self::Faulted(err),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Faulted(_) => "faulted",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
pub struct UnitRecord<T> {
    pub index: usize,
    pub outcome: UnitOutcome<T>,
    pub elapsed: Duration,
}

/// Per-unit results of one executor run, sorted by unit index
#[derive(Debug)]
pub struct ExecutionReport<T> {
    pub mode: ExecutionMode,
    pub max_concurrency: usize,
    pub records: Vec<UnitRecord<T>>,
    /// Unit indices in the order they finished
    pub completion_order: Vec<usize>,
    pub total_elapsed: Duration,
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
}

impl<T> ExecutionReport<T> {
    pub(crate) fn empty(mode: ExecutionMode, max_concurrency: usize) -> Self {
        Self {
            mode,
            max_concurrency,
            records: Vec::new(),
            completion_order: Vec::new(),
            total_elapsed: Duration::ZERO,
            peak_in_flight: 0,
            started_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_completed()).count()
    }

    pub fn faulted_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_faulted()).count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_cancelled()).count()
    }

    pub fn is_success(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_completed())
    }

    /// Values of completed units, in index order
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.records.iter().filter_map(|r| r.outcome.value())
    }

    /// Fail-fast aggregate: every value in index order, or the first
    /// non-completed unit by index as an error.
    pub fn into_results(self) -> Result<Vec<T>> {
        let mut values = Vec::with_capacity(self.records.len());
        for record in self.records {
            match record.outcome {
                UnitOutcome::Completed(value) => values.push(value),
                UnitOutcome::Faulted(err) => return Err(SparkError::unit_fault(record.index, err)),
                UnitOutcome::Cancelled => {
                    return Err(SparkError::cancelled(format!("unit {}", record.index)))
                }
            }
        }
        Ok(values)
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            mode: self.mode,
            max_concurrency: self.max_concurrency,
            units: self.records.len(),
            completed: self.completed_count(),
            faulted: self.faulted_count(),
            cancelled: self.cancelled_count(),
            total_elapsed_ms: self.total_elapsed.as_millis() as u64,
            peak_in_flight: self.peak_in_flight,
            started_at: self.started_at,
        }
    }
}

/// Serializable digest of an `ExecutionReport`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub mode: ExecutionMode,
    pub max_concurrency: usize,
    pub units: usize,
    pub completed: usize,
    pub faulted: usize,
    pub cancelled: usize,
    pub total_elapsed_ms: u64,
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
}

/// The same workload timed under each execution mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeComparison {
    pub sequential: ExecutionSummary,
    pub parallel: ExecutionSummary,
    pub throttled: ExecutionSummary,
}

impl ModeComparison {
    pub fn parallel_speedup(&self) -> f64 {
        speedup(&self.sequential, &self.parallel)
    }

    pub fn throttled_speedup(&self) -> f64 {
        speedup(&self.sequential, &self.throttled)
    }
}

fn speedup(baseline: &ExecutionSummary, candidate: &ExecutionSummary) -> f64 {
    if candidate.total_elapsed_ms == 0 {
        return baseline.total_elapsed_ms.max(1) as f64;
    }
    baseline.total_elapsed_ms as f64 / candidate.total_elapsed_ms as f64
}
