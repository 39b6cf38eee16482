use super::gate::AdmissionGate;
use super::report::{ExecutionReport, ModeComparison, UnitOutcome, UnitRecord};
use crate::cancellation::CancellationSignal;
use crate::core::config::{ExecutionMode, ExecutorConfig};
use crate::core::errors::{Result, SparkError};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runs batches of independent units of work under one of three modes.
///
/// A unit is a zero-argument closure producing a future. Units are
/// cooperative: cancellation stops admission of units that have not started
/// but never preempts one that is running.
#[derive(Debug, Clone)]
pub struct ConcurrencyExecutor {
    config: ExecutorConfig,
}

impl ConcurrencyExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every unit and report each outcome keyed by index.
    ///
    /// Sequential mode returns the first fault or cancellation as an error.
    /// Parallel and throttled modes capture faults per unit.
    pub async fn run<T, F, Fut>(
        &self,
        units: Vec<F>,
        signal: Option<&CancellationSignal>,
    ) -> Result<ExecutionReport<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let count = units.len();
        if count == 0 {
            debug!(mode = %self.config.mode, "No units to run");
            return Ok(ExecutionReport::empty(self.config.mode, self.config.max_concurrency));
        }

        info!(mode = %self.config.mode, units = count, max_concurrency = self.config.max_concurrency, "Starting execution");
        let report = match self.config.mode {
            ExecutionMode::Sequential => run_sequential(units, signal).await?,
            ExecutionMode::Parallel => {
                run_admitted(units, count, ExecutionMode::Parallel, signal).await?
            }
            ExecutionMode::Throttled if self.config.max_concurrency >= count => {
                debug!(
                    units = count,
                    max_concurrency = self.config.max_concurrency,
                    "Limit covers every unit, running unbounded"
                );
                run_admitted(units, count, ExecutionMode::Throttled, signal).await?
            }
            ExecutionMode::Throttled => {
                run_admitted(units, self.config.max_concurrency, ExecutionMode::Throttled, signal)
                    .await?
            }
        };

        info!(
            mode = %report.mode,
            completed = report.completed_count(),
            faulted = report.faulted_count(),
            cancelled = report.cancelled_count(),
            peak_in_flight = report.peak_in_flight,
            elapsed_ms = report.total_elapsed.as_millis() as u64,
            "Execution finished"
        );
        Ok(report)
    }

    /// Fail-fast aggregate over `run`: all values in index order, or the
    /// first unit that did not complete.
    pub async fn run_all<T, F, Fut>(
        &self,
        units: Vec<F>,
        signal: Option<&CancellationSignal>,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.run(units, signal).await?.into_results()
    }
}

async fn run_sequential<T, F, Fut>(
    units: Vec<F>,
    signal: Option<&CancellationSignal>,
) -> Result<ExecutionReport<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let gate = AdmissionGate::new(1)?;
    let mut report = ExecutionReport::empty(ExecutionMode::Sequential, 1);
    let started = Instant::now();

    for (index, unit) in units.into_iter().enumerate() {
        let slot = gate.acquire(signal).await?;
        let unit_started = Instant::now();
        let result = guarded(unit).await;
        let elapsed = unit_started.elapsed();
        drop(slot);

        match UnitOutcome::from_result(result) {
            UnitOutcome::Faulted(err) => {
                warn!(index, error = %err, "Unit faulted, stopping sequential run");
                return Err(SparkError::unit_fault(index, err));
            }
            UnitOutcome::Cancelled => {
                info!(index, "Unit cancelled, stopping sequential run");
                return Err(SparkError::cancelled(format!("unit {index}")));
            }
            outcome => {
                report.completion_order.push(index);
                report.records.push(UnitRecord {
                    index,
                    outcome,
                    elapsed,
                });
            }
        }
    }

    report.total_elapsed = started.elapsed();
    report.peak_in_flight = gate.peak_in_flight();
    Ok(report)
}

/// Spawn each unit once the gate admits it. With `capacity == units.len()`
/// every unit is admitted immediately.
async fn run_admitted<T, F, Fut>(
    units: Vec<F>,
    capacity: usize,
    mode: ExecutionMode,
    signal: Option<&CancellationSignal>,
) -> Result<ExecutionReport<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let count = units.len();
    let gate = AdmissionGate::new(capacity)?;
    let started_at = Utc::now();
    let started = Instant::now();

    let (tx, mut rx) = mpsc::unbounded_channel::<UnitRecord<T>>();
    let mut records = Vec::with_capacity(count);
    let mut pending = units.into_iter().enumerate();

    while let Some((index, unit)) = pending.next() {
        let slot = match gate.acquire(signal).await {
            Ok(slot) => slot,
            Err(err) if err.is_cancellation() => {
                records.push(not_admitted(index));
                records.extend(pending.by_ref().map(|(index, _)| not_admitted(index)));
                info!(
                    first_skipped = index,
                    skipped = records.len(),
                    "Cancellation observed, remaining units not admitted"
                );
                break;
            }
            Err(err) => return Err(err),
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            let unit_started = Instant::now();
            let result = guarded(unit).await;
            let elapsed = unit_started.elapsed();
            drop(slot);

            let outcome = UnitOutcome::from_result(result);
            if let UnitOutcome::Faulted(err) = &outcome {
                warn!(index, error = %err, "Unit faulted");
            }
            // The receiver outlives every sender clone
            let _ = tx.send(UnitRecord {
                index,
                outcome,
                elapsed,
            });
        });
    }
    drop(tx);

    let mut completion_order = Vec::with_capacity(count);
    while let Some(record) = rx.recv().await {
        completion_order.push(record.index);
        records.push(record);
    }
    records.sort_by_key(|record| record.index);

    Ok(ExecutionReport {
        mode,
        max_concurrency: capacity,
        records,
        completion_order,
        total_elapsed: started.elapsed(),
        peak_in_flight: gate.peak_in_flight(),
        started_at,
    })
}

fn not_admitted<T>(index: usize) -> UnitRecord<T> {
    UnitRecord {
        index,
        outcome: UnitOutcome::Cancelled,
        elapsed: Duration::ZERO,
    }
}

/// Invoke a unit, turning a panic into an ordinary fault
async fn guarded<T, F, Fut>(unit: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    AssertUnwindSafe(async move { unit().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(anyhow::anyhow!("unit panicked: {}", panic_message(&*panic))))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Time the same workload under sequential, parallel and throttled modes.
///
/// `factory(i)` builds the future for unit `i`; it is called once per mode.
pub async fn compare_modes<T, G, Fut>(
    count: usize,
    max_concurrency: usize,
    factory: G,
) -> Result<ModeComparison>
where
    T: Send + 'static,
    G: Fn(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let throttled = ExecutorConfig::builder()
        .mode(ExecutionMode::Throttled)
        .max_concurrency(max_concurrency)
        .build()?;

    let comparison = ModeComparison {
        sequential: summarize(ExecutorConfig::sequential(), count, &factory).await?,
        parallel: summarize(ExecutorConfig::parallel(), count, &factory).await?,
        throttled: summarize(throttled, count, &factory).await?,
    };

    info!(
        sequential_ms = comparison.sequential.total_elapsed_ms,
        parallel_ms = comparison.parallel.total_elapsed_ms,
        throttled_ms = comparison.throttled.total_elapsed_ms,
        "Mode comparison finished"
    );
    Ok(comparison)
}

async fn summarize<T, G, Fut>(
    config: ExecutorConfig,
    count: usize,
    factory: &G,
) -> Result<super::report::ExecutionSummary>
where
    T: Send + 'static,
    G: Fn(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let units: Vec<_> = (0..count)
        .map(|index| {
            let future = factory(index);
            move || future
        })
        .collect();
    let report = ConcurrencyExecutor::new(config)?.run(units, None).await?;
    Ok(report.summary())
}
