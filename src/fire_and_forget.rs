//! Detached work whose outcome is always observed exactly once.

use crate::cancellation::CancellationSignal;
use crate::core::config::FireAndForgetConfig;
use crate::core::errors::{is_cancellation_error, Result, SparkError};
use crate::core::logging::CommonLogger;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, Instrument, Level};
use uuid::Uuid;

/// Several independent failures raised by one piece of detached work.
/// Each inner error is logged on its own.
#[derive(Debug, Error)]
#[error("{} errors occurred", .errors.len())]
pub struct AggregateError {
    errors: Vec<anyhow::Error>,
}

impl AggregateError {
    pub fn new(errors: Vec<anyhow::Error>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<anyhow::Error> {
        self.errors
    }
}

#[derive(Debug, Default)]
struct LaunchCounters {
    launched: AtomicU64,
    succeeded: AtomicU64,
    faulted: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireAndForgetStats {
    pub launched: u64,
    pub succeeded: u64,
    pub faulted: u64,
    pub cancelled: u64,
}

impl FireAndForgetStats {
    pub fn finished(&self) -> u64 {
        self.succeeded + self.faulted + self.cancelled
    }
}

/// Launches detached work and reports how it ended to a `CommonLogger`.
///
/// Outcome precedence: a fault wins, then cancellation (a cancellation
/// error from the work, or the launch signal having fired), then success.
/// Work is not interrupted when the signal fires; it is expected to
/// observe the signal itself.
#[derive(Clone)]
pub struct SafeFireAndForget {
    logger: Arc<dyn CommonLogger>,
    config: FireAndForgetConfig,
    counters: Arc<LaunchCounters>,
}

impl SafeFireAndForget {
    pub fn new(logger: Arc<dyn CommonLogger>, config: FireAndForgetConfig) -> Self {
        Self {
            logger,
            config,
            counters: Arc::new(LaunchCounters::default()),
        }
    }

    /// Spawn `work` and return immediately.
    ///
    /// Fails synchronously with a contract violation when called outside a
    /// Tokio runtime; nothing is spawned in that case.
    pub fn launch<F>(&self, work: F, signal: Option<CancellationSignal>) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| {
            SparkError::contract_argument("detached work requires a Tokio runtime", "work")
        })?;

        let launch_id = Uuid::new_v4();
        self.counters.launched.fetch_add(1, Ordering::Relaxed);
        debug!(%launch_id, "Launching detached work");

        let logger = self.logger.clone();
        let counters = self.counters.clone();
        let success_level = if self.config.success_at_info {
            Level::INFO
        } else {
            Level::DEBUG
        };
        let span = tracing::debug_span!("fire_and_forget", %launch_id);

        handle.spawn(
            async move {
                let result = AssertUnwindSafe(work)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("detached work panicked")));
                let cancelled = signal.as_ref().is_some_and(CancellationSignal::is_cancelled);
                report(logger.as_ref(), &counters, result, cancelled, success_level);
            }
            .instrument(span),
        );
        Ok(())
    }

    pub fn stats(&self) -> FireAndForgetStats {
        FireAndForgetStats {
            launched: self.counters.launched.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            faulted: self.counters.faulted.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

fn report(
    logger: &dyn CommonLogger,
    counters: &LaunchCounters,
    result: anyhow::Result<()>,
    signal_fired: bool,
    success_level: Level,
) {
    match result {
        Err(err) if !is_cancellation_error(&err) => {
            match err.downcast::<AggregateError>() {
                Ok(aggregate) => {
                    for inner in aggregate.errors() {
                        log_fault(logger, inner);
                    }
                }
                Err(err) => log_fault(logger, &err),
            }
            counters.faulted.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => log_cancelled(logger, counters),
        Ok(()) if signal_fired => log_cancelled(logger, counters),
        Ok(()) => {
            logger.log(success_level, "SafeFireAndForget: work completed successfully", None);
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn log_fault(logger: &dyn CommonLogger, err: &anyhow::Error) {
    logger.log(
        Level::ERROR,
        &format!("SafeFireAndForget: unhandled error: {err}"),
        Some(err),
    );
}

fn log_cancelled(logger: &dyn CommonLogger, counters: &LaunchCounters) {
    logger.log(Level::INFO, "SafeFireAndForget: work was cancelled", None);
    counters.cancelled.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        entries: Mutex<Vec<(Level, String)>>,
    }

    impl CommonLogger for Captured {
        fn log(&self, level: Level, message: &str, _error: Option<&anyhow::Error>) {
            self.entries.lock().unwrap().push((level, message.to_string()));
        }
    }

    fn levels(logger: &Captured) -> Vec<Level> {
        logger.entries.lock().unwrap().iter().map(|(l, _)| *l).collect()
    }

    #[test]
    fn test_aggregate_logs_every_inner_error() {
        let logger = Captured::default();
        let counters = LaunchCounters::default();
        let err = AggregateError::new(vec![anyhow::anyhow!("one"), anyhow::anyhow!("two")]);

        report(&logger, &counters, Err(err.into()), false, Level::INFO);

        assert_eq!(levels(&logger), vec![Level::ERROR, Level::ERROR]);
        assert_eq!(counters.faulted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fault_wins_over_fired_signal() {
        let logger = Captured::default();
        let counters = LaunchCounters::default();
        report(&logger, &counters, Err(anyhow::anyhow!("boom")), true, Level::INFO);
        assert_eq!(levels(&logger), vec![Level::ERROR]);
    }

    #[test]
    fn test_success_after_signal_counts_as_cancelled() {
        let logger = Captured::default();
        let counters = LaunchCounters::default();
        report(&logger, &counters, Ok(()), true, Level::INFO);

        let entries = logger.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].1.contains("cancelled"));
    }

    #[test]
    fn test_cancellation_error_is_not_logged_as_fault() {
        let logger = Captured::default();
        let counters = LaunchCounters::default();
        report(
            &logger,
            &counters,
            Err(SparkError::cancelled("detached").into()),
            false,
            Level::INFO,
        );
        assert_eq!(levels(&logger), vec![Level::INFO]);
        assert_eq!(counters.cancelled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_quiet_success_still_logged() {
        let logger = Captured::default();
        let counters = LaunchCounters::default();
        report(&logger, &counters, Ok(()), false, Level::DEBUG);
        assert_eq!(levels(&logger), vec![Level::DEBUG]);
    }

    #[test]
    fn test_launch_outside_runtime_is_contract_violation() {
        let launcher =
            SafeFireAndForget::new(Arc::new(Captured::default()), FireAndForgetConfig::default());
        let err = launcher
            .launch(async { Ok::<(), anyhow::Error>(()) }, None)
            .unwrap_err();
        assert_eq!(err.category(), "contract");
        assert_eq!(launcher.stats().launched, 0);
    }
}
