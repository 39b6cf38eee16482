use super::signal::{CancelCause, CancellationSignal, LinkRegistration};
use crate::core::errors::{Result, SparkError};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// A signal that fires once `duration` has elapsed.
///
/// The timer task is aborted when this value is dropped, so a deadline never
/// outlives the operation it guards.
pub struct DeadlineSignal {
    signal: CancellationSignal,
    duration: Duration,
    timer: JoinHandle<()>,
}

impl DeadlineSignal {
    /// Fails with a contract violation outside a Tokio runtime.
    pub fn new(duration: Duration) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| {
            SparkError::contract_argument("a deadline requires a Tokio runtime", "duration")
        })?;

        let signal = CancellationSignal::with_provenance(CancelCause::Deadline);
        let timer_signal = signal.clone();
        let timer = handle.spawn(async move {
            tokio::time::sleep(duration).await;
            debug!(timeout_ms = duration.as_millis() as u64, "Deadline elapsed");
            timer_signal.cancel();
        });

        Ok(Self {
            signal,
            duration,
            timer,
        })
    }

    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_expired(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl Drop for DeadlineSignal {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// One effective signal built from an optional parent and an optional deadline.
///
/// The composed signal fires the instant either source fires and can also be
/// cancelled on its own. The signal itself records the first source to fire,
/// so errors raised from it alone carry that cause; `cause()` here also
/// inspects each source's own flag and prefers an elapsed deadline. Dropping
/// the value detaches it from the parent and stops the deadline timer.
pub struct LinkedCancellation {
    composed: CancellationSignal,
    parent: Option<CancellationSignal>,
    deadline: Option<DeadlineSignal>,
    _registrations: Vec<LinkRegistration>,
}

impl LinkedCancellation {
    pub fn signal(&self) -> &CancellationSignal {
        &self.composed
    }

    pub fn cancel(&self) {
        self.composed.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.composed.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline.as_ref().map(DeadlineSignal::duration)
    }

    /// Classify why the composed signal fired.
    ///
    /// Deadline wins only when the deadline signal's own flag is set;
    /// otherwise a fired parent is reported, and a composed signal that fired
    /// with neither source set was cancelled directly by the user.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.composed.is_cancelled() {
            return None;
        }
        if self.deadline.as_ref().is_some_and(DeadlineSignal::is_expired) {
            return Some(CancelCause::Deadline);
        }
        if self.parent.as_ref().is_some_and(CancellationSignal::is_cancelled) {
            return Some(CancelCause::Parent);
        }
        Some(CancelCause::User)
    }

    /// The error a consumer should surface for this cancellation
    pub fn cancellation_error(&self, operation: &str) -> SparkError {
        match (self.cause(), &self.deadline) {
            (Some(CancelCause::Deadline), Some(deadline)) => {
                SparkError::timeout(operation, deadline.duration().as_millis() as u64)
            }
            (Some(cause), _) => SparkError::cancelled_by(operation, cause),
            (None, _) => SparkError::cancelled(operation),
        }
    }

    /// Drive `future` until it completes or the composed signal fires.
    ///
    /// If both are ready at the same poll, the completed result wins.
    pub async fn run<F>(&self, operation: &str, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            output = future => Ok(output),
            _ = self.composed.cancelled() => {
                let err = self.cancellation_error(operation);
                debug!(operation, category = err.category(), "Operation cancelled");
                Err(err)
            }
        }
    }
}

/// Builds and classifies composed cancellation signals
#[derive(Debug, Default, Clone, Copy)]
pub struct CancellationComposer;

impl CancellationComposer {
    /// A signal that fires after `duration`
    pub fn with_deadline(duration: Duration) -> Result<DeadlineSignal> {
        DeadlineSignal::new(duration)
    }

    /// Compose a parent signal and a deadline into one
    pub fn link(
        parent: Option<CancellationSignal>,
        deadline: Option<DeadlineSignal>,
    ) -> LinkedCancellation {
        let composed = CancellationSignal::new();
        let mut registrations = Vec::with_capacity(2);

        if let Some(parent) = &parent {
            registrations.push(parent.register_child(&composed));
        }
        if let Some(deadline) = &deadline {
            registrations.push(deadline.signal().register_child(&composed));
        }

        LinkedCancellation {
            composed,
            parent,
            deadline,
            _registrations: registrations,
        }
    }

    /// Parent signal plus a fresh deadline of `timeout`
    pub fn with_timeout(
        parent: Option<&CancellationSignal>,
        timeout: Duration,
    ) -> Result<LinkedCancellation> {
        Ok(Self::link(parent.cloned(), Some(Self::with_deadline(timeout)?)))
    }
}

/// Race `future` against a single signal
pub async fn run_until_cancelled<F>(
    signal: &CancellationSignal,
    operation: &str,
    future: F,
) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        output = future => Ok(output),
        _ = signal.cancelled() => Err(signal.cancellation_error(operation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    #[tokio::test]
    async fn test_deadline_fires_after_duration() {
        let deadline = CancellationComposer::with_deadline(Duration::from_millis(30)).unwrap();
        assert!(!deadline.is_expired());
        deadline.signal().cancelled().await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.signal().provenance(), CancelCause::Deadline);
    }

    #[tokio::test]
    async fn test_dropping_deadline_stops_timer() {
        let deadline = CancellationComposer::with_deadline(Duration::from_millis(20)).unwrap();
        let signal = deadline.signal().clone();
        drop(deadline);
        sleep(Duration::from_millis(60)).await;
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_cause() {
        let parent = CancellationSignal::parent();
        let linked = CancellationComposer::with_timeout(Some(&parent), Duration::from_millis(20)).unwrap();

        let start = Instant::now();
        linked.signal().cancelled().await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(linked.cause(), Some(CancelCause::Deadline));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cause() {
        let parent = CancellationSignal::parent();
        let linked = CancellationComposer::with_timeout(Some(&parent), Duration::from_secs(30)).unwrap();

        parent.cancel();
        assert!(linked.is_cancelled());
        assert_eq!(linked.cause(), Some(CancelCause::Parent));
    }

    #[tokio::test]
    async fn test_direct_cancel_is_user_cause_and_leaves_sources_alone() {
        let parent = CancellationSignal::parent();
        let linked = CancellationComposer::with_timeout(Some(&parent), Duration::from_secs(30)).unwrap();

        assert_eq!(linked.cause(), None);
        linked.cancel();
        assert_eq!(linked.cause(), Some(CancelCause::User));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_maps_deadline_to_timeout_error() {
        let deadline = CancellationComposer::with_deadline(Duration::from_millis(10)).unwrap();
        let linked = CancellationComposer::link(None, Some(deadline));
        let result = linked.run("slow", sleep(Duration::from_secs(5))).await;
        match result {
            Err(SparkError::Timeout { operation, timeout_ms }) => {
                assert_eq!(operation, "slow");
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_returns_output_when_fast() {
        let linked = CancellationComposer::with_timeout(None, Duration::from_secs(5)).unwrap();
        let value = linked.run("fast", async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_deadline_outside_runtime_is_contract_violation() {
        let err = CancellationComposer::with_timeout(None, Duration::from_millis(10))
            .err()
            .unwrap();
        assert_eq!(err.category(), "contract");
    }

    #[tokio::test]
    async fn test_run_until_cancelled_on_composed_signal_reports_source() {
        let parent = CancellationSignal::parent();
        let linked = CancellationComposer::with_timeout(Some(&parent), Duration::from_millis(20)).unwrap();
        let err = run_until_cancelled(linked.signal(), "slow", sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SparkError::Cancelled {
                cause: Some(CancelCause::Deadline),
                ..
            }
        ));

        let parent = CancellationSignal::parent();
        let linked = CancellationComposer::with_timeout(Some(&parent), Duration::from_secs(30)).unwrap();
        parent.cancel();
        let err = run_until_cancelled(linked.signal(), "slow", sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SparkError::Cancelled {
                cause: Some(CancelCause::Parent),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_run_until_cancelled_reports_provenance() {
        let parent = CancellationSignal::parent();
        parent.cancel();
        let err = run_until_cancelled(&parent, "request", sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SparkError::Cancelled {
                cause: Some(CancelCause::Parent),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dropping_link_detaches_from_parent() {
        let parent = CancellationSignal::parent();
        let linked = CancellationComposer::with_timeout(Some(&parent), Duration::from_secs(30)).unwrap();
        assert_eq!(parent.child_count(), 1);
        drop(linked);
        assert_eq!(parent.child_count(), 0);
    }
}
