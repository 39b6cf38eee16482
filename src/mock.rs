//! Demonstration units of work with predictable timing.

use crate::cancellation::{run_until_cancelled, CancellationComposer, CancellationSignal};
use crate::core::errors::{Result, SparkError};
use crate::core::logging::CommonLogger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, Level};

/// Outcome of a deadline-bounded mock run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResults {
    pub loop_count: u32,
    pub max_time_ms: u64,
    pub run_time_ms: Option<u64>,
    pub message: Option<String>,
    pub result_value: Option<String>,
}

impl MockResults {
    pub fn is_complete(&self) -> bool {
        self.message.as_deref() == Some(MESSAGE_COMPLETE)
    }
}

const MESSAGE_COMPLETE: &str = "Task Complete";
const MESSAGE_TIMEOUT: &str = "Time Out Occurred";
const MESSAGE_CANCELLED: &str = "Task Cancelled";

#[derive(Debug, Clone)]
pub struct AsyncMockService {
    step_delay: Duration,
}

impl Default for AsyncMockService {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(10),
        }
    }
}

impl AsyncMockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    pub fn step_delay(&self) -> Duration {
        self.step_delay
    }

    /// Sum of `0..loop_count`, pausing once per iteration. Ignores cancellation.
    pub async fn long_running_operation(&self, loop_count: u32) -> u64 {
        let mut total = 0u64;
        for i in 0..loop_count {
            tokio::time::sleep(self.step_delay).await;
            total += u64::from(i);
        }
        total
    }

    /// Like `long_running_operation`, but checks `signal` between iterations
    pub async fn long_running_cancellable_operation(
        &self,
        loop_count: u32,
        signal: &CancellationSignal,
    ) -> Result<u64> {
        let mut total = 0u64;
        for i in 0..loop_count {
            run_until_cancelled(
                signal,
                "long_running_cancellable_operation",
                tokio::time::sleep(self.step_delay),
            )
            .await?;
            total += u64::from(i);
        }
        Ok(total)
    }

    /// Abandon a non-cancellable operation once `signal` fires. The result
    /// of the abandoned work is discarded.
    pub async fn long_running_operation_with_signal(
        &self,
        loop_count: u32,
        signal: &CancellationSignal,
    ) -> Result<u64> {
        run_until_cancelled(
            signal,
            "long_running_operation",
            self.long_running_operation(loop_count),
        )
        .await
    }

    /// A named task for detached execution: `iterations` pauses of `delay`,
    /// logging each one, then failing if `fail` is set.
    pub async fn long_running_task(
        name: String,
        delay: Duration,
        iterations: u32,
        fail: bool,
        logger: Arc<dyn CommonLogger>,
        signal: Option<CancellationSignal>,
    ) -> anyhow::Result<()> {
        for iteration in 1..=iterations {
            match &signal {
                Some(signal) => {
                    run_until_cancelled(signal, &name, tokio::time::sleep(delay)).await?
                }
                None => tokio::time::sleep(delay).await,
            }
            logger.log(
                Level::INFO,
                &format!("{name} iteration {iteration} of {iterations}"),
                None,
            );
        }

        if fail {
            anyhow::bail!("{name} failed after {iterations} iterations");
        }
        logger.log(Level::INFO, &format!("{name} finished"), None);
        Ok(())
    }

    /// Run `long_running_operation` under a `max_time` deadline linked to an
    /// optional parent signal.
    pub async fn mock_results(
        &self,
        loop_count: u32,
        max_time: Duration,
        parent: Option<&CancellationSignal>,
    ) -> Result<MockResults> {
        let started = Instant::now();
        let linked = CancellationComposer::with_timeout(parent, max_time)?;
        let outcome = linked
            .run("mock_results", self.long_running_operation(loop_count))
            .await;

        let (message, value) = match outcome {
            Ok(total) => (MESSAGE_COMPLETE, total.to_string()),
            Err(SparkError::Timeout { .. }) => (MESSAGE_TIMEOUT, "-1".to_string()),
            Err(_) => (MESSAGE_CANCELLED, "-1".to_string()),
        };
        debug!(loop_count, message, "Mock results ready");

        Ok(MockResults {
            loop_count,
            max_time_ms: max_time.as_millis() as u64,
            run_time_ms: Some(started.elapsed().as_millis() as u64),
            message: Some(message.to_string()),
            result_value: Some(value),
        })
    }
}
