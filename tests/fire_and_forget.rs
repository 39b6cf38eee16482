//! Integration tests for detached work outcome logging

use asyncspark::mock::AsyncMockService;
use asyncspark::{
    AggregateError, CancellationSignal, CommonLogger, FireAndForgetConfig, SafeFireAndForget,
    SparkError,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::Level;

#[derive(Default)]
struct CapturingLogger {
    entries: Mutex<Vec<(Level, String)>>,
}

impl CommonLogger for CapturingLogger {
    fn log(&self, level: Level, message: &str, _error: Option<&anyhow::Error>) {
        self.entries
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

impl CapturingLogger {
    fn outcome_entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.starts_with("SafeFireAndForget"))
            .cloned()
            .collect()
    }
}

fn launcher(logger: &Arc<CapturingLogger>) -> SafeFireAndForget {
    SafeFireAndForget::new(logger.clone(), FireAndForgetConfig::default())
}

async fn wait_for_finished(launcher: &SafeFireAndForget, expected: u64) {
    timeout(Duration::from_secs(5), async {
        while launcher.stats().finished() < expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("detached work did not finish in time");
}

#[tokio::test]
async fn test_success_logged_once() {
    let logger = Arc::new(CapturingLogger::default());
    let launcher = launcher(&logger);

    launcher
        .launch(async { Ok::<(), anyhow::Error>(()) }, None)
        .unwrap();
    wait_for_finished(&launcher, 1).await;

    let entries = logger.outcome_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::INFO);
    assert!(entries[0].1.contains("successfully"));
}

#[tokio::test]
async fn test_fault_logged_per_inner_error_only() {
    let logger = Arc::new(CapturingLogger::default());
    let launcher = launcher(&logger);

    launcher
        .launch(
            async {
                Err::<(), anyhow::Error>(
                    AggregateError::new(vec![
                        anyhow::anyhow!("first"),
                        anyhow::anyhow!("second"),
                        anyhow::anyhow!("third"),
                    ])
                    .into(),
                )
            },
            None,
        )
        .unwrap();
    wait_for_finished(&launcher, 1).await;

    let entries = logger.outcome_entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|(level, _)| *level == Level::ERROR));
    assert_eq!(launcher.stats().faulted, 1);
    assert_eq!(launcher.stats().succeeded, 0);
}

#[tokio::test]
async fn test_panicking_work_is_logged_as_fault() {
    let logger = Arc::new(CapturingLogger::default());
    let launcher = launcher(&logger);

    let explode = true;
    launcher
        .launch(
            async move {
                if explode {
                    panic!("detached panic");
                }
                Ok::<(), anyhow::Error>(())
            },
            None,
        )
        .unwrap();
    wait_for_finished(&launcher, 1).await;

    let entries = logger.outcome_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::ERROR);
}

#[tokio::test]
async fn test_cancelled_work_logged_once_as_info() {
    let logger = Arc::new(CapturingLogger::default());
    let launcher = launcher(&logger);
    let signal = CancellationSignal::new();

    let task_logger: Arc<dyn CommonLogger> = logger.clone();
    launcher
        .launch(
            AsyncMockService::long_running_task(
                "K.".to_string(),
                Duration::from_millis(20),
                20,
                false,
                task_logger,
                Some(signal.clone()),
            ),
            Some(signal.clone()),
        )
        .unwrap();

    sleep(Duration::from_millis(70)).await;
    signal.cancel();
    wait_for_finished(&launcher, 1).await;

    let entries = logger.outcome_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::INFO);
    assert!(entries[0].1.contains("cancelled"));
    assert_eq!(launcher.stats().cancelled, 1);
}

#[tokio::test]
async fn test_mixed_batch_each_outcome_logged_exactly_once() {
    let logger = Arc::new(CapturingLogger::default());
    let launcher = launcher(&logger);
    let task_logger: Arc<dyn CommonLogger> = logger.clone();

    for (name, fail) in [("A.", false), ("B.", true), ("C.", false)] {
        launcher
            .launch(
                AsyncMockService::long_running_task(
                    name.to_string(),
                    Duration::from_millis(10),
                    2,
                    fail,
                    task_logger.clone(),
                    None,
                ),
                None,
            )
            .unwrap();
    }
    launcher
        .launch(
            async { Err::<(), anyhow::Error>(SparkError::cancelled("gave up").into()) },
            None,
        )
        .unwrap();
    wait_for_finished(&launcher, 4).await;

    let stats = launcher.stats();
    assert_eq!(stats.launched, 4);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.faulted, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(logger.outcome_entries().len(), 4);
}
