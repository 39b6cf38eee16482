use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Logging seam for components that report outcomes of detached work.
///
/// Implementations must be thread-safe; calls may arrive from any worker.
pub trait CommonLogger: Send + Sync {
    fn log(&self, level: Level, message: &str, error: Option<&anyhow::Error>);

    fn track_event(&self, name: &str, properties: &HashMap<String, String>) {
        let mut pairs: Vec<_> = properties.iter().collect();
        pairs.sort();
        self.log(Level::INFO, &format!("event {name} {pairs:?}"), None);
    }

    fn track_exception(&self, error: &anyhow::Error) {
        self.log(Level::ERROR, &error.to_string(), Some(error));
    }
}

/// Forwards to the `tracing` macros
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl CommonLogger for TracingLogger {
    fn log(&self, level: Level, message: &str, error: Option<&anyhow::Error>) {
        match (level, error) {
            (Level::ERROR, Some(err)) => tracing::error!(error = ?err, "{message}"),
            (Level::ERROR, None) => tracing::error!("{message}"),
            (Level::WARN, Some(err)) => tracing::warn!(error = ?err, "{message}"),
            (Level::WARN, None) => tracing::warn!("{message}"),
            (Level::INFO, _) => tracing::info!("{message}"),
            (Level::DEBUG, _) => tracing::debug!("{message}"),
            _ => tracing::trace!("{message}"),
        }
    }

    fn track_event(&self, name: &str, properties: &HashMap<String, String>) {
        tracing::info!(event = name, ?properties, "Tracked event");
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        entries: Mutex<Vec<(Level, String, bool)>>,
    }

    impl CommonLogger for Captured {
        fn log(&self, level: Level, message: &str, error: Option<&anyhow::Error>) {
            self.entries
                .lock()
                .unwrap()
                .push((level, message.to_string(), error.is_some()));
        }
    }

    #[test]
    fn test_default_track_exception_logs_error() {
        let logger = Captured::default();
        logger.track_exception(&anyhow::anyhow!("boom"));

        let entries = logger.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], (Level::ERROR, "boom".to_string(), true));
    }

    #[test]
    fn test_default_track_event_is_info() {
        let logger = Captured::default();
        let props = HashMap::from([("city".to_string(), "Dallas".to_string())]);
        logger.track_event("lookup", &props);

        let entries = logger.entries.lock().unwrap();
        assert_eq!(entries[0].0, Level::INFO);
        assert!(entries[0].1.contains("lookup"));
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("warn");
        init_tracing("debug");
        TracingLogger.log(Level::INFO, "still works", None);
    }
}
