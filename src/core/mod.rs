// Shared infrastructure: errors, configuration, logging

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{
    CacheConfig, ExecutionMode, ExecutorConfig, ExecutorConfigBuilder, FireAndForgetConfig,
    SparkConfig,
};
pub use errors::{is_cancellation_error, Result, SparkError};
pub use logging::{init_tracing, CommonLogger, TracingLogger};
