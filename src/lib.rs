// Shared infrastructure
pub mod core;

// Async building blocks
pub mod cache; // Key-tracked cache with advisory locks
pub mod cancellation; // Signals, deadlines and linked cancellation
pub mod executor; // Sequential / parallel / throttled batches
pub mod fire_and_forget; // Detached work with guaranteed outcome logging
pub mod mock; // Demonstration workloads

// Re-exports for convenience
pub use crate::core::config::{
    CacheConfig, ExecutionMode, ExecutorConfig, FireAndForgetConfig, SparkConfig,
};
pub use crate::core::errors::{Result, SparkError};
pub use crate::core::logging::{init_tracing, CommonLogger, TracingLogger};
pub use cache::{CachingDecorator, KeyRegistry, MemoryCacheManager, ValueSource};
pub use cancellation::{
    run_until_cancelled, CancelCause, CancellationComposer, CancellationSignal, DeadlineSignal,
    LinkedCancellation,
};
pub use executor::{compare_modes, ConcurrencyExecutor, ExecutionReport, UnitOutcome};
pub use fire_and_forget::{AggregateError, SafeFireAndForget};
pub use mock::{AsyncMockService, MockResults};
