//! Key-tracked in-memory cache with advisory locking and bulk invalidation.

pub mod decorator;
pub mod manager;
pub mod registry;
pub mod store;

pub use decorator::{CachingDecorator, ValueSource};
pub use manager::{CacheStats, MemoryCacheManager};
pub use registry::{KeyRegistry, Reconciliation};
pub use store::{EvictionListener, EvictionReason, MemoryStore, StoreStats, StoreView};
