use super::manager::MemoryCacheManager;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An async source of values addressed by key (a remote service, a database)
#[async_trait]
pub trait ValueSource: Send + Sync {
    type Value: Clone + Send + Sync + 'static;

    async fn fetch(&self, key: &str) -> anyhow::Result<Self::Value>;

    /// Whether a fetched value may be cached. Defaults to always.
    fn is_cacheable(&self, _key: &str, _value: &Self::Value) -> bool {
        true
    }
}

/// Memoizes a `ValueSource` through the cache manager.
///
/// Failed fetches and values the source marks uncacheable are returned to
/// the caller but never stored.
pub struct CachingDecorator<S> {
    inner: S,
    cache: Arc<MemoryCacheManager>,
    prefix: String,
    ttl: Duration,
}

impl<S: ValueSource> CachingDecorator<S> {
    pub fn new(inner: S, cache: Arc<MemoryCacheManager>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn cache_key(&self, key: &str) -> String {
        format!("{}::{}", self.prefix, key)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ValueSource> ValueSource for CachingDecorator<S> {
    type Value = S::Value;

    async fn fetch(&self, key: &str) -> anyhow::Result<Self::Value> {
        let cache_key = self.cache_key(key);
        if let Some(value) = self.cache.peek::<S::Value>(&cache_key) {
            debug!(key = %cache_key, "Served from cache");
            return Ok(value);
        }

        let value = self.inner.fetch(key).await?;
        if self.inner.is_cacheable(key, &value) {
            self.cache.set(&cache_key, value.clone(), self.ttl);
        } else {
            warn!(key = %cache_key, "Fetched value rejected for caching");
        }
        Ok(value)
    }
}
