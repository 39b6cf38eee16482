use crate::core::errors::{Result, SparkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a batch of independent units is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One unit at a time, in order
    Sequential,
    /// Everything at once, no admission control
    Parallel,
    /// At most `max_concurrency` units in flight
    #[default]
    Throttled,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Throttled => write!(f, "throttled"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = SparkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "throttled" => Ok(Self::Throttled),
            other => Err(SparkError::configuration_field(
                format!("unknown execution mode '{other}'"),
                "mode",
            )),
        }
    }
}

/// Cache manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache time used when a load does not specify one
    pub default_ttl: Duration,
    /// Lifetime of lock marker entries for `with_lock`
    pub lock_ttl: Duration,
    /// Capacity limit; beyond it the soonest-expiring entries are evicted
    pub max_entries: Option<usize>,
    /// Background sweep period for expired entries (none = lazy only)
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30 * 60),
            lock_ttl: Duration::from_secs(60),
            max_entries: None,
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == Some(0) {
            return Err(SparkError::configuration_field(
                "max_entries cannot be zero",
                "max_entries",
            ));
        }
        if self.sweep_interval.is_some_and(|period| period.is_zero()) {
            return Err(SparkError::configuration_field(
                "sweep_interval cannot be zero",
                "sweep_interval",
            ));
        }
        if self.lock_ttl.is_zero() {
            return Err(SparkError::configuration_field(
                "lock_ttl must be greater than 0",
                "lock_ttl",
            ));
        }
        Ok(())
    }
}

/// Concurrency executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutionMode,
    /// Admission gate size for throttled mode
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Throttled,
            max_concurrency: 3,
        }
    }
}

impl ExecutorConfig {
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::new()
    }

    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        }
    }

    pub fn parallel() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            ..Default::default()
        }
    }

    pub fn throttled(max_concurrency: usize) -> Self {
        Self {
            mode: ExecutionMode::Throttled,
            max_concurrency,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(SparkError::configuration_field(
                "max_concurrency must be greater than 0",
                "max_concurrency",
            ));
        }
        Ok(())
    }
}

/// Builder for ExecutorConfig
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
        }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    pub fn build(self) -> Result<ExecutorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ExecutorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Detached work configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireAndForgetConfig {
    /// Success entries go out at INFO when set, DEBUG otherwise
    pub success_at_info: bool,
}

impl Default for FireAndForgetConfig {
    fn default() -> Self {
        Self {
            success_at_info: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparkConfig {
    pub cache: CacheConfig,
    pub executor: ExecutorConfig,
    pub fire_and_forget: FireAndForgetConfig,
}

pub const ENV_PREFIX: &str = "ASYNCSPARK_";

impl SparkConfig {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.executor.validate()?;
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `ASYNCSPARK_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which receives names without the prefix
    pub fn apply_overrides<L>(&mut self, lookup: L) -> Result<()>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MAX_CONCURRENCY") {
            self.executor.max_concurrency = parse_field(&value, "max_concurrency")?;
        }
        if let Some(value) = lookup("EXECUTION_MODE") {
            self.executor.mode = value.parse()?;
        }
        if let Some(value) = lookup("CACHE_TTL_SECS") {
            self.cache.default_ttl = Duration::from_secs(parse_field(&value, "default_ttl")?);
        }
        if let Some(value) = lookup("CACHE_MAX_ENTRIES") {
            self.cache.max_entries = Some(parse_field(&value, "max_entries")?);
        }
        Ok(())
    }
}

fn parse_field<T: FromStr>(value: &str, field: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        SparkError::configuration_field(format!("invalid value '{value}' for {field}"), field)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SparkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache.default_ttl, Duration::from_secs(1800));
        assert_eq!(config.executor.mode, ExecutionMode::Throttled);
        assert!(config.fire_and_forget.success_at_info);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = ExecutorConfig::builder().max_concurrency(0).build().unwrap_err();
        assert!(matches!(
            err,
            SparkError::Configuration { field: Some(ref f), .. } if f == "max_concurrency"
        ));
    }

    #[test]
    fn test_cache_validation() {
        let config = CacheConfig {
            max_entries: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            sweep_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_document_uses_defaults() {
        let config = SparkConfig::from_json_str(
            r#"{ "executor": { "mode": "parallel", "max_concurrency": 8 } }"#,
        )
        .unwrap();
        assert_eq!(config.executor.mode, ExecutionMode::Parallel);
        assert_eq!(config.executor.max_concurrency, 8);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_json_invalid_is_serialization_error() {
        let err = SparkConfig::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MAX_CONCURRENCY", "2"),
            ("EXECUTION_MODE", "Sequential"),
            ("CACHE_TTL_SECS", "90"),
            ("CACHE_MAX_ENTRIES", "500"),
        ]
        .into_iter()
        .collect();

        let mut config = SparkConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.executor.max_concurrency, 2);
        assert_eq!(config.executor.mode, ExecutionMode::Sequential);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(90));
        assert_eq!(config.cache.max_entries, Some(500));
    }

    #[test]
    fn test_negative_concurrency_override_rejected() {
        let mut config = SparkConfig::default();
        let err = config
            .apply_overrides(|name| (name == "MAX_CONCURRENCY").then(|| "-1".to_string()))
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
