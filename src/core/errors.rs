use crate::cancellation::CancelCause;
use thiserror::Error;

/// Unified error type for the asyncspark library
#[derive(Debug, Error)]
pub enum SparkError {
    /// Null/invalid arguments, raised synchronously at the call site
    #[error("Contract violation: {message}")]
    ContractViolation {
        message: String,
        argument: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A single unit of work failed
    #[error("Unit {index} faulted: {source}")]
    UnitFault {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Cooperative cancellation was observed
    #[error("Operation was cancelled: {operation}{}", .cause.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Cancelled {
        operation: String,
        cause: Option<CancelCause>,
    },

    /// Deadline elapsed before the operation finished
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// Concurrency errors (closed gates, failed joins)
    #[error("Concurrency error: {operation}")]
    Concurrency {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SparkError {
    /// Create a contract violation error
    pub fn contract<S: Into<String>>(message: S) -> Self {
        Self::ContractViolation {
            message: message.into(),
            argument: None,
        }
    }

    /// Create a contract violation error naming the offending argument
    pub fn contract_argument<S: Into<String>, A: Into<String>>(message: S, argument: A) -> Self {
        Self::ContractViolation {
            message: message.into(),
            argument: Some(argument.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn unit_fault(index: usize, source: anyhow::Error) -> Self {
        Self::UnitFault { index, source }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            cause: None,
        }
    }

    /// Create a cancellation error carrying the classified cause
    pub fn cancelled_by<S: Into<String>>(operation: S, cause: CancelCause) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            cause: Some(cause),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a concurrency error
    pub fn concurrency<S: Into<String>>(operation: S) -> Self {
        Self::Concurrency {
            operation: operation.into(),
            source: None,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for both explicit cancellation and deadline expiry
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Concurrency { .. } => true,
            Self::UnitFault { .. } => true,
            Self::ContractViolation { .. } | Self::Configuration { .. } => false,
            Self::Cancelled { .. } => false,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ContractViolation { .. } => "contract",
            Self::Configuration { .. } => "configuration",
            Self::UnitFault { .. } => "unit_fault",
            Self::Cancelled { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Concurrency { .. } => "concurrency",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SparkError>;

impl From<serde_json::Error> for SparkError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<tokio::sync::AcquireError> for SparkError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        Self::Concurrency {
            operation: "acquire_execution_slot".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Returns true when an `anyhow` error wraps a cancellation or timeout
pub fn is_cancellation_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SparkError>()
        .map(SparkError::is_cancellation)
        .unwrap_or(false)
}
