//! Error taxonomy for the gateway.
//!
//! Every failure is classified into one of four families:
//! - **Retryable**: timeouts, connection failures, 5xx provider errors and
//!   provider-reported rate limits. These drive failover and health counters.
//! - **Terminal**: malformed requests, authentication failures, unknown models
//!   and other 4xx errors. Surfaced to the caller without retry.
//! - **Capacity**: a concurrency gate could not be entered before the deadline.
//! - **Unavailability**: no model can currently serve the request; converted
//!   into a queued acknowledgment (or a queue-full rejection) by the gateway.

use crate::types::ModelId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the gateway crates
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Which concurrency gate rejected a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityScope {
    /// The global in-flight ceiling
    Global,
    /// A provider-specific ceiling
    Provider(String),
}

impl fmt::Display for CapacityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Provider(provider) => write!(f, "provider '{provider}'"),
        }
    }
}

/// Gateway error type
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Request failed validation
    #[error("Validation error: {message}")]
    Validation {
        /// Human readable message
        message: String,
        /// Offending field, if known
        field: Option<String>,
        /// Stable machine readable code
        code: String,
    },

    /// Provider rejected the credentials
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Human readable message
        message: String,
    },

    /// Model is not known to the registry or the provider
    #[error("Model not found: {model}")]
    ModelNotFound {
        /// Requested model id
        model: String,
    },

    /// Error returned by a provider
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        /// Provider id
        provider: String,
        /// Provider message
        message: String,
        /// HTTP-like status code, if the provider reported one
        status_code: Option<u16>,
        /// Whether the provider flagged the failure as transient
        retryable: bool,
    },

    /// Connection to the provider could not be established or was lost
    #[error("Connection to provider '{provider}' failed: {message}")]
    Connection {
        /// Provider id
        provider: String,
        /// Underlying message
        message: String,
    },

    /// Operation exceeded its deadline
    #[error("Request timed out after {duration:?}")]
    Timeout {
        /// Time budget that was exceeded
        duration: Duration,
    },

    /// Provider-side throttling
    #[error("Rate limit exceeded{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimit {
        /// Provider hint for when to retry
        retry_after: Option<Duration>,
        /// Limit that was hit, if reported
        limit: Option<u32>,
    },

    /// A concurrency gate could not be entered in time
    #[error("Capacity exhausted at {scope} gate after waiting {waited:?}")]
    CapacityExhausted {
        /// Gate that refused admission
        scope: CapacityScope,
        /// Time spent waiting
        waited: Duration,
    },

    /// No registered model satisfies the static request constraints
    #[error("No model matches the request: {message}")]
    NoMatchingModel {
        /// Which filter emptied the candidate set
        message: String,
    },

    /// Matching models exist but none is currently usable
    #[error("No viable model available: {message}")]
    NoViableModel {
        /// Why the remaining candidates were dropped
        message: String,
        /// Models that matched the static constraints
        candidates: Vec<ModelId>,
    },

    /// The degradation queue is at capacity
    #[error("Request queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Failover gave up; carries the last underlying failure
    #[error("All {attempts} attempts failed; last error: {last}")]
    RetriesExhausted {
        /// Number of dispatch attempts made
        attempts: u32,
        /// Last failure observed
        last: Box<GatewayError>,
    },

    /// Invalid gateway configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human readable message
        message: String,
    },

    /// Internal invariant violated
    #[error("Internal error: {message}")]
    Internal {
        /// Human readable message
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a model-not-found error
    pub fn model_not_found(model: impl Into<String>) -> Self {
        Self::ModelNotFound {
            model: model.into(),
        }
    }

    /// Create a provider error
    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a connection error
    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a rate limit error
    #[must_use]
    pub fn rate_limit(retry_after: Option<Duration>, limit: Option<u32>) -> Self {
        Self::RateLimit { retry_after, limit }
    }

    /// Create a capacity exhaustion error
    #[must_use]
    pub fn capacity_exhausted(scope: CapacityScope, waited: Duration) -> Self {
        Self::CapacityExhausted { scope, waited }
    }

    /// Create a no-matching-model error
    pub fn no_matching_model(message: impl Into<String>) -> Self {
        Self::NoMatchingModel {
            message: message.into(),
        }
    }

    /// Create a no-viable-model error
    pub fn no_viable_model(message: impl Into<String>, candidates: Vec<ModelId>) -> Self {
        Self::NoViableModel {
            message: message.into(),
            candidates,
        }
    }

    /// Create a queue-full error
    #[must_use]
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Wrap the last failure of an exhausted failover sequence
    #[must_use]
    pub fn retries_exhausted(attempts: u32, last: Self) -> Self {
        Self::RetriesExhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure is transient and another model may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } | Self::RateLimit { .. } => true,
            Self::Provider {
                retryable,
                status_code,
                ..
            } => *retryable || matches!(status_code, Some(429 | 500..=599)),
            _ => false,
        }
    }

    /// Whether the failure must be surfaced without retry
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable() && !self.is_unavailability() && !self.is_capacity()
    }

    /// Whether the failure is a concurrency gate timeout
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExhausted { .. })
    }

    /// Whether the failure means no model can currently serve the request
    #[must_use]
    pub fn is_unavailability(&self) -> bool {
        matches!(self, Self::NoViableModel { .. })
    }

    /// Whether the provider throttled the call
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
            || matches!(self, Self::Provider { status_code: Some(429), .. })
    }

    /// Provider retry hint, if any
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Authentication { .. } => "authentication",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::Provider { .. } => "provider",
            Self::Connection { .. } => "connection",
            Self::Timeout { .. } => "timeout",
            Self::RateLimit { .. } => "rate_limit",
            Self::CapacityExhausted { .. } => "capacity_exhausted",
            Self::NoMatchingModel { .. } => "no_matching_model",
            Self::NoViableModel { .. } => "no_viable_model",
            Self::QueueFull { .. } => "queue_full",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }

    /// Innermost cause, unwrapping exhausted-retry wrappers
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(GatewayError::connection("openai", "reset").is_retryable());
        assert!(GatewayError::rate_limit(None, None).is_retryable());
        assert!(GatewayError::provider("openai", "boom", Some(503), false).is_retryable());
        assert!(GatewayError::provider("openai", "slow down", Some(429), false).is_retryable());
        assert!(GatewayError::provider("openai", "flaky", None, true).is_retryable());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(GatewayError::authentication("bad key").is_terminal());
        assert!(GatewayError::model_not_found("gpt-9").is_terminal());
        assert!(GatewayError::validation("empty", None, "empty").is_terminal());
        assert!(GatewayError::provider("openai", "bad", Some(400), false).is_terminal());
    }

    #[test]
    fn test_capacity_and_unavailability_are_distinct() {
        let busy = GatewayError::capacity_exhausted(CapacityScope::Global, Duration::from_secs(1));
        assert!(busy.is_capacity());
        assert!(!busy.is_terminal());
        assert!(!busy.is_retryable());

        let down = GatewayError::no_viable_model("all isolated", vec![]);
        assert!(down.is_unavailability());
        assert!(!down.is_terminal());
    }

    #[test]
    fn test_root_cause_unwraps_nested_exhaustion() {
        let inner = GatewayError::timeout(Duration::from_millis(10));
        let err = GatewayError::retries_exhausted(4, inner);
        assert_eq!(err.kind(), "retries_exhausted");
        assert_eq!(err.root_cause().kind(), "timeout");
        assert!(err.to_string().contains("4 attempts"));
    }

    #[test]
    fn test_rate_limit_display() {
        let err = GatewayError::rate_limit(Some(Duration::from_secs(2)), Some(60));
        assert!(err.to_string().contains("retry after"));
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }
}
