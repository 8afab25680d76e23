//! Response and event types.

use crate::error::GatewayError;
use crate::types::{ModelId, ProviderId, QueueTicket, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unit accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Units consumed by the prompt
    pub input_units: u64,
    /// Units generated
    pub output_units: u64,
}

impl Usage {
    /// Create usage counts
    #[must_use]
    pub fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
        }
    }

    /// Total units consumed
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_units + self.output_units
    }
}

/// What a transport adapter returns for a successful call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutput {
    /// Generated text
    pub content: String,
    /// Unit accounting
    #[serde(default)]
    pub usage: Usage,
}

impl CompletionOutput {
    /// Create an output
    #[must_use]
    pub fn new(content: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: content.into(),
            usage,
        }
    }
}

/// Successful gateway response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Request that produced this response
    pub request_id: RequestId,
    /// Model that served it
    pub model_id: ModelId,
    /// Provider that served it
    pub provider_id: ProviderId,
    /// Generated text
    pub content: String,
    /// Unit accounting
    pub usage: Usage,
    /// Latency of the serving call
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// Dispatch attempts made, including the successful one
    pub attempts: u32,
    /// Served from the response cache
    #[serde(default)]
    pub from_cache: bool,
    /// Completion time
    pub created_at: DateTime<Utc>,
}

/// Acknowledgment for a request parked during total unavailability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAck {
    /// Ticket to correlate the eventual replay outcome
    pub ticket: QueueTicket,
    /// Queue position at enqueue time (1-based)
    pub position: usize,
    /// Model targeted when the request was queued
    pub target_model: Option<ModelId>,
    /// Human readable message
    pub message: String,
}

/// Result of `Gateway::execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    /// Served
    Completed(ModelResponse),
    /// Parked for later replay
    Queued(QueuedAck),
}

impl ExecuteOutcome {
    /// Response if served
    #[must_use]
    pub fn completed(&self) -> Option<&ModelResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Queued(_) => None,
        }
    }

    /// Acknowledgment if queued
    #[must_use]
    pub fn queued(&self) -> Option<&QueuedAck> {
        match self {
            Self::Queued(ack) => Some(ack),
            Self::Completed(_) => None,
        }
    }

    /// Whether the request was queued
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Why a dispatch moved on to another model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// Call exceeded its deadline
    Timeout,
    /// Connection failed
    Connection,
    /// Provider returned a transient error
    ProviderError,
    /// Provider throttled the call
    RateLimited,
    /// Model could not be reached at all
    Unavailable,
}

impl FailoverReason {
    /// Classify a retryable failure
    #[must_use]
    pub fn from_error(error: &GatewayError) -> Self {
        if error.is_rate_limit() {
            return Self::RateLimited;
        }
        match error {
            GatewayError::Timeout { .. } => Self::Timeout,
            GatewayError::Connection { .. } => Self::Connection,
            GatewayError::Provider { .. } => Self::ProviderError,
            _ => Self::Unavailable,
        }
    }

    /// Stable label for logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::ProviderError => "provider_error",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One move from a failed model to its replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Request being failed over
    pub request_id: RequestId,
    /// Model that failed
    pub original_model: ModelId,
    /// Model chosen next, if any was left
    pub replacement_model: Option<ModelId>,
    /// Failure classification
    pub reason: FailoverReason,
    /// Attempt number that failed (1-based)
    pub attempt: u32,
    /// When the failover happened
    pub timestamp: DateTime<Utc>,
}
