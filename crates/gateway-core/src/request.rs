//! Request types for the gateway.
//!
//! An [`ExecuteRequest`] carries what the caller needs (capabilities), what to
//! send (payload) and how the gateway may route it (constraints). The selector
//! only sees the routing-relevant projection, a [`SelectionRequest`].

use crate::error::{GatewayError, GatewayResult};
use crate::types::{ModelId, ProviderId, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const fn default_max_tokens() -> u32 {
    256
}

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions
    System,
    /// End user
    User,
    /// Model output
    Assistant,
}

/// Chat message with role and content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author
    pub role: MessageRole,
    /// Text content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// What is sent to the provider; opaque to routing except for size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Maximum units to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl RequestPayload {
    /// Payload with a single user message
    #[must_use]
    pub fn prompt(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(content)],
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }

    /// Rough unit estimate used for rate limit admission: four characters
    /// per unit for the input plus the generation budget
    #[must_use]
    pub fn estimated_units(&self) -> u64 {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        (chars as u64).div_ceil(4) + u64::from(self.max_tokens)
    }

    /// Validate the payload
    ///
    /// # Errors
    /// Returns a validation error for empty conversations or out-of-range
    /// sampling parameters
    pub fn validate(&self) -> GatewayResult<()> {
        if self.messages.is_empty() {
            return Err(GatewayError::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }
        if self.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(GatewayError::validation(
                "messages contain no content",
                Some("messages".to_string()),
                "blank_messages",
            ));
        }
        if self.max_tokens == 0 {
            return Err(GatewayError::validation(
                "max_tokens must be positive",
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::validation(
                    format!("temperature must be between 0.0 and 2.0, got {t}"),
                    Some("temperature".to_string()),
                    "invalid_temperature",
                ));
            }
        }
        Ok(())
    }
}

/// Capability tags the request needs or would like
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequirements {
    /// Tags every candidate must offer
    #[serde(default)]
    pub required: BTreeSet<String>,
    /// Tags that raise a candidate's capability score
    #[serde(default)]
    pub preferred: BTreeSet<String>,
}

/// Request priority; shifts selection weight between cost and performance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// User-facing, latency critical
    Critical,
    /// Important interactive work
    High,
    /// Default
    #[default]
    Normal,
    /// Deferred work
    Low,
    /// Batch work where cost dominates
    Background,
}

impl Priority {
    /// Stable label for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        }
    }
}

/// Routing constraints supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestConstraints {
    /// Maximum acceptable average unit cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    /// Hard latency bound on the model's estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
    /// Providers that must not be used
    #[serde(default)]
    pub excluded_providers: BTreeSet<ProviderId>,
    /// Models that must not be used
    #[serde(default)]
    pub excluded_models: BTreeSet<ModelId>,
    /// Priority class
    #[serde(default)]
    pub priority: Priority,
    /// Overall deadline; the gateway default applies when unset
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Additive score bonus per model
    #[serde(default)]
    pub boosts: BTreeMap<ModelId, f64>,
}

/// Inbound request to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Request identifier
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,
    /// Capability requirements
    #[serde(default)]
    pub capabilities: CapabilityRequirements,
    /// Provider payload
    pub payload: RequestPayload,
    /// Routing constraints
    #[serde(default)]
    pub constraints: RequestConstraints,
}

impl ExecuteRequest {
    /// Create a new builder for `ExecuteRequest`
    #[must_use]
    pub fn builder() -> ExecuteRequestBuilder {
        ExecuteRequestBuilder::default()
    }

    /// Validate the request
    ///
    /// # Errors
    /// Returns a validation error for malformed payloads or constraints
    pub fn validate(&self) -> GatewayResult<()> {
        self.payload.validate()?;

        if let Some(max_cost) = self.constraints.max_cost {
            if !max_cost.is_finite() || max_cost < 0.0 {
                return Err(GatewayError::validation(
                    format!("max_cost must be a non-negative number, got {max_cost}"),
                    Some("max_cost".to_string()),
                    "invalid_max_cost",
                ));
            }
        }
        if self.constraints.max_latency_ms == Some(0) {
            return Err(GatewayError::validation(
                "max_latency_ms must be positive",
                Some("max_latency_ms".to_string()),
                "invalid_max_latency",
            ));
        }
        if self.constraints.timeout.is_some_and(|t| t.is_zero()) {
            return Err(GatewayError::validation(
                "timeout must be positive",
                Some("timeout".to_string()),
                "invalid_timeout",
            ));
        }
        Ok(())
    }
}

/// Builder for `ExecuteRequest`
#[derive(Debug, Default)]
pub struct ExecuteRequestBuilder {
    id: Option<RequestId>,
    capabilities: CapabilityRequirements,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    constraints: RequestConstraints,
}

impl ExecuteRequestBuilder {
    /// Set the request ID
    #[must_use]
    pub fn id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    /// Require a capability tag
    #[must_use]
    pub fn require(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.required.insert(tag.into());
        self
    }

    /// Prefer a capability tag
    #[must_use]
    pub fn prefer(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.preferred.insert(tag.into());
        self
    }

    /// Add a message
    #[must_use]
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Add a user message
    #[must_use]
    pub fn prompt(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::user(content))
    }

    /// Set max_tokens
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the cost ceiling
    #[must_use]
    pub fn max_cost(mut self, max_cost: f64) -> Self {
        self.constraints.max_cost = Some(max_cost);
        self
    }

    /// Set the latency bound
    #[must_use]
    pub fn max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.constraints.max_latency_ms = Some(max_latency_ms);
        self
    }

    /// Exclude a provider
    #[must_use]
    pub fn exclude_provider(mut self, provider: ProviderId) -> Self {
        self.constraints.excluded_providers.insert(provider);
        self
    }

    /// Exclude a model
    #[must_use]
    pub fn exclude_model(mut self, model: ModelId) -> Self {
        self.constraints.excluded_models.insert(model);
        self
    }

    /// Set the priority
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.constraints.priority = priority;
        self
    }

    /// Set the deadline
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.constraints.timeout = Some(timeout);
        self
    }

    /// Boost a model's score
    #[must_use]
    pub fn boost(mut self, model: ModelId, bonus: f64) -> Self {
        self.constraints.boosts.insert(model, bonus);
        self
    }

    /// Build the request
    ///
    /// # Errors
    /// Returns error if the request fails validation
    pub fn build(self) -> GatewayResult<ExecuteRequest> {
        let request = ExecuteRequest {
            id: self.id.unwrap_or_else(RequestId::generate),
            capabilities: self.capabilities,
            payload: RequestPayload {
                messages: self.messages,
                max_tokens: self.max_tokens.unwrap_or_else(default_max_tokens),
                temperature: self.temperature,
            },
            constraints: self.constraints,
        };

        request.validate()?;

        Ok(request)
    }
}

/// Routing-relevant projection of a request, consumed by the selector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionRequest {
    /// Tags every candidate must offer
    pub required: BTreeSet<String>,
    /// Tags that raise the capability score
    pub preferred: BTreeSet<String>,
    /// Cost ceiling on `average_cost`
    pub max_cost: Option<f64>,
    /// Hard latency bound
    pub max_latency_ms: Option<u64>,
    /// Providers to skip
    pub excluded_providers: BTreeSet<ProviderId>,
    /// Models to skip; grows across failover attempts
    pub excluded_models: BTreeSet<ModelId>,
    /// Priority class
    pub priority: Priority,
    /// Additive score bonuses
    pub boosts: BTreeMap<ModelId, f64>,
    /// Units the call is expected to consume
    pub estimated_units: u64,
}

impl SelectionRequest {
    /// Add a model to the exclusion set
    pub fn exclude_model(&mut self, model: ModelId) {
        self.excluded_models.insert(model);
    }
}

impl From<&ExecuteRequest> for SelectionRequest {
    fn from(request: &ExecuteRequest) -> Self {
        Self {
            required: request.capabilities.required.clone(),
            preferred: request.capabilities.preferred.clone(),
            max_cost: request.constraints.max_cost,
            max_latency_ms: request.constraints.max_latency_ms,
            excluded_providers: request.constraints.excluded_providers.clone(),
            excluded_models: request.constraints.excluded_models.clone(),
            priority: request.constraints.priority,
            boosts: request.constraints.boosts.clone(),
            estimated_units: request.payload.estimated_units(),
        }
    }
}
