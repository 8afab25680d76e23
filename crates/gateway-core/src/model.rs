//! Model descriptors owned by the registry.

use crate::error::{GatewayError, GatewayResult};
use crate::types::{ModelId, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const fn default_enabled() -> bool {
    true
}

const fn default_context_size() -> u32 {
    8192
}

const fn default_latency_ms() -> u64 {
    1000
}

const fn default_window() -> Duration {
    Duration::from_secs(60)
}

/// Advisory per-model rate limits applied over a fixed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Maximum requests admitted per window
    pub requests_per_window: u32,
    /// Maximum units (tokens) consumed per window
    pub units_per_window: u64,
    /// Window length
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            units_per_window: 100_000,
            window: default_window(),
        }
    }
}

impl RateLimits {
    /// Create limits over a one-minute window
    #[must_use]
    pub fn per_minute(requests: u32, units: u64) -> Self {
        Self {
            requests_per_window: requests,
            units_per_window: units,
            window: default_window(),
        }
    }

    /// Override the window length
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Immutable description of one addressable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model id
    pub id: ModelId,
    /// Owning provider
    pub provider: ProviderId,
    /// Capability tags (e.g. `chat`, `code`, `vision`)
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Cost per input unit
    #[serde(default)]
    pub cost_per_input_unit: f64,
    /// Cost per output unit
    #[serde(default)]
    pub cost_per_output_unit: f64,
    /// Advisory rate limits
    #[serde(default)]
    pub rate_limits: RateLimits,
    /// Context window size in units
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Typical latency estimate
    #[serde(default = "default_latency_ms")]
    pub average_latency_ms: u64,
    /// Disabled models are never selected
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ModelDescriptor {
    /// Create a descriptor with default limits and no capabilities
    #[must_use]
    pub fn new(id: ModelId, provider: ProviderId) -> Self {
        Self {
            id,
            provider,
            capabilities: BTreeSet::new(),
            cost_per_input_unit: 0.0,
            cost_per_output_unit: 0.0,
            rate_limits: RateLimits::default(),
            context_size: default_context_size(),
            average_latency_ms: default_latency_ms(),
            enabled: true,
        }
    }

    /// Add capability tags
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set unit costs
    #[must_use]
    pub fn with_costs(mut self, input: f64, output: f64) -> Self {
        self.cost_per_input_unit = input;
        self.cost_per_output_unit = output;
        self
    }

    /// Set rate limits
    #[must_use]
    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = limits;
        self
    }

    /// Set the context window
    #[must_use]
    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = context_size;
        self
    }

    /// Set the latency estimate
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.average_latency_ms = latency_ms;
        self
    }

    /// Enable or disable the model
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Mean of the input and output unit costs
    #[must_use]
    pub fn average_cost(&self) -> f64 {
        (self.cost_per_input_unit + self.cost_per_output_unit) / 2.0
    }

    /// Whether every tag in `required` is offered by this model
    pub fn supports_all<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        required
            .into_iter()
            .all(|tag| self.capabilities.contains(tag))
    }

    /// Check descriptor invariants
    ///
    /// # Errors
    /// Returns a configuration error for negative costs or zero limits
    pub fn validate(&self) -> GatewayResult<()> {
        if self.cost_per_input_unit < 0.0 || self.cost_per_output_unit < 0.0 {
            return Err(GatewayError::configuration(format!(
                "model '{}' has a negative unit cost",
                self.id
            )));
        }
        if self.rate_limits.requests_per_window == 0 || self.rate_limits.units_per_window == 0 {
            return Err(GatewayError::configuration(format!(
                "model '{}' has a zero rate limit",
                self.id
            )));
        }
        if self.rate_limits.window.is_zero() {
            return Err(GatewayError::configuration(format!(
                "model '{}' has a zero rate window",
                self.id
            )));
        }
        Ok(())
    }
}
