//! Configuration schema.
//!
//! Every section has defaults, so an empty document is a valid configuration
//! (with no models). Durations use humantime syntax (`"30s"`, `"5m"`).

use crate::error::{ConfigError, ConfigResult};
use gateway_core::{ModelDescriptor, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use validator::Validate;

/// Override for the global concurrency ceiling
pub const ENV_GLOBAL_CONCURRENCY: &str = "GATEWAY_GLOBAL_CONCURRENCY";
/// Override for the default per-provider concurrency ceiling
pub const ENV_PROVIDER_CONCURRENCY: &str = "GATEWAY_PROVIDER_CONCURRENCY";
/// Override for the failover retry bound
pub const ENV_MAX_RETRIES: &str = "GATEWAY_MAX_RETRIES";
/// Override for the degradation queue capacity
pub const ENV_MAX_QUEUE_SIZE: &str = "GATEWAY_MAX_QUEUE_SIZE";

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// Concurrency ceilings
    #[validate(nested)]
    pub concurrency: ConcurrencyConfig,
    /// Health probing
    #[validate(nested)]
    pub health: HealthConfig,
    /// Model selection
    #[validate(nested)]
    pub selection: SelectionConfig,
    /// Rate limiting
    #[validate(nested)]
    pub rate_limit: RateLimitConfig,
    /// Failover and backoff
    #[validate(nested)]
    pub failover: FailoverConfig,
    /// Degradation thresholds and queue
    #[validate(nested)]
    pub degradation: DegradationConfig,
    /// Request defaults
    pub request: RequestConfig,
    /// Model registry contents
    pub models: Vec<ModelDescriptor>,
}

/// Concurrency ceilings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum in-flight calls across all providers
    #[validate(range(min = 1))]
    pub global_limit: usize,
    /// Maximum in-flight calls per provider without an override
    #[validate(range(min = 1))]
    pub default_provider_limit: usize,
    /// Per-provider overrides
    pub provider_limits: BTreeMap<ProviderId, usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_limit: 100,
            default_provider_limit: 10,
            provider_limits: BTreeMap::new(),
        }
    }
}

/// Health probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between probes of a healthy model
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,
    /// Per-probe timeout
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Consecutive failures before a model is unhealthy
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    /// Upper bound on probe backoff for failing models
    #[serde(with = "humantime_serde")]
    pub max_probe_backoff: Duration,
    /// Age after which a healthy record counts as stale
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            failure_threshold: 3,
            max_probe_backoff: Duration::from_secs(300),
            stale_after: Duration::from_secs(180),
        }
    }
}

/// Model selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SelectionConfig {
    /// Runner-ups attached to each selection
    #[validate(range(max = 32))]
    pub max_alternatives: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_alternatives: 3,
        }
    }
}

/// Rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Utilisation of either per-model limit, in percent, at which a model
    /// stops being selected
    #[validate(range(min = 1.0, max = 100.0))]
    pub threshold_percent: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 90.0,
        }
    }
}

/// Failover and backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FailoverConfig {
    /// Retries after the first attempt
    #[validate(range(max = 20))]
    pub max_retries: u32,
    /// First backoff delay
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff cap
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff growth factor
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    /// Jitter fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
    /// Failovers away from one model that trigger an alert
    #[validate(range(min = 1))]
    pub alert_threshold: u32,
    /// Window for the alert threshold
    #[serde(with = "humantime_serde")]
    pub alert_window: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
            alert_threshold: 3,
            alert_window: Duration::from_secs(3600),
        }
    }
}

/// Degradation thresholds and queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DegradationConfig {
    /// Consecutive failures before a provider is isolated
    #[validate(range(min = 1))]
    pub provider_failure_threshold: u32,
    /// Successes needed to restore an isolated provider
    #[validate(range(min = 1))]
    pub provider_recovery_threshold: u32,
    /// Queue capacity during total unavailability
    #[validate(range(min = 1))]
    pub max_queue_size: usize,
    /// Delay before the first replay
    #[serde(with = "humantime_serde")]
    pub queue_base_delay: Duration,
    /// Failed replays before a request is dropped
    #[validate(range(min = 1))]
    pub queue_max_retries: u32,
    /// Interval between drain passes
    #[serde(with = "humantime_serde")]
    pub drain_interval: Duration,
    /// Event log capacity
    #[validate(range(min = 1))]
    pub max_events: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            provider_failure_threshold: 3,
            provider_recovery_threshold: 1,
            max_queue_size: 1000,
            queue_base_delay: Duration::from_secs(5),
            queue_max_retries: 5,
            drain_interval: Duration::from_secs(5),
            max_events: 1000,
        }
    }
}

/// Request defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Deadline applied when a request carries none
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Apply `GATEWAY_*` overrides read through `lookup`
    ///
    /// # Errors
    /// Returns an error when an override is not a valid number
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, ENV_GLOBAL_CONCURRENCY)? {
            self.concurrency.global_limit = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_PROVIDER_CONCURRENCY)? {
            self.concurrency.default_provider_limit = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_MAX_RETRIES)? {
            self.failover.max_retries = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_MAX_QUEUE_SIZE)? {
            self.degradation.max_queue_size = v;
        }
        Ok(())
    }

    /// Validate field ranges, durations and the model table
    ///
    /// # Errors
    /// Returns the first violated constraint
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;

        let zero_durations = [
            ("health.probe_interval", self.health.probe_interval),
            ("health.probe_timeout", self.health.probe_timeout),
            ("degradation.drain_interval", self.degradation.drain_interval),
            ("request.default_timeout", self.request.default_timeout),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Validation(format!("{name} must be positive")));
        }
        if self.failover.base_delay > self.failover.max_delay {
            return Err(ConfigError::Validation(
                "failover.base_delay exceeds failover.max_delay".to_string(),
            ));
        }
        if let Some((provider, _)) = self
            .concurrency
            .provider_limits
            .iter()
            .find(|(_, limit)| **limit == 0)
        {
            return Err(ConfigError::Validation(format!(
                "concurrency limit for provider '{provider}' must be positive"
            )));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(&model.id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
            model
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, var: &'static str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvOverride { var, value: raw }),
    }
}
