//! Backoff schedule shared by failover and queue replay.
//!
//! The policy only answers two questions: may another attempt follow, and
//! how long to pause first. Callers decide what an attempt is.

use gateway_core::GatewayError;
use rand::Rng;
use std::time::Duration;

/// Bounds and shape of the backoff curve
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Pause before the first retry
    pub base_delay: Duration,
    /// Ceiling applied before jitter
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Relative jitter in `[0, 1]`, applied symmetrically
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Exponential backoff with a cap and optional jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Policy over `config`; jitter is clamped into `[0, 1]`
    #[must_use]
    pub fn new(mut config: RetryConfig) -> Self {
        config.jitter = config.jitter.clamp(0.0, 1.0);
        Self { config }
    }

    /// Plain doubling from `base_delay` with no cap and no jitter
    ///
    /// With a 5s base this yields 5, 10, 20, 40, 80 seconds.
    #[must_use]
    pub fn doubling(base_delay: Duration, max_retries: u32) -> Self {
        Self::new(RetryConfig {
            max_retries,
            base_delay,
            max_delay: Duration::MAX,
            multiplier: 2.0,
            jitter: 0.0,
        })
    }

    /// Pause before retry number `retry` (0 is the first retry)
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let uncapped = self.config.base_delay.as_nanos() as f64 * self.config.multiplier.powi(exponent);
        let capped = uncapped.min(self.config.max_delay.as_nanos() as f64);

        let spread = capped * self.config.jitter;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        Duration::from_nanos((capped + offset).max(0.0).round() as u64)
    }

    /// Whether `error` is worth another attempt on a different model
    #[must_use]
    pub fn is_retryable(&self, error: &GatewayError) -> bool {
        error.is_retryable()
    }

    /// Whether a failure on `attempt` (1-based) may be followed by another
    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }

    /// Attempts including the first
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Underlying configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
