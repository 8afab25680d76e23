//! Advisory per-model rate limiting.
//!
//! A fixed window per model counts admitted requests and consumed units; both
//! limits must have room for a call to be admitted. A model whose usage has
//! reached `threshold_percent` of either limit is treated as limited before
//! the hard ceiling is hit. Windows roll over lazily on access.
//!
//! Selection only asks [`RateLimiter::would_exceed`]. The dispatcher admits a
//! call with [`RateLimiter::try_reserve`], which checks and counts under the
//! window lock, so concurrent callers can never overshoot the ceiling. The
//! reservation is corrected to the reported usage once the call succeeds and
//! kept as-is when it fails.
//!
//! Provider-side throttling still surfaces as a retryable failure from the
//! adapter; [`RateLimiter::mark_throttled`] then blocks the model until the
//! provider's retry hint elapses.

use crate::registry::ModelRegistry;
use dashmap::DashMap;
use gateway_core::{ModelId, RateLimits};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Utilisation of either limit, in percent, at which a model stops
    /// admitting calls
    pub threshold_percent: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 90.0,
        }
    }
}

#[derive(Debug)]
struct RateWindow {
    started: Instant,
    requests: u32,
    units: u64,
    rejections: u64,
    throttled_until: Option<Instant>,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            requests: 0,
            units: 0,
            rejections: 0,
            throttled_until: None,
        }
    }

    fn roll(&mut self, limits: &RateLimits, now: Instant) {
        if now.duration_since(self.started) >= limits.window {
            self.started = now;
            self.requests = 0;
            self.units = 0;
            self.rejections = 0;
        }
        if self.throttled_until.is_some_and(|until| until <= now) {
            self.throttled_until = None;
        }
    }

    fn is_throttled(&self, now: Instant) -> bool {
        self.throttled_until.is_some_and(|until| until > now)
    }

    fn admits(&self, limits: &RateLimits, threshold: f64, units: u64, now: Instant) -> bool {
        if self.is_throttled(now) {
            return false;
        }
        if self.requests.saturating_add(1) > limits.requests_per_window
            || self.units.saturating_add(units) > limits.units_per_window
        {
            return false;
        }
        let request_share = percent(u64::from(self.requests), u64::from(limits.requests_per_window));
        let unit_share = percent(self.units, limits.units_per_window);
        request_share < threshold && unit_share < threshold
    }
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    used as f64 * 100.0 / limit as f64
}

/// Remaining capacity for one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Model
    pub model_id: ModelId,
    /// Requests admitted this window
    pub requests_used: u32,
    /// Requests still admissible
    pub remaining_requests: u32,
    /// Units consumed this window
    pub units_used: u64,
    /// Units still admissible
    pub remaining_units: u64,
    /// Advisory rejections this window
    pub rejections: u64,
    /// Time until the window rolls over
    pub resets_in: Duration,
    /// Blocked by a provider-reported throttle
    pub throttled: bool,
}

/// Fixed-window request and unit counters keyed by model
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    registry: Arc<ModelRegistry>,
    windows: DashMap<ModelId, Mutex<RateWindow>>,
}

impl RateLimiter {
    /// Create a rate limiter reading limits from the registry
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self::with_config(RateLimiterConfig::default(), registry)
    }

    /// Create a rate limiter with an explicit threshold
    #[must_use]
    pub fn with_config(config: RateLimiterConfig, registry: Arc<ModelRegistry>) -> Self {
        Self {
            config,
            registry,
            windows: DashMap::new(),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn with_window<R>(
        &self,
        model: &ModelId,
        f: impl FnOnce(&mut RateWindow, &RateLimits, Instant) -> R,
    ) -> Option<R> {
        let limits = &self.registry.get(model.as_str())?.rate_limits;
        let now = Instant::now();
        if let Some(entry) = self.windows.get(model) {
            let mut window = entry.lock();
            window.roll(limits, now);
            return Some(f(&mut window, limits, now));
        }
        let entry = self
            .windows
            .entry(model.clone())
            .or_insert_with(|| Mutex::new(RateWindow::new(now)));
        let mut window = entry.lock();
        window.roll(limits, now);
        Some(f(&mut window, limits, now))
    }

    /// Whether admitting a call of `units` would exceed either limit or the
    /// utilisation threshold
    ///
    /// Unknown models never exceed.
    #[must_use]
    pub fn would_exceed(&self, model: &ModelId, units: u64) -> bool {
        let threshold = self.config.threshold_percent;
        self.with_window(model, |window, limits, now| {
            !window.admits(limits, threshold, units, now)
        })
        .unwrap_or(false)
    }

    /// Admit one call of `units`, counting it against the window
    ///
    /// Check and increment happen under the window lock. A refused call is
    /// counted as a rejection. Unknown models are always admitted.
    pub fn try_reserve(&self, model: &ModelId, units: u64) -> bool {
        let threshold = self.config.threshold_percent;
        let reserved = self.with_window(model, |window, limits, now| {
            if !window.admits(limits, threshold, units, now) {
                window.rejections = window.rejections.saturating_add(1);
                return None;
            }
            window.requests = window.requests.saturating_add(1);
            window.units = window.units.saturating_add(units);
            Some((window.requests, window.units))
        });
        match reserved {
            Some(Some((requests, used))) => {
                debug!(model = %model, requests, units = used, "Rate reservation taken");
                true
            }
            Some(None) => {
                debug!(model = %model, units, "Rate reservation refused");
                false
            }
            None => true,
        }
    }

    /// Replace a reservation of `reserved` units with the `actual` usage
    ///
    /// The request count is left alone.
    pub fn reconcile(&self, model: &ModelId, reserved: u64, actual: u64) {
        if reserved == actual {
            return;
        }
        self.with_window(model, |window, _, _| {
            window.units = window.units.saturating_sub(reserved).saturating_add(actual);
        });
    }

    /// Count an advisory rejection
    pub fn record_rejection(&self, model: &ModelId) {
        self.with_window(model, |window, _, _| {
            window.rejections = window.rejections.saturating_add(1);
        });
    }

    /// Block `model` after a provider-reported throttle; defaults to one window
    pub fn mark_throttled(&self, model: &ModelId, retry_after: Option<Duration>) {
        let blocked = self.with_window(model, |window, limits, now| {
            let pause = retry_after.unwrap_or(limits.window);
            window.throttled_until = Some(now + pause);
            pause
        });
        if let Some(pause) = blocked {
            warn!(model = %model, pause = ?pause, "Model throttled by provider");
        }
    }

    /// Whether `model` is blocked by a provider throttle
    #[must_use]
    pub fn is_throttled(&self, model: &ModelId) -> bool {
        self.with_window(model, |window, _, now| window.is_throttled(now))
            .unwrap_or(false)
    }

    /// Current counters for `model`
    #[must_use]
    pub fn status(&self, model: &ModelId) -> Option<RateLimitStatus> {
        self.with_window(model, |window, limits, now| RateLimitStatus {
            model_id: model.clone(),
            requests_used: window.requests,
            remaining_requests: limits.requests_per_window.saturating_sub(window.requests),
            units_used: window.units,
            remaining_units: limits.units_per_window.saturating_sub(window.units),
            rejections: window.rejections,
            resets_in: limits
                .window
                .saturating_sub(now.duration_since(window.started)),
            throttled: window.is_throttled(now),
        })
    }
}
