//! Per-provider isolation state.
//!
//! A provider is isolated after a run of consecutive failures and restored
//! after a run of consecutive successes. Reads are lock-free; transitions take
//! a per-provider lock so concurrent callers see exactly one transition.

use chrono::{DateTime, Utc};
use gateway_core::ProviderId;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Isolation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderStateConfig {
    /// Consecutive failures that isolate a provider
    pub failure_threshold: u32,
    /// Consecutive successes that restore an isolated provider
    pub recovery_threshold: u32,
}

impl Default for ProviderStateConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 1,
        }
    }
}

/// Availability change caused by one recorded outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed
    None,
    /// Provider just became unavailable
    Isolated,
    /// Provider just became available again
    Restored,
}

#[derive(Debug, Default)]
struct Timestamps {
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_failure_reason: Option<String>,
    isolated_since: Option<DateTime<Utc>>,
}

/// Availability tracker for one provider
#[derive(Debug)]
pub struct ProviderState {
    provider_id: ProviderId,
    config: ProviderStateConfig,
    available: AtomicBool,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    timestamps: Mutex<Timestamps>,
    transition_lock: RwLock<()>,
}

impl ProviderState {
    /// Create an available provider
    #[must_use]
    pub fn new(provider_id: ProviderId, config: ProviderStateConfig) -> Self {
        Self {
            provider_id,
            config,
            available: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            timestamps: Mutex::new(Timestamps::default()),
            transition_lock: RwLock::new(()),
        }
    }

    /// Provider id
    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    /// Whether the provider may receive traffic
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Record a successful call or probe
    pub fn record_success(&self) -> Transition {
        let _guard = self.transition_lock.write();
        self.consecutive_failures.store(0, Ordering::Release);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
        self.timestamps.lock().last_success = Some(Utc::now());

        if self.is_available() || successes < self.config.recovery_threshold {
            return Transition::None;
        }

        self.available.store(true, Ordering::Release);
        self.timestamps.lock().isolated_since = None;
        info!(provider = %self.provider_id, successes, "Provider restored");
        Transition::Restored
    }

    /// Record a failed call or probe
    pub fn record_failure(&self, reason: &str) -> Transition {
        let _guard = self.transition_lock.write();
        self.consecutive_successes.store(0, Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut timestamps = self.timestamps.lock();
            timestamps.last_failure = Some(Utc::now());
            timestamps.last_failure_reason = Some(reason.to_string());
        }

        if !self.is_available() || failures < self.config.failure_threshold {
            debug!(provider = %self.provider_id, failures, reason, "Provider failure recorded");
            return Transition::None;
        }

        self.available.store(false, Ordering::Release);
        self.timestamps.lock().isolated_since = Some(Utc::now());
        warn!(provider = %self.provider_id, failures, reason, "Provider isolated");
        Transition::Isolated
    }

    /// Point-in-time view
    #[must_use]
    pub fn snapshot(&self) -> ProviderHealth {
        let _guard = self.transition_lock.read();
        let timestamps = self.timestamps.lock();
        ProviderHealth {
            provider_id: self.provider_id.clone(),
            available: self.is_available(),
            consecutive_failures: self.consecutive_failures(),
            last_success: timestamps.last_success,
            last_failure: timestamps.last_failure,
            last_failure_reason: timestamps.last_failure_reason.clone(),
            isolated_since: timestamps.isolated_since,
        }
    }
}

/// Snapshot of one provider's isolation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    /// Provider
    pub provider_id: ProviderId,
    /// Whether it receives traffic
    pub available: bool,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last recorded success
    pub last_success: Option<DateTime<Utc>>,
    /// Last recorded failure
    pub last_failure: Option<DateTime<Utc>>,
    /// Reason given for the last failure
    pub last_failure_reason: Option<String>,
    /// When the provider was isolated
    pub isolated_since: Option<DateTime<Utc>>,
}
