//! Model health checking.
//!
//! Each model has its own record of atomics plus a small mutex for
//! timestamps, stored in a `DashMap`, so outcomes for different models never
//! contend. Records move between three states:
//!
//! ```text
//! Unknown --success--> Healthy --threshold failures--> Unhealthy
//!    |                    ^                                |
//!    +--threshold fails---+----------- 1 success ---------+
//! ```
//!
//! Unknown models are treated as available so a cold start never rejects
//! everything. Genuine call outcomes reported by the dispatcher count the same
//! as probe outcomes.
//!
//! Health checks run in rounds. Each round reports once per provider to the
//! isolation layer: a success if any of its checked models answered, a single
//! failure if all of them failed.

use crate::registry::ModelRegistry;
use crate::task::BackgroundTask;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use gateway_core::{
    AdapterRegistry, GatewayError, GatewayResult, ModelId, ProviderId, ProviderIsolation,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Interval between probes of a healthy model
    pub probe_interval: Duration,
    /// Per-probe timeout
    pub probe_timeout: Duration,
    /// Consecutive failures before a model is unhealthy
    pub failure_threshold: u32,
    /// Upper bound on probe backoff
    pub max_probe_backoff: Duration,
    /// Age after which a healthy record counts as stale
    pub stale_after: Duration,
}

impl Default for HealthCheckerConfig {
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

impl HealthCheckerConfig {
    /// Set the probe interval
    #[must_use]
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Delay before the next probe given the current failure streak
    #[must_use]
    pub fn probe_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.probe_interval;
        }
        let factor = 2u32.saturating_pow(consecutive_failures - 1);
        self.probe_interval
            .saturating_mul(factor)
            .min(self.max_probe_backoff)
    }
}

/// Health state of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No outcome recorded yet
    Unknown,
    /// Failure streak below threshold
    Healthy,
    /// Failure streak at or above threshold
    Unhealthy,
}

/// Point-in-time view of a model's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    /// Model
    pub model_id: ModelId,
    /// Current state
    pub state: HealthState,
    /// Consecutive failures
    pub consecutive_failures: u32,
    /// Last recorded outcome
    pub last_check: Option<DateTime<Utc>>,
    /// Last recorded success
    pub last_success: Option<DateTime<Utc>>,
    /// Last outcome is older than the stale threshold
    pub stale: bool,
}

impl HealthRecord {
    /// Whether the model may be selected
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state != HealthState::Unhealthy
    }
}

#[derive(Debug, Default)]
struct Timestamps {
    last_check: Option<Instant>,
    last_check_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    next_probe: Option<Instant>,
}

#[derive(Debug, Default)]
struct ModelHealth {
    consecutive_failures: AtomicU32,
    checked: AtomicBool,
    times: Mutex<Timestamps>,
}

impl ModelHealth {
    fn state(&self, threshold: u32) -> HealthState {
        if !self.checked.load(Ordering::Acquire) {
            HealthState::Unknown
        } else if self.consecutive_failures.load(Ordering::Acquire) >= threshold {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        }
    }
}

#[derive(Debug, Default)]
struct ProviderRound {
    succeeded: usize,
    failed: usize,
    last_error: Option<String>,
}

/// Tracks per-model availability from probes and real call outcomes
pub struct HealthChecker {
    config: HealthCheckerConfig,
    registry: Arc<ModelRegistry>,
    adapters: AdapterRegistry,
    isolation: Arc<dyn ProviderIsolation>,
    records: DashMap<ModelId, Arc<ModelHealth>>,
}

impl HealthChecker {
    /// Create a health checker
    #[must_use]
    pub fn new(
        config: HealthCheckerConfig,
        registry: Arc<ModelRegistry>,
        adapters: AdapterRegistry,
        isolation: Arc<dyn ProviderIsolation>,
    ) -> Self {
        Self {
            config,
            registry,
            adapters,
            isolation,
            records: DashMap::new(),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &HealthCheckerConfig {
        &self.config
    }

    fn entry(&self, model: &ModelId) -> Arc<ModelHealth> {
        if let Some(existing) = self.records.get(model) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.records.entry(model.clone()).or_default().value())
    }

    /// Whether `model` may be selected; unknown models are available
    #[must_use]
    pub fn is_available(&self, model: &str) -> bool {
        self.state(model) != HealthState::Unhealthy
    }

    /// Current state of `model`
    #[must_use]
    pub fn state(&self, model: &str) -> HealthState {
        self.records
            .get(model)
            .map_or(HealthState::Unknown, |h| {
                h.state(self.config.failure_threshold)
            })
    }

    /// Snapshot of `model`'s record, if any outcome was recorded
    #[must_use]
    pub fn record(&self, model: &str) -> Option<HealthRecord> {
        let (model_id, health) = self
            .records
            .get(model)
            .map(|e| (e.key().clone(), Arc::clone(e.value())))?;
        let times = health.times.lock();
        let stale = times
            .last_check
            .map_or(true, |t| t.elapsed() > self.config.stale_after);
        Some(HealthRecord {
            model_id,
            state: health.state(self.config.failure_threshold),
            consecutive_failures: health.consecutive_failures.load(Ordering::Acquire),
            last_check: times.last_check_at,
            last_success: times.last_success_at,
            stale,
        })
    }

    /// Snapshots of every tracked model
    #[must_use]
    pub fn records(&self) -> Vec<HealthRecord> {
        let ids: Vec<ModelId> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.record(id.as_str())).collect()
    }

    /// Record a successful probe or call
    pub fn record_success(&self, model: &ModelId) {
        let health = self.entry(model);
        let previous = health.consecutive_failures.swap(0, Ordering::AcqRel);
        health.checked.store(true, Ordering::Release);
        {
            let mut times = health.times.lock();
            let now = Utc::now();
            times.last_check = Some(Instant::now());
            times.last_check_at = Some(now);
            times.last_success_at = Some(now);
        }
        if previous >= self.config.failure_threshold {
            info!(model = %model, failures = previous, "Model recovered");
        }
    }

    /// Record a failed probe or call
    pub fn record_failure(&self, model: &ModelId, reason: &str) {
        let health = self.entry(model);
        let failures = health.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        health.checked.store(true, Ordering::Release);
        {
            let mut times = health.times.lock();
            times.last_check = Some(Instant::now());
            times.last_check_at = Some(Utc::now());
        }
        if failures == self.config.failure_threshold {
            warn!(model = %model, failures, reason, "Model marked unhealthy");
        } else {
            debug!(model = %model, failures, reason, "Model failure recorded");
        }
    }

    fn is_due(&self, model: &ModelId, now: Instant) -> bool {
        self.records
            .get(model)
            .and_then(|h| h.times.lock().next_probe)
            .map_or(true, |next| next <= now)
    }

    /// Probe one model as a round of its own
    ///
    /// # Errors
    /// Returns the probe failure; the outcome is recorded either way
    pub async fn probe_model(&self, model: &ModelId) -> GatewayResult<()> {
        let (provider, outcome) = self.check_model(model).await?;
        self.report_round([(provider, outcome.as_ref().err())]);
        outcome
    }

    /// Check `models` concurrently as one round, whether due or not
    ///
    /// Returns how many checks failed. Unknown models and models without an
    /// adapter are skipped.
    pub async fn probe_models(&self, models: &[ModelId]) -> usize {
        let results = join_all(models.iter().map(|id| self.check_model(id))).await;
        let outcomes: Vec<(ProviderId, GatewayResult<()>)> =
            results.into_iter().filter_map(Result::ok).collect();
        self.report_round(
            outcomes
                .iter()
                .map(|(provider, outcome)| (provider.clone(), outcome.as_ref().err())),
        );
        outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count()
    }

    /// Probe every enabled model that is due; returns how many were probed
    pub async fn probe_all(&self) -> usize {
        let now = Instant::now();
        let due: Vec<ModelId> = self
            .registry
            .enabled()
            .filter(|m| self.is_due(&m.id, now))
            .map(|m| m.id.clone())
            .collect();
        if due.is_empty() {
            return 0;
        }

        let failed = self.probe_models(&due).await;
        if failed > 0 {
            debug!(probed = due.len(), failed, "Probe round finished");
        }
        due.len()
    }

    /// Run one health check and record it against the model only
    async fn check_model(
        &self,
        model: &ModelId,
    ) -> GatewayResult<(ProviderId, GatewayResult<()>)> {
        let descriptor = self
            .registry
            .get(model.as_str())
            .ok_or_else(|| GatewayError::model_not_found(model.as_str()))?;
        let adapter = self.adapters.get(descriptor.provider.as_str()).ok_or_else(|| {
            GatewayError::configuration(format!(
                "no transport adapter for provider '{}'",
                descriptor.provider
            ))
        })?;

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.config.probe_timeout, adapter.health_check(model)).await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::timeout(self.config.probe_timeout)),
            };

        match &outcome {
            Ok(()) => self.record_success(model),
            Err(e) => self.record_failure(model, e.kind()),
        }

        let failures = self
            .records
            .get(model)
            .map_or(0, |h| h.consecutive_failures.load(Ordering::Acquire));
        let delay = self.config.probe_delay(failures);
        if let Some(health) = self.records.get(model) {
            health.times.lock().next_probe = Some(started + delay);
        }
        debug!(model = %model, ok = outcome.is_ok(), next_probe_in = ?delay, "Probe finished");
        Ok((descriptor.provider.clone(), outcome))
    }

    fn report_round<'a>(
        &self,
        outcomes: impl IntoIterator<Item = (ProviderId, Option<&'a GatewayError>)>,
    ) {
        let mut round: BTreeMap<ProviderId, ProviderRound> = BTreeMap::new();
        for (provider, error) in outcomes {
            let tally = round.entry(provider).or_default();
            match error {
                None => tally.succeeded += 1,
                Some(e) => {
                    tally.failed += 1;
                    tally.last_error = Some(e.to_string());
                }
            }
        }

        for (provider, tally) in round {
            if tally.succeeded > 0 {
                self.isolation.mark_provider_success(&provider);
            } else {
                let reason = format!(
                    "all {} health checks failed: {}",
                    tally.failed,
                    tally.last_error.unwrap_or_default()
                );
                self.isolation.mark_provider_failure(&provider, &reason);
            }
        }
    }

    fn next_wakeup(&self) -> Instant {
        let fallback = Instant::now() + self.config.probe_interval;
        self.registry
            .enabled()
            .filter_map(|m| self.records.get(&m.id).and_then(|h| h.times.lock().next_probe))
            .min()
            .map_or(fallback, |next| next.min(fallback))
    }

    /// Run the probe loop until shutdown
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> BackgroundTask {
        BackgroundTask::spawn("health-checker", move |mut shutdown| async move {
            info!(
                models = self.registry.enabled().count(),
                interval = ?self.config.probe_interval,
                "Health checker started"
            );
            loop {
                self.probe_all().await;
                let wake = self.next_wakeup();
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep_until(wake) => {}
                }
            }
            info!("Health checker stopped");
        })
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("tracked", &self.records.len())
            .finish()
    }
}
