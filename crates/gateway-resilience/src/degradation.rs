//! Graceful degradation manager.
//!
//! Tracks which parts of the system are impaired and keeps serving what it
//! can:
//! - providers are isolated after consecutive failures and restored on success
//! - cache and monitoring outages are flags that dependents check and skip
//! - when no model is viable at all, requests are parked in a bounded queue
//!   and replayed in the background with a doubling backoff
//!
//! Every mode change is appended to a bounded, time-queryable event log.

use crate::provider_state::{ProviderHealth, ProviderState, ProviderStateConfig, Transition};
use crate::queue::{QueueConfig, ReplayOutcome, ReplayResult, RequestQueue, RequeueOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::{
    ExecuteRequest, FailoverEvent, GatewayResult, ModelId, ModelResponse, ProviderId,
    ProviderIsolation, QueuedAck,
};
use gateway_routing::BackgroundTask;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Named impairment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    /// Everything available
    Normal,
    /// Response cache unavailable; requests bypass it
    CacheUnavailable,
    /// Performance monitoring unavailable; samples are skipped
    MonitoringUnavailable,
    /// Exactly one provider isolated
    ProviderUnavailable,
    /// Several, but not all, providers isolated
    PartialProviderUnavailable,
    /// No model can serve; requests are queued
    TotalUnavailability,
}

impl DegradationMode {
    /// Stable label for logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::CacheUnavailable => "cache_unavailable",
            Self::MonitoringUnavailable => "monitoring_unavailable",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::PartialProviderUnavailable => "partial_provider_unavailable",
            Self::TotalUnavailability => "total_unavailability",
        }
    }

    /// Numeric severity, higher is worse
    #[must_use]
    pub fn severity(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::MonitoringUnavailable => 1,
            Self::CacheUnavailable => 2,
            Self::ProviderUnavailable => 3,
            Self::PartialProviderUnavailable => 4,
            Self::TotalUnavailability => 5,
        }
    }
}

impl fmt::Display for DegradationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-critical subsystem guarded by a fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Response cache
    Cache,
    /// Performance store
    Monitoring,
}

impl Subsystem {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Monitoring => "monitoring",
        }
    }
}

/// Degradation manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationConfig {
    /// Provider isolation thresholds
    pub provider: ProviderStateConfig,
    /// Queue bounds and replay schedule
    pub queue: QueueConfig,
    /// Pause between drain passes
    pub drain_interval: Duration,
    /// Event log capacity
    pub max_events: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderStateConfig::default(),
            queue: QueueConfig::default(),
            drain_interval: Duration::from_secs(5),
            max_events: 1000,
        }
    }
}

/// One entry of the degradation event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradationEvent {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Mode after the event
    pub mode: DegradationMode,
    /// What happened
    pub message: String,
    /// Providers, models or subsystems involved
    pub affected_components: Vec<String>,
}

/// Current degradation summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradationStatus {
    /// Most severe active mode
    pub mode: DegradationMode,
    /// Every active mode, most severe first
    pub active_modes: Vec<DegradationMode>,
    /// Impaired providers and subsystems
    pub affected_components: Vec<String>,
    /// Human readable summary
    pub message: String,
    /// When the system left normal operation
    pub degraded_since: Option<DateTime<Utc>>,
    /// Isolated providers
    pub isolated_providers: Vec<ProviderId>,
    /// Response cache usable
    pub cache_available: bool,
    /// Performance monitoring usable
    pub monitoring_available: bool,
    /// Requests waiting for replay
    pub queue_len: usize,
    /// Replays in flight
    pub queue_in_flight: usize,
}

impl DegradationStatus {
    /// Whether `mode` is among the active modes
    #[must_use]
    pub fn is_active(&self, mode: DegradationMode) -> bool {
        self.active_modes.contains(&mode)
    }
}

/// Counts from one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries replayed
    pub attempted: usize,
    /// Replays that succeeded
    pub completed: usize,
    /// Failed replays put back in the queue
    pub requeued: usize,
    /// Failed replays out of retries
    pub dropped: usize,
}

/// Re-runs a parked request
#[async_trait]
pub trait QueueReplayer: Send + Sync {
    /// Dispatch `request` again
    async fn replay(&self, request: &ExecuteRequest) -> GatewayResult<ModelResponse>;
}

#[derive(Debug)]
struct EventLog {
    events: VecDeque<DegradationEvent>,
    degraded_since: Option<DateTime<Utc>>,
    mode: DegradationMode,
}

/// Tracks impairments, isolates providers and parks requests during outages
pub struct DegradationManager {
    config: DegradationConfig,
    providers: DashMap<ProviderId, Arc<ProviderState>>,
    known_providers: RwLock<BTreeSet<ProviderId>>,
    cache_available: AtomicBool,
    monitoring_available: AtomicBool,
    total_outage: AtomicBool,
    log: Mutex<EventLog>,
    queue: RequestQueue,
    replays: broadcast::Sender<ReplayOutcome>,
}

impl fmt::Debug for DegradationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegradationManager")
            .field("mode", &self.mode())
            .field("providers", &self.providers.len())
            .field("queue_len", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl DegradationManager {
    /// Create a manager in normal mode
    #[must_use]
    pub fn new(config: DegradationConfig) -> Self {
        let (replays, _) = broadcast::channel(config.queue.max_size.clamp(16, 1024));
        Self {
            queue: RequestQueue::new(config.queue),
            config,
            providers: DashMap::new(),
            known_providers: RwLock::new(BTreeSet::new()),
            cache_available: AtomicBool::new(true),
            monitoring_available: AtomicBool::new(true),
            total_outage: AtomicBool::new(false),
            log: Mutex::new(EventLog {
                events: VecDeque::new(),
                degraded_since: None,
                mode: DegradationMode::Normal,
            }),
            replays,
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Record the provider universe so partial and total outages are decidable
    pub fn register_providers(&self, providers: impl IntoIterator<Item = ProviderId>) {
        let mut known = self.known_providers.write();
        for provider in providers {
            self.provider_state(&provider);
            known.insert(provider);
        }
    }

    fn provider_state(&self, provider: &ProviderId) -> Arc<ProviderState> {
        if let Some(state) = self.providers.get(provider) {
            return Arc::clone(state.value());
        }
        let state = self.providers.entry(provider.clone()).or_insert_with(|| {
            Arc::new(ProviderState::new(provider.clone(), self.config.provider))
        });
        Arc::clone(state.value())
    }

    fn isolated_providers(&self) -> Vec<ProviderId> {
        let mut isolated: Vec<ProviderId> = self
            .providers
            .iter()
            .filter(|entry| !entry.value().is_available())
            .map(|entry| entry.key().clone())
            .collect();
        isolated.sort();
        isolated
    }

    fn all_providers_isolated(&self, isolated: usize) -> bool {
        let known = self.known_providers.read().len().max(self.providers.len());
        known > 0 && isolated >= known
    }

    fn active_modes(&self) -> Vec<DegradationMode> {
        let isolated = self.isolated_providers().len();
        let mut modes = Vec::new();

        if self.total_outage.load(Ordering::Acquire) || self.all_providers_isolated(isolated) {
            modes.push(DegradationMode::TotalUnavailability);
        } else if isolated >= 2 {
            modes.push(DegradationMode::PartialProviderUnavailable);
        } else if isolated == 1 {
            modes.push(DegradationMode::ProviderUnavailable);
        }
        if !self.is_cache_available() {
            modes.push(DegradationMode::CacheUnavailable);
        }
        if !self.is_monitoring_available() {
            modes.push(DegradationMode::MonitoringUnavailable);
        }
        if modes.is_empty() {
            modes.push(DegradationMode::Normal);
        }
        modes
    }

    /// Most severe active mode
    #[must_use]
    pub fn mode(&self) -> DegradationMode {
        self.active_modes()
            .first()
            .copied()
            .unwrap_or(DegradationMode::Normal)
    }

    fn push_event(&self, log: &mut EventLog, message: String, affected: Vec<String>) {
        log.events.push_back(DegradationEvent {
            timestamp: Utc::now(),
            mode: log.mode,
            message,
            affected_components: affected,
        });
        while log.events.len() > self.config.max_events {
            log.events.pop_front();
        }
    }

    fn transition(&self, message: String, affected: Vec<String>) {
        let mode = self.mode();
        let mut log = self.log.lock();
        let previous = log.mode;
        log.mode = mode;
        if mode == DegradationMode::Normal {
            log.degraded_since = None;
        } else if log.degraded_since.is_none() {
            log.degraded_since = Some(Utc::now());
        }
        if previous != mode {
            info!(from = %previous, to = %mode, "Degradation mode changed");
        }
        self.push_event(&mut log, message, affected);
    }

    fn clear_total_outage(&self, cause: &str) {
        if self.total_outage.swap(false, Ordering::AcqRel) {
            info!(cause, "Total unavailability cleared");
            self.transition(
                format!("total unavailability cleared by {cause}"),
                vec![cause.to_string()],
            );
        }
    }

    /// Record that no provider can take traffic
    ///
    /// Callers raise this only when every provider is isolated or rate
    /// limited; a request that merely has no viable model of its own is
    /// queued without it. Cleared by the next provider success.
    pub fn report_total_unavailability(&self, message: &str, candidates: &[ModelId]) {
        if !self.total_outage.swap(true, Ordering::AcqRel) {
            warn!(candidates = candidates.len(), message, "Total unavailability");
            self.transition(
                format!("no viable model: {message}"),
                candidates.iter().map(ToString::to_string).collect(),
            );
        }
    }

    /// Whether requests should be queued rather than dispatched
    #[must_use]
    pub fn is_total_unavailability(&self) -> bool {
        self.mode() == DegradationMode::TotalUnavailability
    }

    /// Whether the response cache may be used
    #[must_use]
    pub fn is_cache_available(&self) -> bool {
        self.cache_available.load(Ordering::Acquire)
    }

    /// Whether the performance store may be used
    #[must_use]
    pub fn is_monitoring_available(&self) -> bool {
        self.monitoring_available.load(Ordering::Acquire)
    }

    fn flag(&self, subsystem: Subsystem) -> &AtomicBool {
        match subsystem {
            Subsystem::Cache => &self.cache_available,
            Subsystem::Monitoring => &self.monitoring_available,
        }
    }

    /// Whether `subsystem` may be used
    #[must_use]
    pub fn is_available(&self, subsystem: Subsystem) -> bool {
        self.flag(subsystem).load(Ordering::Acquire)
    }

    /// Mark `subsystem` unavailable until a success is reported
    pub fn mark_failure(&self, subsystem: Subsystem, reason: &str) {
        if self.flag(subsystem).swap(false, Ordering::AcqRel) {
            warn!(subsystem = subsystem.as_str(), reason, "Subsystem unavailable");
            self.transition(
                format!("{} unavailable: {reason}", subsystem.as_str()),
                vec![subsystem.as_str().to_string()],
            );
        }
    }

    /// Mark `subsystem` available again
    pub fn mark_success(&self, subsystem: Subsystem) {
        if !self.flag(subsystem).swap(true, Ordering::AcqRel) {
            info!(subsystem = subsystem.as_str(), "Subsystem restored");
            self.transition(
                format!("{} restored", subsystem.as_str()),
                vec![subsystem.as_str().to_string()],
            );
        }
    }

    /// Mark the response cache unavailable
    pub fn mark_cache_failure(&self, reason: &str) {
        self.mark_failure(Subsystem::Cache, reason);
    }

    /// Mark the response cache available
    pub fn mark_cache_success(&self) {
        self.mark_success(Subsystem::Cache);
    }

    /// Mark performance monitoring unavailable
    pub fn mark_monitoring_failure(&self, reason: &str) {
        self.mark_failure(Subsystem::Monitoring, reason);
    }

    /// Mark performance monitoring available
    pub fn mark_monitoring_success(&self) {
        self.mark_success(Subsystem::Monitoring);
    }

    /// Run `primary` unless `subsystem` is down; any failure yields `fallback`
    ///
    /// A failing `primary` marks the subsystem unavailable. The request path
    /// never sees the error.
    pub async fn execute_with_fallback<T, Fut, F>(
        &self,
        subsystem: Subsystem,
        primary: Fut,
        fallback: F,
    ) -> T
    where
        Fut: Future<Output = GatewayResult<T>>,
        F: FnOnce() -> T,
    {
        if !self.is_available(subsystem) {
            debug!(subsystem = subsystem.as_str(), "Subsystem unavailable; using fallback");
            return fallback();
        }
        match primary.await {
            Ok(value) => value,
            Err(e) => {
                self.mark_failure(subsystem, &e.to_string());
                fallback()
            }
        }
    }

    /// Snapshot of every tracked provider
    #[must_use]
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        let mut health: Vec<ProviderHealth> = self
            .providers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        health.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        health
    }

    /// Current summary
    #[must_use]
    pub fn status(&self) -> DegradationStatus {
        let isolated = self.isolated_providers();
        let active_modes = self.active_modes();
        let mode = active_modes
            .first()
            .copied()
            .unwrap_or(DegradationMode::Normal);

        let mut affected: Vec<String> = isolated.iter().map(ToString::to_string).collect();
        if !self.is_cache_available() {
            affected.push(Subsystem::Cache.as_str().to_string());
        }
        if !self.is_monitoring_available() {
            affected.push(Subsystem::Monitoring.as_str().to_string());
        }

        let message = match mode {
            DegradationMode::Normal => "all systems operational".to_string(),
            DegradationMode::TotalUnavailability => format!(
                "no model available; {} requests queued",
                self.queue.len() + self.queue.in_flight()
            ),
            _ => format!("degraded: {}", affected.join(", ")),
        };

        DegradationStatus {
            mode,
            active_modes,
            affected_components: affected,
            message,
            degraded_since: self.log.lock().degraded_since,
            isolated_providers: isolated,
            cache_available: self.is_cache_available(),
            monitoring_available: self.is_monitoring_available(),
            queue_len: self.queue.len(),
            queue_in_flight: self.queue.in_flight(),
        }
    }

    /// Events at or after `since`, the latest `limit` of them, oldest first
    #[must_use]
    pub fn events(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<DegradationEvent> {
        let log = self.log.lock();
        let matching: Vec<&DegradationEvent> = log
            .events
            .iter()
            .filter(|event| since.map_or(true, |since| event.timestamp >= since))
            .collect();
        let skip = limit.map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Log a failover
    pub fn record_failover(&self, event: &FailoverEvent) {
        let mut affected = vec![event.original_model.to_string()];
        if let Some(replacement) = &event.replacement_model {
            affected.push(replacement.to_string());
        }
        let message = match &event.replacement_model {
            Some(replacement) => format!(
                "failover from {} to {} ({})",
                event.original_model, replacement, event.reason
            ),
            None => format!(
                "failover from {} with no replacement ({})",
                event.original_model, event.reason
            ),
        };
        let mut log = self.log.lock();
        self.push_event(&mut log, message, affected);
    }

    /// Park a request until a model becomes viable
    pub fn enqueue(
        &self,
        request: ExecuteRequest,
        target_model: Option<ModelId>,
    ) -> GatewayResult<QueuedAck> {
        self.queue.enqueue(request, target_model)
    }

    /// The degradation queue
    #[must_use]
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Requests queued or being replayed
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len() + self.queue.in_flight()
    }

    /// Receive the final outcome of every queued request
    #[must_use]
    pub fn subscribe_replays(&self) -> broadcast::Receiver<ReplayOutcome> {
        self.replays.subscribe()
    }

    fn publish(&self, outcome: ReplayOutcome) {
        // No subscribers is fine
        let _ = self.replays.send(outcome);
    }

    /// Replay every eligible queued request once, oldest first
    ///
    /// The queue lock is released before any replay starts.
    pub async fn drain_once(&self, replayer: &dyn QueueReplayer) -> DrainReport {
        let entries = self.queue.take_eligible(Instant::now());
        let mut report = DrainReport::default();

        for entry in entries {
            report.attempted += 1;
            match replayer.replay(&entry.request).await {
                Ok(response) => {
                    report.completed += 1;
                    self.queue.complete(&entry);
                    let queued_for = entry.enqueued_at.elapsed();
                    info!(
                        request_id = %entry.request.id,
                        ticket = %entry.ticket,
                        retries = entry.retries,
                        queued_for = ?queued_for,
                        "Queued request replayed"
                    );
                    self.clear_total_outage("successful replay");
                    self.publish(ReplayOutcome {
                        ticket: entry.ticket,
                        request_id: entry.request.id.clone(),
                        queued_for,
                        result: ReplayResult::Completed(response),
                    });
                }
                Err(error) => {
                    let ticket = entry.ticket;
                    let request_id = entry.request.id.clone();
                    match self.queue.requeue_or_drop(entry, error.clone()) {
                        (RequeueOutcome::Requeued { retries, delay }, _) => {
                            report.requeued += 1;
                            debug!(
                                request_id = %request_id,
                                retries,
                                next_in = ?delay,
                                error = %error,
                                "Replay failed; requeued"
                            );
                        }
                        (RequeueOutcome::Dropped { retries }, dropped) => {
                            report.dropped += 1;
                            warn!(
                                request_id = %request_id,
                                retries,
                                error = %error,
                                "Queued request dropped after final replay"
                            );
                            self.transition(
                                format!(
                                    "request {request_id} dropped after {retries} failed replays: {error}"
                                ),
                                vec![request_id.to_string()],
                            );
                            self.publish(ReplayOutcome {
                                ticket,
                                request_id,
                                queued_for: dropped.enqueued_at.elapsed(),
                                result: ReplayResult::Dropped {
                                    retries,
                                    last_error: error,
                                },
                            });
                        }
                    }
                }
            }
        }

        if report.attempted > 0 {
            debug!(
                attempted = report.attempted,
                completed = report.completed,
                requeued = report.requeued,
                dropped = report.dropped,
                "Drain pass finished"
            );
        }
        report
    }

    /// Drain the queue every `drain_interval` until shutdown
    pub fn spawn_drain(self: Arc<Self>, replayer: Arc<dyn QueueReplayer>) -> BackgroundTask {
        BackgroundTask::spawn("degradation-drain", move |mut shutdown| async move {
            let interval = self.config.drain_interval;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                if self.queue.len() > 0 {
                    self.drain_once(replayer.as_ref()).await;
                }
            }
        })
    }
}

impl ProviderIsolation for DegradationManager {
    fn is_provider_available(&self, provider: &ProviderId) -> bool {
        self.providers
            .get(provider)
            .map_or(true, |state| state.is_available())
    }

    fn mark_provider_success(&self, provider: &ProviderId) {
        if self.provider_state(provider).record_success() == Transition::Restored {
            self.transition(
                format!("provider {provider} restored"),
                vec![provider.to_string()],
            );
        }
        self.clear_total_outage("provider success");
    }

    fn mark_provider_failure(&self, provider: &ProviderId, reason: &str) {
        if self.provider_state(provider).record_failure(reason) == Transition::Isolated {
            self.transition(
                format!("provider {provider} isolated: {reason}"),
                vec![provider.to_string()],
            );
        }
    }
}
