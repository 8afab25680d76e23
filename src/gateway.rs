//! The gateway facade.
//!
//! [`Gateway`] owns every component and exposes the single request entry
//! point, [`Gateway::execute`], plus the status surface used by operators.
//! All state is in memory: health records, rate windows, provider isolation
//! and the degradation queue start empty on every process start, so queued
//! requests do not survive a restart.

use chrono::{DateTime, Utc};
use gateway_config::GatewayConfig;
use gateway_core::{
    AdapterRegistry, ExecuteOutcome, ExecuteRequest, FailoverEvent, GatewayError, GatewayResult,
    ModelDescriptor, ModelResponse, PerformanceStore, ProviderIsolation, ResponseCache,
    TransportAdapter,
};
use gateway_resilience::{
    ConcurrencyConfig, ConcurrencyGate, ConcurrencyStatus, DegradationConfig, DegradationEvent,
    DegradationManager, DegradationStatus, Dispatcher, FailoverConfig, FailoverCoordinator,
    FailoverHook, ProviderHealth, ProviderStateConfig, QueueConfig, QueueReplayer, ReplayOutcome,
    RetryConfig, Subsystem,
};
use gateway_routing::{
    BackgroundTask, HealthChecker, HealthCheckerConfig, HealthRecord, ModelRegistry, ModelSelector,
    RateLimitStatus, RateLimiter, RateLimiterConfig, SelectorConfig,
};
use gateway_telemetry::{GatewayMetrics, RequestOutcome};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Resilient model gateway
pub struct Gateway {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthChecker>,
    rate_limiter: Arc<RateLimiter>,
    gate: Arc<ConcurrencyGate>,
    failover: Arc<FailoverCoordinator>,
    degradation: Arc<DegradationManager>,
    cache: Option<Arc<dyn ResponseCache>>,
    metrics: Option<GatewayMetrics>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl Gateway {
    /// Start building a gateway
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Build a gateway from a loaded configuration file
    ///
    /// # Errors
    /// Returns `Configuration` if the configuration is invalid or lists
    /// duplicate model ids
    pub fn from_config(config: &GatewayConfig, adapters: AdapterRegistry) -> GatewayResult<Self> {
        config
            .validate_all()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;
        Self::builder()
            .with_config(config)
            .adapters(adapters)
            .build()
    }

    /// Serve one request
    ///
    /// Returns `Completed` when a model (or the cache) answered and `Queued`
    /// when no model is currently viable and the request was parked for
    /// replay. Replay results are published on [`Gateway::subscribe_replays`].
    ///
    /// # Errors
    /// Terminal failures, exhausted failover, capacity exhaustion and a full
    /// queue are returned to the caller
    pub async fn execute(&self, request: ExecuteRequest) -> GatewayResult<ExecuteOutcome> {
        let span = gateway_telemetry::request_span!(request.id, request.constraints.priority.as_str());
        let started = Instant::now();

        let result = self.execute_inner(request).instrument(span.clone()).await;

        let outcome = match &result {
            Ok(ExecuteOutcome::Completed(response)) if response.from_cache => RequestOutcome::Cached,
            Ok(ExecuteOutcome::Completed(_)) => RequestOutcome::Completed,
            Ok(ExecuteOutcome::Queued(_)) => RequestOutcome::Queued,
            Err(_) => RequestOutcome::Failed,
        };
        span.record("outcome", outcome.as_str());

        if let Some(metrics) = &self.metrics {
            metrics.record_request(outcome, started.elapsed());
            if let Err(e) = &result {
                metrics.record_error(e.kind());
            }
            self.refresh_gauges(metrics);
        }
        result
    }

    async fn execute_inner(&self, request: ExecuteRequest) -> GatewayResult<ExecuteOutcome> {
        request.validate()?;

        let key = self.cache.as_ref().and_then(|_| cache_key(&request));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            let hit = self
                .degradation
                .execute_with_fallback(Subsystem::Cache, cache.get(key), || None)
                .await;
            if let Some(mut response) = hit {
                debug!(model = %response.model_id, "Served from cache");
                response.request_id = request.id.clone();
                response.from_cache = true;
                return Ok(ExecuteOutcome::Completed(response));
            }
        }

        match self.failover.dispatch_with_retry(&request).await {
            Ok(response) => {
                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    self.store_in_cache(cache.as_ref(), key, &response).await;
                }
                Ok(ExecuteOutcome::Completed(response))
            }
            Err(GatewayError::NoViableModel {
                message,
                candidates,
            }) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_selection_failure("no_viable_model");
                }
                if self.every_provider_unavailable() {
                    self.degradation
                        .report_total_unavailability(&message, &candidates);
                } else {
                    debug!(reason = %message, "No viable model for this request; other providers still serve");
                }
                let target = candidates.first().cloned();
                let ack = self.degradation.enqueue(request, target)?;
                info!(
                    ticket = %ack.ticket,
                    position = ack.position,
                    "Request queued until a model becomes viable"
                );
                Ok(ExecuteOutcome::Queued(ack))
            }
            Err(e) => {
                if let (Some(metrics), GatewayError::NoMatchingModel { .. }) = (&self.metrics, &e) {
                    metrics.record_selection_failure("no_matching_model");
                }
                Err(e)
            }
        }
    }

    /// Whether every registered provider is isolated or has no enabled model
    /// with rate window room left
    fn every_provider_unavailable(&self) -> bool {
        self.registry.provider_ids().iter().all(|provider| {
            !self.degradation.is_provider_available(provider)
                || self
                    .registry
                    .by_provider(provider.as_str())
                    .filter(|m| m.enabled)
                    .all(|m| self.rate_limiter.would_exceed(&m.id, 0))
        })
    }

    async fn store_in_cache(&self, cache: &dyn ResponseCache, key: &str, response: &ModelResponse) {
        self.degradation
            .execute_with_fallback(Subsystem::Cache, cache.set(key, response), || ())
            .await;
    }

    fn refresh_gauges(&self, metrics: &GatewayMetrics) {
        let concurrency = self.gate.status();
        metrics.set_global_in_flight(concurrency.global.active);
        for (provider, stats) in &concurrency.providers {
            metrics.set_provider_in_flight(provider.as_str(), stats.active);
        }
        for health in self.degradation.provider_health() {
            metrics.set_provider_available(health.provider_id.as_str(), health.available);
        }
        metrics.set_degradation_severity(self.degradation.mode().severity());
        metrics.set_queue_depth(self.degradation.queue_len());
    }

    /// Start health probing and queue draining
    ///
    /// Calling `start` on a running gateway does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Gateway already started");
            return;
        }

        tasks.push(Arc::clone(&self.health).spawn());
        let replayer: Arc<dyn QueueReplayer> = self.failover.clone();
        tasks.push(Arc::clone(&self.degradation).spawn_drain(replayer));
        if let Some(metrics) = &self.metrics {
            tasks.push(spawn_replay_metrics(
                metrics.clone(),
                self.degradation.subscribe_replays(),
                Arc::clone(&self.degradation),
            ));
        }

        info!(
            models = self.registry.len(),
            tasks = tasks.len(),
            "Gateway started"
        );
    }

    /// Stop all background tasks and wait for them to exit
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.shutdown().await;
        }
        info!(queued = self.degradation.queue_len(), "Gateway stopped");
    }

    /// Whether background tasks are running
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Check the response cache and restore it if healthy
    ///
    /// Returns whether the cache is available afterwards. Without a cache
    /// this is always `false`.
    pub async fn probe_cache(&self) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        match cache.health_check().await {
            Ok(()) => {
                self.degradation.mark_cache_success();
                true
            }
            Err(e) => {
                self.degradation.mark_cache_failure(&e.to_string());
                false
            }
        }
    }

    /// Live concurrency gate counters
    #[must_use]
    pub fn concurrency_status(&self) -> ConcurrencyStatus {
        self.gate.status()
    }

    /// Current degradation status
    #[must_use]
    pub fn degradation_status(&self) -> DegradationStatus {
        self.degradation.status()
    }

    /// Degradation events at or after `since`, at most `limit`, oldest first
    #[must_use]
    pub fn degradation_events(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<DegradationEvent> {
        self.degradation.events(since, limit)
    }

    /// Requests waiting in or being replayed from the degradation queue
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.degradation.queue_len()
    }

    /// Receive the final outcome of every queued request
    #[must_use]
    pub fn subscribe_replays(&self) -> broadcast::Receiver<ReplayOutcome> {
        self.degradation.subscribe_replays()
    }

    /// Health record of every model seen so far
    #[must_use]
    pub fn health_records(&self) -> Vec<HealthRecord> {
        self.health.records()
    }

    /// Rate window counters of every registered model
    #[must_use]
    pub fn rate_limit_status(&self) -> Vec<RateLimitStatus> {
        self.registry
            .all()
            .iter()
            .filter_map(|m| self.rate_limiter.status(&m.id))
            .collect()
    }

    /// Isolation state of every provider
    #[must_use]
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.degradation.provider_health()
    }

    /// Model registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Health checker, for manual probing
    #[must_use]
    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// Degradation manager
    #[must_use]
    pub fn degradation(&self) -> &Arc<DegradationManager> {
        &self.degradation
    }

    /// Metrics handle, if configured
    #[must_use]
    pub fn metrics(&self) -> Option<&GatewayMetrics> {
        self.metrics.as_ref()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("models", &self.registry.len())
            .field("mode", &self.degradation.mode())
            .field("cache", &self.cache.is_some())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn spawn_replay_metrics(
    metrics: GatewayMetrics,
    mut replays: broadcast::Receiver<ReplayOutcome>,
    degradation: Arc<DegradationManager>,
) -> BackgroundTask {
    BackgroundTask::spawn("replay-metrics", move |mut shutdown| async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = replays.recv() => match received {
                    Ok(outcome) => {
                        metrics.record_replay(outcome.is_completed());
                        metrics.set_queue_depth(degradation.queue_len());
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Replay metrics fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Cache key for a request: SHA-256 over its capabilities and payload
///
/// `None` when the request cannot be serialized; such requests bypass the
/// cache.
#[must_use]
pub fn cache_key(request: &ExecuteRequest) -> Option<String> {
    digest_key(&(&request.capabilities, &request.payload))
}

fn digest_key<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Some(format!("{:x}", Sha256::digest(&bytes))),
        Err(e) => {
            warn!(error = %e, "Request not serializable; skipping cache");
            None
        }
    }
}

/// Builder for [`Gateway`]
#[derive(Default)]
pub struct GatewayBuilder {
    models: Vec<ModelDescriptor>,
    adapters: AdapterRegistry,
    concurrency: ConcurrencyConfig,
    health: HealthCheckerConfig,
    rate_limit: RateLimiterConfig,
    selector: SelectorConfig,
    failover: FailoverConfig,
    degradation: DegradationConfig,
    performance: Option<Arc<dyn PerformanceStore>>,
    cache: Option<Arc<dyn ResponseCache>>,
    metrics: Option<GatewayMetrics>,
}

impl GatewayBuilder {
    /// Map every section of a configuration file onto component settings
    #[must_use]
    pub fn with_config(mut self, config: &GatewayConfig) -> Self {
        self.models.clone_from(&config.models);

        self.concurrency = ConcurrencyConfig {
            global_limit: config.concurrency.global_limit,
            default_provider_limit: config.concurrency.default_provider_limit,
            provider_limits: config
                .concurrency
                .provider_limits
                .iter()
                .map(|(provider, limit)| (provider.clone(), *limit))
                .collect(),
        };

        self.health = HealthCheckerConfig {
            probe_interval: config.health.probe_interval,
            probe_timeout: config.health.probe_timeout,
            failure_threshold: config.health.failure_threshold,
            max_probe_backoff: config.health.max_probe_backoff,
            stale_after: config.health.stale_after,
        };

        self.selector = SelectorConfig {
            max_alternatives: config.selection.max_alternatives,
        };

        self.rate_limit = RateLimiterConfig {
            threshold_percent: config.rate_limit.threshold_percent,
        };

        self.failover = FailoverConfig {
            retry: RetryConfig {
                max_retries: config.failover.max_retries,
                base_delay: config.failover.base_delay,
                max_delay: config.failover.max_delay,
                multiplier: config.failover.multiplier,
                jitter: config.failover.jitter,
            },
            alert_threshold: config.failover.alert_threshold,
            alert_window: config.failover.alert_window,
            default_timeout: config.request.default_timeout,
        };

        self.degradation = DegradationConfig {
            provider: ProviderStateConfig {
                failure_threshold: config.degradation.provider_failure_threshold,
                recovery_threshold: config.degradation.provider_recovery_threshold,
            },
            queue: QueueConfig {
                max_size: config.degradation.max_queue_size,
                base_delay: config.degradation.queue_base_delay,
                max_retries: config.degradation.queue_max_retries,
            },
            drain_interval: config.degradation.drain_interval,
            max_events: config.degradation.max_events,
        };
        self
    }

    /// Replace the model list
    #[must_use]
    pub fn models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    /// Add one model
    #[must_use]
    pub fn model(mut self, model: ModelDescriptor) -> Self {
        self.models.push(model);
        self
    }

    /// Replace the transport adapters
    #[must_use]
    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Add one transport adapter
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    /// Concurrency limits
    #[must_use]
    pub fn concurrency(mut self, config: ConcurrencyConfig) -> Self {
        self.concurrency = config;
        self
    }

    /// Health checking settings
    #[must_use]
    pub fn health(mut self, config: HealthCheckerConfig) -> Self {
        self.health = config;
        self
    }

    /// Rate limiting settings
    #[must_use]
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Selection settings
    #[must_use]
    pub fn selector(mut self, config: SelectorConfig) -> Self {
        self.selector = config;
        self
    }

    /// Failover settings
    #[must_use]
    pub fn failover(mut self, config: FailoverConfig) -> Self {
        self.failover = config;
        self
    }

    /// Degradation settings
    #[must_use]
    pub fn degradation(mut self, config: DegradationConfig) -> Self {
        self.degradation = config;
        self
    }

    /// Historical performance store
    #[must_use]
    pub fn performance_store(mut self, store: Arc<dyn PerformanceStore>) -> Self {
        self.performance = Some(store);
        self
    }

    /// Response cache
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Metrics handle
    #[must_use]
    pub fn metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire all components
    ///
    /// # Errors
    /// Returns `Configuration` if model ids are duplicated
    pub fn build(self) -> GatewayResult<Gateway> {
        let registry = Arc::new(ModelRegistry::new(self.models)?);

        let degradation = Arc::new(DegradationManager::new(self.degradation));
        degradation.register_providers(registry.provider_ids());
        let isolation: Arc<dyn ProviderIsolation> = degradation.clone();

        let health = Arc::new(HealthChecker::new(
            self.health,
            Arc::clone(&registry),
            self.adapters.clone(),
            Arc::clone(&isolation),
        ));
        let rate_limiter = Arc::new(RateLimiter::with_config(
            self.rate_limit,
            Arc::clone(&registry),
        ));

        let mut selector = ModelSelector::new(
            self.selector,
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::clone(&rate_limiter),
            isolation,
        );
        let gate = Arc::new(ConcurrencyGate::new(self.concurrency));
        let mut dispatcher = Dispatcher::new(
            self.adapters,
            Arc::clone(&gate),
            Arc::clone(&health),
            Arc::clone(&rate_limiter),
            Arc::clone(&degradation),
        );
        if let Some(store) = &self.performance {
            selector = selector.with_performance_store(Arc::clone(store));
            dispatcher = dispatcher.with_performance_store(Arc::clone(store));
        }

        let mut failover = FailoverCoordinator::new(
            self.failover,
            Arc::new(selector),
            Arc::new(dispatcher),
            Arc::clone(&degradation),
        );
        if let Some(store) = self.performance {
            failover = failover.with_performance_store(store);
        }
        if let Some(metrics) = &self.metrics {
            let metrics = metrics.clone();
            let hook: FailoverHook = Arc::new(move |event: &FailoverEvent| {
                metrics.record_failover(event.reason.as_str());
            });
            failover = failover.with_failover_hook(hook);
        }

        info!(
            models = registry.len(),
            providers = registry.provider_ids().len(),
            cache = self.cache.is_some(),
            "Gateway built"
        );

        Ok(Gateway {
            registry,
            health,
            rate_limiter,
            gate,
            failover: Arc::new(failover),
            degradation,
            cache: self.cache,
            metrics: self.metrics,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("models", &self.models.len())
            .field("adapters", &self.adapters)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
