//! Failover coordinator.
//!
//! Wraps selection and dispatch in a bounded retry loop. A retryable failure
//! excludes the failed model and asks the selector again; the exclusion set
//! only ever grows, and attempts never exceed `max_retries + 1`.

use crate::degradation::{DegradationManager, QueueReplayer};
use crate::dispatcher::Dispatcher;
use crate::retry::{RetryConfig, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use gateway_core::{
    ExecuteRequest, FailoverEvent, FailoverReason, GatewayError, GatewayResult, ModelId,
    ModelResponse, PerformanceStore, SelectionRequest,
};
use gateway_routing::ModelSelector;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Callback invoked for every failover
pub type FailoverHook = Arc<dyn Fn(&FailoverEvent) + Send + Sync>;

/// Failover configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    /// Retry bound and backoff
    pub retry: RetryConfig,
    /// Failovers away from one model that trigger an alert
    pub alert_threshold: u32,
    /// Window for counting failovers
    pub alert_window: Duration,
    /// Per-attempt deadline when the request carries none
    pub default_timeout: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            alert_threshold: 3,
            alert_window: Duration::from_secs(3600),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs selection and dispatch with failover
pub struct FailoverCoordinator {
    config: FailoverConfig,
    policy: RetryPolicy,
    selector: Arc<ModelSelector>,
    dispatcher: Arc<Dispatcher>,
    degradation: Arc<DegradationManager>,
    performance: Option<Arc<dyn PerformanceStore>>,
    hook: Option<FailoverHook>,
    history: DashMap<ModelId, Mutex<VecDeque<Instant>>>,
}

impl fmt::Debug for FailoverCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FailoverCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        config: FailoverConfig,
        selector: Arc<ModelSelector>,
        dispatcher: Arc<Dispatcher>,
        degradation: Arc<DegradationManager>,
    ) -> Self {
        Self {
            policy: RetryPolicy::new(config.retry.clone()),
            config,
            selector,
            dispatcher,
            degradation,
            performance: None,
            hook: None,
            history: DashMap::new(),
        }
    }

    /// Report failovers to a performance store
    #[must_use]
    pub fn with_performance_store(mut self, store: Arc<dyn PerformanceStore>) -> Self {
        self.performance = Some(store);
        self
    }

    /// Call `hook` for every failover
    #[must_use]
    pub fn with_failover_hook(mut self, hook: FailoverHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Retry policy in use
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Serve `request`, failing over between models
    ///
    /// # Errors
    /// - selection errors on the first attempt, unchanged
    /// - terminal and capacity errors, immediately
    /// - `RetriesExhausted` carrying the last failure once no attempt or
    ///   candidate is left
    #[instrument(skip_all, fields(request_id = %request.id))]
    pub async fn dispatch_with_retry(&self, request: &ExecuteRequest) -> GatewayResult<ModelResponse> {
        let timeout = request
            .constraints
            .timeout
            .unwrap_or(self.config.default_timeout);
        let mut selection_request = SelectionRequest::from(request);
        let mut current = self.selector.select(&selection_request)?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let model = self
                .selector
                .registry()
                .get(current.model_id.as_str())
                .ok_or_else(|| GatewayError::model_not_found(current.model_id.as_str()))?;

            debug!(attempt, model = %model.id, score = current.score, "Dispatch attempt");
            let failure = match self
                .dispatcher
                .dispatch(model, request, Instant::now() + timeout)
                .await
            {
                Ok(dispatched) => {
                    return Ok(ModelResponse {
                        request_id: request.id.clone(),
                        model_id: model.id.clone(),
                        provider_id: model.provider.clone(),
                        content: dispatched.output.content,
                        usage: dispatched.output.usage,
                        latency: dispatched.latency,
                        attempts: attempt,
                        from_cache: false,
                        created_at: Utc::now(),
                    });
                }
                Err(e) if !self.policy.is_retryable(&e) => {
                    if e.is_terminal() {
                        error!(attempt, model = %model.id, error = %e, "Terminal failure");
                    }
                    return Err(e);
                }
                Err(e) => e,
            };

            selection_request.exclude_model(current.model_id.clone());

            if !self.policy.allows_retry(attempt) {
                self.emit_failover(request, &current.model_id, None, &failure, attempt);
                warn!(attempts = attempt, error = %failure, "Retries exhausted");
                return Err(GatewayError::retries_exhausted(attempt, failure));
            }

            tokio::time::sleep(self.policy.delay_for_attempt(attempt - 1)).await;

            match self.selector.select(&selection_request) {
                Ok(next) => {
                    self.emit_failover(
                        request,
                        &current.model_id,
                        Some(next.model_id.clone()),
                        &failure,
                        attempt,
                    );
                    current = next;
                }
                Err(selection_error) => {
                    self.emit_failover(request, &current.model_id, None, &failure, attempt);
                    warn!(
                        attempts = attempt,
                        error = %failure,
                        selection = %selection_error,
                        "No candidate left for failover"
                    );
                    return Err(GatewayError::retries_exhausted(attempt, failure));
                }
            }
        }
    }

    fn emit_failover(
        &self,
        request: &ExecuteRequest,
        original: &ModelId,
        replacement: Option<ModelId>,
        failure: &GatewayError,
        attempt: u32,
    ) {
        let event = FailoverEvent {
            request_id: request.id.clone(),
            original_model: original.clone(),
            replacement_model: replacement,
            reason: FailoverReason::from_error(failure),
            attempt,
            timestamp: Utc::now(),
        };
        warn!(
            from = %event.original_model,
            to = ?event.replacement_model,
            reason = %event.reason,
            attempt,
            "Failover"
        );

        self.degradation.record_failover(&event);
        if let Some(store) = &self.performance {
            if self.degradation.is_monitoring_available() {
                if let Err(e) = store.record_failover(&event) {
                    self.degradation.mark_monitoring_failure(&e.to_string());
                }
            }
        }
        if let Some(hook) = &self.hook {
            hook(&event);
        }
        self.track_for_alert(original);
    }

    fn track_for_alert(&self, model: &ModelId) {
        let now = Instant::now();
        let entry = self
            .history
            .entry(model.clone())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut recent = entry.lock();
        recent.push_back(now);
        while recent
            .front()
            .is_some_and(|at| now.duration_since(*at) > self.config.alert_window)
        {
            recent.pop_front();
        }
        if recent.len() >= self.config.alert_threshold as usize {
            warn!(
                model = %model,
                failovers = recent.len(),
                window = ?self.config.alert_window,
                "Excessive failover"
            );
        }
    }

    /// Failovers away from `model` within the alert window
    #[must_use]
    pub fn recent_failovers(&self, model: &ModelId) -> usize {
        let now = Instant::now();
        self.history.get(model).map_or(0, |entry| {
            entry
                .lock()
                .iter()
                .filter(|at| now.duration_since(**at) <= self.config.alert_window)
                .count()
        })
    }
}

#[async_trait]
impl QueueReplayer for FailoverCoordinator {
    async fn replay(&self, request: &ExecuteRequest) -> GatewayResult<ModelResponse> {
        self.dispatch_with_retry(request).await
    }
}
