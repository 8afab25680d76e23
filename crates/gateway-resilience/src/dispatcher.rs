//! Single-attempt dispatch through the concurrency gate.
//!
//! The dispatcher owns admission and outcome reporting. A call is admitted
//! once it holds a gate slot, has time left before its deadline and has
//! reserved room in the model's rate window. Every call that reaches a
//! transport adapter feeds the health checker, provider isolation, the rate
//! limiter and the performance store. A call abandoned mid-flight (caller
//! timeout or cancellation) still releases its gate slots and is reported as
//! a failure.
//!
//! Running out of time while waiting for a gate slot is a capacity failure,
//! not a model failure: nothing is reported against the model or provider.

use crate::concurrency::ConcurrencyGate;
use crate::degradation::DegradationManager;
use gateway_core::{
    AdapterRegistry, CapacityScope, CompletionOutput, ExecuteRequest, GatewayError,
    GatewayResult, ModelDescriptor, PerformanceSample, PerformanceStore, ProviderIsolation,
};
use gateway_routing::{HealthChecker, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Output of one successful call
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// Adapter output
    pub output: CompletionOutput,
    /// Time spent in the adapter
    pub latency: Duration,
    /// Time spent waiting for a gate slot
    pub queued: Duration,
}

/// Calls transport adapters and reports the outcome
pub struct Dispatcher {
    adapters: AdapterRegistry,
    gate: Arc<ConcurrencyGate>,
    health: Arc<HealthChecker>,
    rate_limiter: Arc<RateLimiter>,
    degradation: Arc<DegradationManager>,
    performance: Option<Arc<dyn PerformanceStore>>,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        adapters: AdapterRegistry,
        gate: Arc<ConcurrencyGate>,
        health: Arc<HealthChecker>,
        rate_limiter: Arc<RateLimiter>,
        degradation: Arc<DegradationManager>,
    ) -> Self {
        Self {
            adapters,
            gate,
            health,
            rate_limiter,
            degradation,
            performance: None,
        }
    }

    /// Report samples to a performance store
    #[must_use]
    pub fn with_performance_store(mut self, store: Arc<dyn PerformanceStore>) -> Self {
        self.performance = Some(store);
        self
    }

    /// The concurrency gate
    #[must_use]
    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Call `model` once before `deadline`
    #[instrument(skip_all, fields(request_id = %request.id, model = %model.id, provider = %model.provider))]
    pub async fn dispatch(
        &self,
        model: &ModelDescriptor,
        request: &ExecuteRequest,
        deadline: Instant,
    ) -> GatewayResult<Dispatched> {
        let adapter = self.adapters.get(model.provider.as_str()).ok_or_else(|| {
            GatewayError::configuration(format!(
                "no transport adapter registered for provider '{}'",
                model.provider
            ))
        })?;

        let waiting = Instant::now();
        let _permit = self.gate.acquire(&model.provider, deadline).await?;
        let queued = waiting.elapsed();

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(waited = ?queued, "Deadline spent waiting for a concurrency slot");
            return Err(GatewayError::capacity_exhausted(
                CapacityScope::Provider(model.provider.to_string()),
                queued,
            ));
        }

        let reserved = request.payload.estimated_units();
        if !self.rate_limiter.try_reserve(&model.id, reserved) {
            let status = self.rate_limiter.status(&model.id);
            debug!(units = reserved, "Rate window full at admission");
            return Err(GatewayError::rate_limit(
                status.map(|s| s.resets_in),
                Some(model.rate_limits.requests_per_window),
            ));
        }

        let mut guard = AbortGuard {
            reporter: self,
            model,
            started: Instant::now(),
            armed: true,
        };
        let result = match tokio::time::timeout(
            remaining,
            adapter.call(&model.id, &request.payload, remaining),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(remaining)),
        };
        guard.armed = false;
        let latency = guard.started.elapsed();

        match result {
            Ok(output) => {
                self.report_success(model, reserved, &output, latency);
                Ok(Dispatched {
                    output,
                    latency,
                    queued,
                })
            }
            Err(error) => {
                self.report_failure(model, &error, latency);
                Err(error)
            }
        }
    }

    fn report_success(
        &self,
        model: &ModelDescriptor,
        reserved: u64,
        output: &CompletionOutput,
        latency: Duration,
    ) {
        self.health.record_success(&model.id);
        self.degradation.mark_provider_success(&model.provider);
        let units = match output.usage.total() {
            0 => reserved,
            total => total,
        };
        self.rate_limiter.reconcile(&model.id, reserved, units);
        self.record_sample(PerformanceSample::success(model.id.clone(), latency));
        debug!(latency = ?latency, units, "Dispatch succeeded");
    }

    fn report_failure(&self, model: &ModelDescriptor, error: &GatewayError, latency: Duration) {
        if !error.is_retryable() {
            debug!(error = %error, kind = error.kind(), "Terminal dispatch failure");
            return;
        }
        if error.is_rate_limit() {
            self.rate_limiter.mark_throttled(&model.id, error.retry_after());
        }
        self.health.record_failure(&model.id, &error.to_string());
        self.degradation
            .mark_provider_failure(&model.provider, error.kind());
        self.record_sample(PerformanceSample::failure(model.id.clone(), latency));
        warn!(error = %error, kind = error.kind(), "Dispatch failed");
    }

    fn report_abort(&self, model: &ModelDescriptor, latency: Duration) {
        warn!(model = %model.id, provider = %model.provider, latency = ?latency, "Dispatch abandoned in flight");
        self.health.record_failure(&model.id, "call abandoned");
        self.degradation
            .mark_provider_failure(&model.provider, "abandoned");
        self.record_sample(PerformanceSample::failure(model.id.clone(), latency));
    }

    fn record_sample(&self, sample: PerformanceSample) {
        let Some(store) = &self.performance else {
            return;
        };
        if !self.degradation.is_monitoring_available() {
            return;
        }
        if let Err(e) = store.record(sample) {
            self.degradation.mark_monitoring_failure(&e.to_string());
        }
    }
}

/// Reports a call dropped before it produced a result
struct AbortGuard<'a> {
    reporter: &'a Dispatcher,
    model: &'a ModelDescriptor,
    started: Instant,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.reporter
                .report_abort(self.model, self.started.elapsed());
        }
    }
}
