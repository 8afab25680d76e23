//! Collaborator traits.
//!
//! The gateway owns selection, admission, failover and degradation. Everything
//! that talks to the outside world is reached through these seams:
//! transport adapters, the performance store and the response cache.
//! [`ProviderIsolation`] lets routing consult and feed provider-level failure
//! tracking without depending on the crate that implements it.

use crate::error::GatewayResult;
use crate::request::RequestPayload;
use crate::response::{CompletionOutput, FailoverEvent, ModelResponse};
use crate::types::{ModelId, ProviderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Adapter that speaks one provider's wire protocol
///
/// Implementations must classify failures: timeouts, connection errors, 5xx
/// and 429 responses as retryable `GatewayError`s; authentication, unknown
/// model and other 4xx responses as terminal ones.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Provider served by this adapter
    fn provider_id(&self) -> &ProviderId;

    /// Execute one call against `model`
    async fn call(
        &self,
        model: &ModelId,
        payload: &RequestPayload,
        timeout: Duration,
    ) -> GatewayResult<CompletionOutput>;

    /// Lightweight liveness probe for `model`
    async fn health_check(&self, model: &ModelId) -> GatewayResult<()>;
}

/// Adapters keyed by provider
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderId, Arc<dyn TransportAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own provider id, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn TransportAdapter>) {
        self.adapters.insert(adapter.provider_id().clone(), adapter);
    }

    /// Builder-style registration
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Adapter for `provider`
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<Arc<dyn TransportAdapter>> {
        self.adapters.get(provider).cloned()
    }

    /// Registered provider ids
    pub fn provider_ids(&self) -> impl Iterator<Item = &ProviderId> {
        self.adapters.keys()
    }

    /// Number of adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapter is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of one real call, recorded for historical performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Model that was called
    pub model_id: ModelId,
    /// Observed latency
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// Whether the call succeeded
    pub success: bool,
    /// Optional quality score in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

impl PerformanceSample {
    /// Successful call sample
    #[must_use]
    pub fn success(model_id: ModelId, latency: Duration) -> Self {
        Self {
            model_id,
            latency,
            success: true,
            quality: None,
        }
    }

    /// Failed call sample
    #[must_use]
    pub fn failure(model_id: ModelId, latency: Duration) -> Self {
        Self {
            model_id,
            latency,
            success: false,
            quality: None,
        }
    }
}

/// Aggregated history for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Fraction of successful calls in [0, 1]
    pub success_rate: f64,
    /// Mean latency of recorded calls
    pub average_latency_ms: f64,
    /// Number of samples aggregated
    pub samples: u64,
}

/// External performance history
///
/// Writes are fire-and-forget from the request path: implementations must not
/// block, and errors are swallowed by the caller after flipping the
/// monitoring degradation flag.
pub trait PerformanceStore: Send + Sync {
    /// Record one call outcome
    fn record(&self, sample: PerformanceSample) -> GatewayResult<()>;

    /// Aggregated history for `model`, if any samples exist
    fn snapshot(&self, model: &ModelId) -> Option<PerformanceSnapshot>;

    /// Record a failover event
    fn record_failover(&self, _event: &FailoverEvent) -> GatewayResult<()> {
        Ok(())
    }
}

/// Optional response cache
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Look up a cached response
    async fn get(&self, key: &str) -> GatewayResult<Option<ModelResponse>>;

    /// Store a response
    async fn set(&self, key: &str, value: &ModelResponse) -> GatewayResult<()>;

    /// Liveness check used to restore cache availability
    async fn health_check(&self) -> GatewayResult<()>;
}

/// Provider-level failure tracking shared by routing and dispatch
pub trait ProviderIsolation: Send + Sync {
    /// Whether `provider` is currently usable
    fn is_provider_available(&self, provider: &ProviderId) -> bool;

    /// Record a successful call or probe
    fn mark_provider_success(&self, provider: &ProviderId);

    /// Record a failed call or probe
    fn mark_provider_failure(&self, provider: &ProviderId, reason: &str);
}

/// Isolation that never isolates; for components used standalone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIsolation;

impl ProviderIsolation for NoIsolation {
    fn is_provider_available(&self, _provider: &ProviderId) -> bool {
        true
    }

    fn mark_provider_success(&self, _provider: &ProviderId) {}

    fn mark_provider_failure(&self, _provider: &ProviderId, _reason: &str) {}
}
