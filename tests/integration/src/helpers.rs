//! Test helper utilities for integration tests

use crate::fixtures::{fleet, model_id, PROVIDERS};
use crate::mock_providers::{MemoryCache, RecordingPerformanceStore, ScriptedAdapter};
use gateway_core::ModelDescriptor;
use gateway_resilience::{ConcurrencyConfig, DegradationConfig, FailoverConfig, QueueConfig};
use gateway_routing::HealthCheckerConfig;
use gateway_telemetry::GatewayMetrics;
use llm_failover_gateway::Gateway;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A gateway wired to in-memory collaborators
pub struct TestHarness {
    /// The gateway under test
    pub gateway: Arc<Gateway>,
    /// Adapters keyed by provider id
    pub adapters: HashMap<String, Arc<ScriptedAdapter>>,
    /// Performance store
    pub store: Arc<RecordingPerformanceStore>,
    /// Response cache, if enabled
    pub cache: Option<Arc<MemoryCache>>,
    /// Metrics handle
    pub metrics: GatewayMetrics,
}

impl TestHarness {
    /// Default fleet, no cache
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Adapter for `provider`
    pub fn adapter(&self, provider: &str) -> &ScriptedAdapter {
        self.adapters
            .get(provider)
            .unwrap_or_else(|| panic!("no adapter for provider '{provider}'"))
    }

    /// Take every provider down
    pub fn all_down(&self) {
        for adapter in self.adapters.values() {
            adapter.go_down();
        }
    }

    /// Bring every provider back
    pub fn all_up(&self) {
        for adapter in self.adapters.values() {
            adapter.come_back();
        }
    }

    /// Run `rounds` probe rounds over every registered model
    pub async fn probe_rounds(&self, rounds: usize) {
        let ids: Vec<_> = self
            .gateway
            .registry()
            .all()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        for _ in 0..rounds {
            self.gateway.health().probe_models(&ids).await;
        }
    }

    /// Probe `model` `rounds` times
    pub async fn probe_model(&self, model: &str, rounds: usize) {
        let id = model_id(model);
        for _ in 0..rounds {
            let _ = self.gateway.health().probe_model(&id).await;
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestHarness`]
pub struct HarnessBuilder {
    models: Vec<ModelDescriptor>,
    concurrency: ConcurrencyConfig,
    failover: FailoverConfig,
    degradation: DegradationConfig,
    health: HealthCheckerConfig,
    cache: bool,
}

impl HarnessBuilder {
    /// Default fleet with fast probes and the default failover policy
    pub fn new() -> Self {
        init_tracing();
        Self {
            models: fleet(),
            concurrency: ConcurrencyConfig::default(),
            failover: FailoverConfig::default(),
            degradation: DegradationConfig::default(),
            health: HealthCheckerConfig::default()
                .with_probe_interval(Duration::from_secs(1))
                .with_probe_timeout(Duration::from_millis(500)),
            cache: false,
        }
        .max_probe_backoff(Duration::from_secs(2))
    }

    /// Replace the model list
    pub fn models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    /// Concurrency limits
    pub fn concurrency(mut self, global: usize, per_provider: usize) -> Self {
        self.concurrency = ConcurrencyConfig {
            global_limit: global,
            default_provider_limit: per_provider,
            ..ConcurrencyConfig::default()
        };
        self
    }

    /// Maximum failover retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.failover.retry.max_retries = retries;
        self
    }

    /// Per-attempt deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.failover.default_timeout = timeout;
        self
    }

    /// Queue limits
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.degradation.queue = queue;
        self
    }

    /// Upper bound on probe backoff
    pub fn max_probe_backoff(mut self, backoff: Duration) -> Self {
        self.health.max_probe_backoff = backoff;
        self
    }

    /// Attach a response cache
    pub fn with_cache(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Wire the gateway
    pub fn build(self) -> TestHarness {
        let store = Arc::new(RecordingPerformanceStore::default());
        let metrics = GatewayMetrics::new().expect("metrics registry");
        let cache = self.cache.then(|| Arc::new(MemoryCache::default()));

        let mut builder = Gateway::builder()
            .models(self.models)
            .concurrency(self.concurrency)
            .failover(self.failover)
            .degradation(self.degradation)
            .health(self.health)
            .performance_store(store.clone())
            .metrics(metrics.clone());

        let mut adapters = HashMap::new();
        for provider in PROVIDERS {
            let adapter = Arc::new(ScriptedAdapter::new(provider));
            builder = builder.adapter(adapter.clone());
            adapters.insert(provider.to_string(), adapter);
        }
        if let Some(cache) = &cache {
            builder = builder.cache(cache.clone());
        }

        TestHarness {
            gateway: Arc::new(builder.build().expect("gateway builds")),
            adapters,
            store,
            cache,
            metrics,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` every 10ms until it holds or `within` elapses
pub async fn eventually<F, Fut>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
