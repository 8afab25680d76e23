//! In-memory collaborators for integration testing
//!
//! - [`ScriptedAdapter`]: a transport adapter whose behaviour is set per model
//! - [`RecordingPerformanceStore`]: captures samples and failover events
//! - [`MemoryCache`]: a response cache that can be switched to failing

use async_trait::async_trait;
use gateway_core::{
    CompletionOutput, FailoverEvent, GatewayError, GatewayResult, ModelId, ModelResponse,
    PerformanceSample, PerformanceSnapshot, PerformanceStore, ProviderId, RequestPayload,
    ResponseCache, TransportAdapter, Usage,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// What a call to a model does
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Echo the last message after `latency`
    Succeed { latency: Duration },
    /// Fail with the given error
    Fail(GatewayError),
    /// Never answer within any reasonable deadline
    Hang,
}

impl Behavior {
    /// Immediate success
    pub fn ok() -> Self {
        Self::Succeed {
            latency: Duration::from_millis(10),
        }
    }

    /// Success after `latency`
    pub fn slow(latency: Duration) -> Self {
        Self::Succeed { latency }
    }
}

/// Transport adapter with scriptable per-model behaviour
pub struct ScriptedAdapter {
    provider: ProviderId,
    default: Mutex<Behavior>,
    per_model: Mutex<HashMap<String, Behavior>>,
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    healthy: AtomicBool,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAdapter {
    /// Adapter for `provider` that succeeds by default
    pub fn new(provider: &str) -> Self {
        Self {
            provider: ProviderId::new(provider).expect("valid provider id"),
            default: Mutex::new(Behavior::ok()),
            per_model: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Behaviour for every model without an override
    pub fn set_default(&self, behavior: Behavior) {
        *self.default.lock() = behavior;
    }

    /// Behaviour for one model
    pub fn set_behavior(&self, model: &str, behavior: Behavior) {
        self.per_model.lock().insert(model.to_string(), behavior);
    }

    /// One-shot behaviours consumed before the standing behaviour applies
    pub fn script(&self, model: &str, steps: impl IntoIterator<Item = Behavior>) {
        self.scripts
            .lock()
            .entry(model.to_string())
            .or_default()
            .extend(steps);
    }

    /// Make every call and probe fail with a 503
    pub fn go_down(&self) {
        self.set_healthy(false);
        self.set_default(Behavior::Fail(crate::fixtures::server_error(
            self.provider.as_str(),
        )));
        self.per_model.lock().clear();
    }

    /// Make every call and probe succeed
    pub fn come_back(&self) {
        self.set_healthy(true);
        self.set_default(Behavior::ok());
        self.per_model.lock().clear();
    }

    /// Health probe outcome
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Calls made to `model`
    pub fn calls_to(&self, model: &str) -> usize {
        self.calls.lock().get(model).copied().unwrap_or(0)
    }

    /// Calls made to any model
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Calls currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, model: &str) -> Behavior {
        if let Some(step) = self
            .scripts
            .lock()
            .get_mut(model)
            .and_then(VecDeque::pop_front)
        {
            return step;
        }
        if let Some(behavior) = self.per_model.lock().get(model) {
            return behavior.clone();
        }
        self.default.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    async fn call(
        &self,
        model: &ModelId,
        payload: &RequestPayload,
        _timeout: Duration,
    ) -> GatewayResult<CompletionOutput> {
        *self
            .calls
            .lock()
            .entry(model.as_str().to_string())
            .or_default() += 1;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        match self.next_behavior(model.as_str()) {
            Behavior::Succeed { latency } => {
                tokio::time::sleep(latency).await;
                let content = payload
                    .messages
                    .last()
                    .map(|m| format!("{model}: {}", m.content))
                    .unwrap_or_default();
                Ok(CompletionOutput::new(content, Usage::new(12, 30)))
            }
            Behavior::Fail(error) => Err(error),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(GatewayError::timeout(Duration::from_secs(24 * 3600)))
            }
        }
    }

    async fn health_check(&self, _model: &ModelId) -> GatewayResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::connection(
                self.provider.as_str(),
                "health endpoint unreachable",
            ))
        }
    }
}

/// Performance store that records everything it is given
#[derive(Default)]
pub struct RecordingPerformanceStore {
    samples: Mutex<Vec<PerformanceSample>>,
    failovers: Mutex<Vec<FailoverEvent>>,
    failing: AtomicBool,
}

impl RecordingPerformanceStore {
    /// Make every write fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Recorded samples
    pub fn samples(&self) -> Vec<PerformanceSample> {
        self.samples.lock().clone()
    }

    /// Recorded failover events
    pub fn failovers(&self) -> Vec<FailoverEvent> {
        self.failovers.lock().clone()
    }

    fn check(&self) -> GatewayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::internal("metrics backend unreachable"))
        } else {
            Ok(())
        }
    }
}

impl PerformanceStore for RecordingPerformanceStore {
    fn record(&self, sample: PerformanceSample) -> GatewayResult<()> {
        self.check()?;
        self.samples.lock().push(sample);
        Ok(())
    }

    fn snapshot(&self, _model: &ModelId) -> Option<PerformanceSnapshot> {
        None
    }

    fn record_failover(&self, event: &FailoverEvent) -> GatewayResult<()> {
        self.check()?;
        self.failovers.lock().push(event.clone());
        Ok(())
    }
}

/// Response cache backed by a map
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, ModelResponse>>,
    failing: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl MemoryCache {
    /// Make every operation fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Lookups attempted
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Stores attempted
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Cached entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check(&self) -> GatewayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::connection("cache", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> GatewayResult<Option<ModelResponse>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &ModelResponse) -> GatewayResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn health_check(&self) -> GatewayResult<()> {
        self.check()
    }
}
