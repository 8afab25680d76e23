//! Prometheus metrics for the gateway.
//!
//! Everything lives in a private in-memory [`Registry`]; [`GatewayMetrics::encode`]
//! renders the text exposition format for whatever surface scrapes it.

use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Metrics configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Prefix for every metric name
    pub namespace: String,
    /// Request latency histogram buckets, in seconds
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "gateway".to_string(),
            latency_buckets: vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ],
        }
    }
}

/// Metrics error
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Metric could not be created or registered
    #[error("Failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    /// Text exposition failed
    #[error("Failed to encode metrics: {0}")]
    Encode(String),
}

/// Final disposition of one `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Served by a model
    Completed,
    /// Served from the response cache
    Cached,
    /// Accepted into the degradation queue
    Queued,
    /// Returned an error to the caller
    Failed,
}

impl RequestOutcome {
    /// Label value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cached => "cached",
            Self::Queued => "queued",
            Self::Failed => "failed",
        }
    }
}

/// Gateway metrics handle; clones share the same registry
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Arc<Registry>,

    requests_total: IntCounterVec,
    request_errors_total: IntCounterVec,
    request_duration: HistogramVec,
    failovers_total: IntCounterVec,
    selection_failures_total: IntCounterVec,
    replays_total: IntCounterVec,

    queue_depth: IntGauge,
    queue_dropped_total: IntCounter,

    global_in_flight: IntGauge,
    provider_in_flight: IntGaugeVec,
    provider_available: IntGaugeVec,
    degradation_severity: Gauge,
}

impl GatewayMetrics {
    /// Create metrics with the default configuration
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_config(&MetricsConfig::default())
    }

    /// Create metrics in a fresh registry
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn with_config(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let ns = config.namespace.as_str();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Execute calls by final outcome").namespace(ns),
            &["outcome"],
        )?;
        let request_errors_total = IntCounterVec::new(
            Opts::new("request_errors_total", "Execute calls that failed, by error kind")
                .namespace(ns),
            &["kind"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Execute call duration")
                .namespace(ns)
                .buckets(config.latency_buckets.clone()),
            &["outcome"],
        )?;
        let failovers_total = IntCounterVec::new(
            Opts::new("failovers_total", "Failovers away from a model, by reason").namespace(ns),
            &["reason"],
        )?;
        let selection_failures_total = IntCounterVec::new(
            Opts::new("selection_failures_total", "Selections that found no model").namespace(ns),
            &["kind"],
        )?;
        let replays_total = IntCounterVec::new(
            Opts::new("queue_replays_total", "Queued requests finished, by result").namespace(ns),
            &["result"],
        )?;
        let queue_depth = IntGauge::with_opts(
            Opts::new("queue_depth", "Requests waiting in the degradation queue").namespace(ns),
        )?;
        let queue_dropped_total = IntCounter::with_opts(
            Opts::new(
                "queue_dropped_total",
                "Queued requests dropped after exhausting replays",
            )
            .namespace(ns),
        )?;
        let global_in_flight = IntGauge::with_opts(
            Opts::new("in_flight", "Calls holding a global concurrency slot").namespace(ns),
        )?;
        let provider_in_flight = IntGaugeVec::new(
            Opts::new("provider_in_flight", "Calls holding a provider concurrency slot")
                .namespace(ns),
            &["provider"],
        )?;
        let provider_available = IntGaugeVec::new(
            Opts::new("provider_available", "1 when the provider is not isolated").namespace(ns),
            &["provider"],
        )?;
        let degradation_severity = Gauge::with_opts(
            Opts::new(
                "degradation_severity",
                "Severity of the current degradation mode (0 is normal)",
            )
            .namespace(ns),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_errors_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(failovers_total.clone()))?;
        registry.register(Box::new(selection_failures_total.clone()))?;
        registry.register(Box::new(replays_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(queue_dropped_total.clone()))?;
        registry.register(Box::new(global_in_flight.clone()))?;
        registry.register(Box::new(provider_in_flight.clone()))?;
        registry.register(Box::new(provider_available.clone()))?;
        registry.register(Box::new(degradation_severity.clone()))?;

        info!(namespace = ns, "Gateway metrics initialized");

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_errors_total,
            request_duration,
            failovers_total,
            selection_failures_total,
            replays_total,
            queue_depth,
            queue_dropped_total,
            global_in_flight,
            provider_in_flight,
            provider_available,
            degradation_severity,
        })
    }

    /// Record one finished `execute` call
    pub fn record_request(&self, outcome: RequestOutcome, duration: Duration) {
        let label = outcome.as_str();
        self.requests_total.with_label_values(&[label]).inc();
        self.request_duration
            .with_label_values(&[label])
            .observe(duration.as_secs_f64());
    }

    /// Record the error kind of a failed call
    pub fn record_error(&self, kind: &str) {
        self.request_errors_total.with_label_values(&[kind]).inc();
    }

    /// Record a failover
    pub fn record_failover(&self, reason: &str) {
        self.failovers_total.with_label_values(&[reason]).inc();
    }

    /// Record a selection that found nothing
    pub fn record_selection_failure(&self, kind: &str) {
        self.selection_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record a finished replay
    pub fn record_replay(&self, completed: bool) {
        let result = if completed { "completed" } else { "dropped" };
        self.replays_total.with_label_values(&[result]).inc();
        if !completed {
            self.queue_dropped_total.inc();
        }
    }

    /// Set the queue depth gauge
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    /// Set the global in-flight gauge
    pub fn set_global_in_flight(&self, in_flight: usize) {
        self.global_in_flight.set(in_flight as i64);
    }

    /// Set the in-flight gauge for one provider
    pub fn set_provider_in_flight(&self, provider: &str, in_flight: usize) {
        self.provider_in_flight
            .with_label_values(&[provider])
            .set(in_flight as i64);
    }

    /// Set the availability gauge for one provider
    pub fn set_provider_available(&self, provider: &str, available: bool) {
        self.provider_available
            .with_label_values(&[provider])
            .set(i64::from(available));
    }

    /// Set the degradation severity gauge
    pub fn set_degradation_severity(&self, severity: u8) {
        self.degradation_severity.set(f64::from(severity));
    }

    /// Current count for one request outcome
    #[must_use]
    pub fn requests(&self, outcome: RequestOutcome) -> u64 {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Current failover count for one reason
    #[must_use]
    pub fn failovers(&self, reason: &str) -> u64 {
        self.failovers_total.with_label_values(&[reason]).get()
    }

    /// Current queue depth gauge
    #[must_use]
    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    /// Render all metrics in the Prometheus text format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn encode(&self) -> Result<String, MetricsError> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| MetricsError::Encode(e.to_string()))
    }
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics")
            .field("queue_depth", &self.queue_depth.get())
            .field("in_flight", &self.global_in_flight.get())
            .finish_non_exhaustive()
    }
}
