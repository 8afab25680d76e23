//! In-memory performance store.
//!
//! Keeps a sliding window of the most recent call outcomes per model and a
//! bounded log of failover events. Suitable for single-process deployments
//! and tests; history does not survive a restart.

use dashmap::DashMap;
use gateway_core::{
    FailoverEvent, GatewayResult, ModelId, PerformanceSample, PerformanceSnapshot,
    PerformanceStore,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Store limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceStoreConfig {
    /// Samples kept per model
    pub window: usize,
    /// Failover events kept
    pub max_failovers: usize,
}

impl Default for PerformanceStoreConfig {
    fn default() -> Self {
        Self {
            window: 100,
            max_failovers: 1000,
        }
    }
}

/// Sliding-window performance history
#[derive(Debug, Default)]
pub struct InMemoryPerformanceStore {
    config: PerformanceStoreConfig,
    samples: DashMap<ModelId, Mutex<VecDeque<PerformanceSample>>>,
    failovers: Mutex<VecDeque<FailoverEvent>>,
}

impl InMemoryPerformanceStore {
    /// Create a store with default limits
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PerformanceStoreConfig::default())
    }

    /// Create a store with the given limits
    #[must_use]
    pub fn with_config(config: PerformanceStoreConfig) -> Self {
        Self {
            config: PerformanceStoreConfig {
                window: config.window.max(1),
                max_failovers: config.max_failovers.max(1),
            },
            samples: DashMap::new(),
            failovers: Mutex::new(VecDeque::new()),
        }
    }

    /// Recorded failover events, oldest first
    #[must_use]
    pub fn failovers(&self) -> Vec<FailoverEvent> {
        self.failovers.lock().iter().cloned().collect()
    }

    /// Number of samples held for `model`
    #[must_use]
    pub fn sample_count(&self, model: &str) -> usize {
        self.samples.get(model).map_or(0, |window| window.lock().len())
    }

    /// Forget all history
    pub fn clear(&self) {
        self.samples.clear();
        self.failovers.lock().clear();
    }
}

impl PerformanceStore for InMemoryPerformanceStore {
    fn record(&self, sample: PerformanceSample) -> GatewayResult<()> {
        let entry = self
            .samples
            .entry(sample.model_id.clone())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.config.window)));
        let mut window = entry.lock();
        if window.len() == self.config.window {
            window.pop_front();
        }
        window.push_back(sample);
        Ok(())
    }

    fn snapshot(&self, model: &ModelId) -> Option<PerformanceSnapshot> {
        let entry = self.samples.get(model)?;
        let window = entry.lock();
        if window.is_empty() {
            return None;
        }

        let count = window.len() as f64;
        let successes = window.iter().filter(|s| s.success).count() as f64;
        let total_ms: f64 = window
            .iter()
            .map(|s| s.latency.as_secs_f64() * 1000.0)
            .sum();

        Some(PerformanceSnapshot {
            success_rate: successes / count,
            average_latency_ms: total_ms / count,
            samples: window.len() as u64,
        })
    }

    fn record_failover(&self, event: &FailoverEvent) -> GatewayResult<()> {
        let mut log = self.failovers.lock();
        if log.len() == self.config.max_failovers {
            log.pop_front();
        }
        log.push_back(event.clone());
        Ok(())
    }
}
