//! Two-level concurrency gate.
//!
//! Every call holds one global slot and one slot on its provider's gate.
//! Slots are always taken global first. When the provider gate is full the
//! caller gives its global slot back and waits for the provider while holding
//! nothing, so a saturated provider never pins global capacity that callers
//! of other providers need.

use crate::bulkhead::{Bulkhead, BulkheadPermit, BulkheadStats};
use dashmap::DashMap;
use gateway_core::{CapacityScope, GatewayError, GatewayResult, ProviderId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Gate ceilings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    /// In-flight ceiling across all providers
    pub global_limit: usize,
    /// Ceiling for providers without an override
    pub default_provider_limit: usize,
    /// Per-provider overrides
    pub provider_limits: HashMap<ProviderId, usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_limit: 100,
            default_provider_limit: 10,
            provider_limits: HashMap::new(),
        }
    }
}

impl ConcurrencyConfig {
    /// Override the ceiling for one provider
    #[must_use]
    pub fn with_provider_limit(mut self, provider: ProviderId, limit: usize) -> Self {
        self.provider_limits.insert(provider, limit);
        self
    }
}

/// Global and per-provider bounded-admission gates
#[derive(Debug)]
pub struct ConcurrencyGate {
    config: ConcurrencyConfig,
    global: Bulkhead,
    providers: DashMap<ProviderId, Arc<Bulkhead>>,
}

impl ConcurrencyGate {
    /// Create a gate; provider gates are created on first use
    #[must_use]
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            global: Bulkhead::new(CapacityScope::Global, config.global_limit),
            providers: DashMap::new(),
            config,
        }
    }

    /// Ceiling applied to `provider`
    #[must_use]
    pub fn provider_limit(&self, provider: &ProviderId) -> usize {
        self.config
            .provider_limits
            .get(provider)
            .copied()
            .unwrap_or(self.config.default_provider_limit)
    }

    fn provider_gate(&self, provider: &ProviderId) -> Arc<Bulkhead> {
        if let Some(gate) = self.providers.get(provider) {
            return Arc::clone(gate.value());
        }
        let gate = self.providers.entry(provider.clone()).or_insert_with(|| {
            Arc::new(Bulkhead::new(
                CapacityScope::Provider(provider.to_string()),
                self.provider_limit(provider),
            ))
        });
        Arc::clone(gate.value())
    }

    /// Acquire a global and a provider slot before `deadline`
    pub async fn acquire(&self, provider: &ProviderId, deadline: Instant) -> GatewayResult<GatePermit> {
        let start = Instant::now();
        let provider_gate = self.provider_gate(provider);

        loop {
            let global = match self.global.acquire_until(deadline).await {
                Ok(permit) => permit,
                Err(e) if e.is_capacity() => {
                    return Err(GatewayError::capacity_exhausted(
                        CapacityScope::Global,
                        start.elapsed(),
                    ))
                }
                Err(e) => return Err(e),
            };

            if let Some(slot) = provider_gate.try_acquire() {
                debug!(provider = %provider, waited = ?start.elapsed(), "Concurrency slot acquired");
                return Ok(GatePermit {
                    provider_id: provider.clone(),
                    provider: Some(slot),
                    global: Some(global),
                });
            }

            drop(global);
            debug!(provider = %provider, "Provider gate full; waiting without a global slot");
            match provider_gate.wait_available(deadline).await {
                Ok(()) => {}
                Err(e) if e.is_capacity() => {
                    return Err(GatewayError::capacity_exhausted(
                        provider_gate.scope().clone(),
                        start.elapsed(),
                    ))
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `f` while holding a slot on both gates
    pub async fn with_slot<F, Fut, T>(
        &self,
        provider: &ProviderId,
        deadline: Instant,
        f: F,
    ) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let _permit = self.acquire(provider, deadline).await?;
        f().await
    }

    /// Calls in flight across all providers
    #[must_use]
    pub fn global_in_flight(&self) -> usize {
        self.global.in_flight()
    }

    /// Calls in flight on `provider`
    #[must_use]
    pub fn provider_in_flight(&self, provider: &str) -> usize {
        self.providers.get(provider).map_or(0, |gate| gate.in_flight())
    }

    /// Highest global in-flight count observed
    #[must_use]
    pub fn global_peak(&self) -> usize {
        self.global.peak_in_flight()
    }

    /// Highest in-flight count observed on `provider`
    #[must_use]
    pub fn provider_peak(&self, provider: &str) -> usize {
        self.providers
            .get(provider)
            .map_or(0, |gate| gate.peak_in_flight())
    }

    /// Live counters
    #[must_use]
    pub fn status(&self) -> ConcurrencyStatus {
        let mut providers: BTreeMap<ProviderId, BulkheadStats> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        for (provider, limit) in &self.config.provider_limits {
            providers.entry(provider.clone()).or_insert(BulkheadStats {
                active: 0,
                limit: *limit,
                available: *limit,
            });
        }
        ConcurrencyStatus {
            global: self.global.stats(),
            providers,
        }
    }
}

/// Slots on both gates; released provider first, then global
#[derive(Debug)]
pub struct GatePermit {
    provider_id: ProviderId,
    provider: Option<BulkheadPermit>,
    global: Option<BulkheadPermit>,
}

impl GatePermit {
    /// Provider this permit admits to
    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        drop(self.provider.take());
        drop(self.global.take());
    }
}

/// Active / limit / available counts per gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyStatus {
    /// Global gate
    pub global: BulkheadStats,
    /// Provider gates that have been used or configured
    pub providers: BTreeMap<ProviderId, BulkheadStats>,
}

impl ConcurrencyStatus {
    /// Counters for one provider
    #[must_use]
    pub fn provider(&self, provider: &str) -> Option<&BulkheadStats> {
        self.providers.get(provider)
    }
}
