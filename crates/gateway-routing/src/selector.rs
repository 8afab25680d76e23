//! Model selection.
//!
//! Selection runs in stages:
//! 1. static filters: enabled flag, required capabilities, cost ceiling,
//!    excluded providers and models, latency bound;
//! 2. dynamic filters: model health, rate windows, provider isolation;
//! 3. scoring and ranking (see [`crate::scoring`]).
//!
//! An empty set after stage 1 is a terminal `NoMatchingModel`: nothing in the
//! registry could ever serve the request. An empty set after stage 2 is
//! `NoViableModel`: matching models exist but none is usable right now, which
//! is what triggers the degradation queue.

use crate::health::HealthChecker;
use crate::rate_limiter::RateLimiter;
use crate::registry::ModelRegistry;
use crate::scoring::{score_candidates, Candidate, ScoreBreakdown, ScoringContext};
use gateway_core::{
    GatewayError, GatewayResult, ModelDescriptor, ModelId, PerformanceStore, Priority,
    ProviderId, ProviderIsolation, SelectionRequest,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Selector configuration
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Runner-ups attached to each selection
    pub max_alternatives: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_alternatives: 3,
        }
    }
}

/// A runner-up candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alternative {
    /// Model
    pub model_id: ModelId,
    /// Provider
    pub provider_id: ProviderId,
    /// Suitability score
    pub score: f64,
}

/// The chosen model and its ranking context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    /// Chosen model
    pub model_id: ModelId,
    /// Its provider
    pub provider_id: ProviderId,
    /// Suitability score
    pub score: f64,
    /// Component scores
    pub breakdown: ScoreBreakdown,
    /// Human readable justification
    pub reason: String,
    /// Next-best candidates in rank order
    pub alternatives: Vec<Alternative>,
}

/// Ranks registry models for a request
pub struct ModelSelector {
    config: SelectorConfig,
    registry: Arc<ModelRegistry>,
    health: Arc<HealthChecker>,
    rate_limiter: Arc<RateLimiter>,
    isolation: Arc<dyn ProviderIsolation>,
    performance: Option<Arc<dyn PerformanceStore>>,
}

impl ModelSelector {
    /// Create a selector
    #[must_use]
    pub fn new(
        config: SelectorConfig,
        registry: Arc<ModelRegistry>,
        health: Arc<HealthChecker>,
        rate_limiter: Arc<RateLimiter>,
        isolation: Arc<dyn ProviderIsolation>,
    ) -> Self {
        Self {
            config,
            registry,
            health,
            rate_limiter,
            isolation,
            performance: None,
        }
    }

    /// Use a performance store for historical scoring
    #[must_use]
    pub fn with_performance_store(mut self, store: Arc<dyn PerformanceStore>) -> Self {
        self.performance = Some(store);
        self
    }

    /// Registry used by this selector
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn static_candidates(&self, request: &SelectionRequest) -> GatewayResult<Vec<&ModelDescriptor>> {
        let mut pool: Vec<&ModelDescriptor> = self.registry.enabled().collect();
        if pool.is_empty() {
            return Err(GatewayError::no_matching_model("no enabled models registered"));
        }

        narrow(&mut pool, "required capabilities", |m| {
            m.supports_all(&request.required)
        })?;
        narrow(&mut pool, "cost ceiling", |m| {
            request.max_cost.map_or(true, |max| m.average_cost() <= max)
        })?;
        narrow(&mut pool, "excluded providers", |m| {
            !request.excluded_providers.contains(&m.provider)
        })?;
        narrow(&mut pool, "excluded models", |m| {
            !request.excluded_models.contains(&m.id)
        })?;
        narrow(&mut pool, "latency bound", |m| {
            request
                .max_latency_ms
                .map_or(true, |bound| m.average_latency_ms <= bound)
        })?;
        Ok(pool)
    }

    /// Select the best model for `request`
    ///
    /// # Errors
    /// `NoMatchingModel` when static constraints exclude every model,
    /// `NoViableModel` when every matching model is unhealthy, rate limited or
    /// on an isolated provider
    pub fn select(&self, request: &SelectionRequest) -> GatewayResult<Selection> {
        let matching = self.static_candidates(request)?;

        let mut unhealthy = 0usize;
        let mut limited = 0usize;
        let mut isolated = 0usize;
        let mut candidates = Vec::with_capacity(matching.len());
        for &model in &matching {
            if !self.isolation.is_provider_available(&model.provider) {
                isolated += 1;
                continue;
            }
            let record = self.health.record(model.id.as_str());
            if record.as_ref().is_some_and(|r| !r.is_available()) {
                unhealthy += 1;
                continue;
            }
            if self
                .rate_limiter
                .would_exceed(&model.id, request.estimated_units)
            {
                self.rate_limiter.record_rejection(&model.id);
                limited += 1;
                continue;
            }

            let mut candidate = Candidate::fresh(model);
            if let Some(record) = record {
                candidate.health = record.state;
                candidate.stale = record.stale;
                candidate.consecutive_failures = record.consecutive_failures;
            }
            candidate.performance = self
                .performance
                .as_ref()
                .and_then(|store| store.snapshot(&model.id));
            candidates.push(candidate);
        }

        if candidates.is_empty() {
            let ids: Vec<ModelId> = matching.iter().map(|m| m.id.clone()).collect();
            return Err(GatewayError::no_viable_model(
                format!(
                    "{} matching models: {unhealthy} unhealthy, {limited} rate limited, {isolated} on isolated providers",
                    ids.len()
                ),
                ids,
            ));
        }

        let ctx = ScoringContext {
            preferred: &request.preferred,
            priority: request.priority,
            max_latency_ms: request.max_latency_ms,
            boosts: &request.boosts,
            failure_threshold: self.health.config().failure_threshold,
        };
        let ranked = score_candidates(&candidates, &ctx);
        let Some((best, rest)) = ranked.split_first() else {
            return Err(GatewayError::internal("scoring returned no candidates"));
        };

        let mut reason = String::new();
        if request.required.is_empty() {
            reason.push_str("no required capabilities");
        } else {
            let tags: Vec<&str> = request.required.iter().map(String::as_str).collect();
            let _ = write!(reason, "matches required [{}]", tags.join(", "));
        }
        if !request.preferred.is_empty() {
            let _ = write!(
                reason,
                "; {}/{} preferred",
                best.matched_preferred,
                request.preferred.len()
            );
        }
        match request.priority {
            Priority::Critical | Priority::High => {
                reason.push_str("; favours performance for high-priority request");
            }
            Priority::Background => reason.push_str("; favours cost for background request"),
            Priority::Normal | Priority::Low => {}
        }
        let _ = write!(reason, "; score {:.3}", best.breakdown.total);

        let alternatives: Vec<Alternative> = rest
            .iter()
            .take(self.config.max_alternatives)
            .map(|c| Alternative {
                model_id: c.model.id.clone(),
                provider_id: c.model.provider.clone(),
                score: c.breakdown.total,
            })
            .collect();

        debug!(
            model = %best.model.id,
            provider = %best.model.provider,
            score = best.breakdown.total,
            candidates = ranked.len(),
            excluded = request.excluded_models.len(),
            "Model selected"
        );

        Ok(Selection {
            model_id: best.model.id.clone(),
            provider_id: best.model.provider.clone(),
            score: best.breakdown.total,
            breakdown: best.breakdown,
            reason,
            alternatives,
        })
    }
}

fn narrow(
    pool: &mut Vec<&ModelDescriptor>,
    stage: &str,
    keep: impl Fn(&ModelDescriptor) -> bool,
) -> GatewayResult<()> {
    pool.retain(|m| keep(m));
    if pool.is_empty() {
        return Err(GatewayError::no_matching_model(format!(
            "no model left after applying {stage}"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSelector")
            .field("config", &self.config)
            .field("models", &self.registry.len())
            .field("performance_store", &self.performance.is_some())
            .finish()
    }
}
