//! Pure suitability scoring.
//!
//! Scoring is a free function over a snapshot of candidates, so it can be
//! tested without live health or rate state. Each component score lies in
//! `[0, 1]`; the weighted sum is then adjusted for latency bounds and caller
//! boosts.

use crate::health::HealthState;
use gateway_core::{ModelDescriptor, ModelId, PerformanceSnapshot, Priority};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Score used when a model has no performance history
pub const NEUTRAL_PERFORMANCE: f64 = 0.7;

/// Bonus scale for models under a hard latency bound
pub const LATENCY_BOUND_BONUS: f64 = 0.05;

/// Component weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoringWeights {
    /// Capability match
    pub capability: f64,
    /// Normalized cost, cheaper is better
    pub cost: f64,
    /// Historical performance
    pub performance: f64,
    /// Availability and freshness
    pub availability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            capability: 0.30,
            cost: 0.25,
            performance: 0.25,
            availability: 0.20,
        }
    }
}

impl ScoringWeights {
    /// Weights shifted for a priority class
    #[must_use]
    pub fn for_priority(priority: Priority) -> Self {
        let base = Self::default();
        match priority {
            Priority::Critical | Priority::High => Self {
                cost: 0.15,
                performance: 0.35,
                ..base
            },
            Priority::Background => Self {
                cost: 0.35,
                performance: 0.15,
                ..base
            },
            Priority::Normal | Priority::Low => base,
        }
    }
}

/// A model that survived filtering, with the dynamic state needed to score it
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    /// Model
    pub model: &'a ModelDescriptor,
    /// Health state
    pub health: HealthState,
    /// Last health outcome is stale
    pub stale: bool,
    /// Current failure streak
    pub consecutive_failures: u32,
    /// Performance history, if any
    pub performance: Option<PerformanceSnapshot>,
}

impl<'a> Candidate<'a> {
    /// Candidate with no recorded health or history
    #[must_use]
    pub fn fresh(model: &'a ModelDescriptor) -> Self {
        Self {
            model,
            health: HealthState::Unknown,
            stale: false,
            consecutive_failures: 0,
            performance: None,
        }
    }
}

/// Request-dependent scoring inputs
#[derive(Debug, Clone)]
pub struct ScoringContext<'a> {
    /// Preferred capability tags
    pub preferred: &'a BTreeSet<String>,
    /// Priority class
    pub priority: Priority,
    /// Hard latency bound, already applied as a filter
    pub max_latency_ms: Option<u64>,
    /// Additive bonuses per model
    pub boosts: &'a BTreeMap<ModelId, f64>,
    /// Health failure threshold, for the freshness penalty
    pub failure_threshold: u32,
}

/// Per-component scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Capability component
    pub capability: f64,
    /// Cost component
    pub cost: f64,
    /// Performance component
    pub performance: f64,
    /// Availability component
    pub availability: f64,
    /// Latency bound and boost adjustments
    pub adjustment: f64,
    /// Final score
    pub total: f64,
}

/// A scored candidate
#[derive(Debug, Clone)]
pub struct ScoredCandidate<'a> {
    /// Model
    pub model: &'a ModelDescriptor,
    /// Score components
    pub breakdown: ScoreBreakdown,
    /// Preferred tags the model offers
    pub matched_preferred: usize,
}

/// Capability component: 1.0 without preferences, else 0.5 plus half the
/// matched fraction
#[must_use]
pub fn capability_score(model: &ModelDescriptor, preferred: &BTreeSet<String>) -> (f64, usize) {
    if preferred.is_empty() {
        return (1.0, 0);
    }
    let matched = preferred
        .iter()
        .filter(|tag| model.capabilities.contains(*tag))
        .count();
    (0.5 + 0.5 * matched as f64 / preferred.len() as f64, matched)
}

/// Cost component: min-max normalized inverse of average cost
#[must_use]
pub fn cost_score(cost: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return 1.0;
    }
    ((max - cost) / (max - min)).clamp(0.0, 1.0)
}

/// Performance component: success rate discounted by latency in seconds
#[must_use]
pub fn performance_score(snapshot: Option<&PerformanceSnapshot>) -> f64 {
    match snapshot {
        Some(s) if s.samples > 0 => {
            (s.success_rate.clamp(0.0, 1.0) / (1.0 + s.average_latency_ms.max(0.0) / 1000.0))
                .clamp(0.0, 1.0)
        }
        _ => NEUTRAL_PERFORMANCE,
    }
}

/// Availability component from health state, staleness and failure streak
#[must_use]
pub fn availability_score(
    health: HealthState,
    stale: bool,
    consecutive_failures: u32,
    failure_threshold: u32,
) -> f64 {
    let base = match health {
        HealthState::Healthy if stale => 0.7,
        HealthState::Healthy => 1.0,
        HealthState::Unknown => 0.8,
        HealthState::Unhealthy => return 0.0,
    };
    let threshold = f64::from(failure_threshold.max(1));
    let penalty = 0.3 * (f64::from(consecutive_failures) / threshold).min(1.0);
    (base - penalty).max(0.0)
}

/// Score and rank candidates, best first
///
/// Ties are broken by lower average cost, then lower latency estimate, then id.
#[must_use]
pub fn score_candidates<'a>(
    candidates: &[Candidate<'a>],
    ctx: &ScoringContext<'_>,
) -> Vec<ScoredCandidate<'a>> {
    let weights = ScoringWeights::for_priority(ctx.priority);
    let (min_cost, max_cost) = candidates
        .iter()
        .map(|c| c.model.average_cost())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c), hi.max(c))
        });

    let mut scored: Vec<ScoredCandidate<'a>> = candidates
        .iter()
        .map(|c| {
            let (capability, matched_preferred) = capability_score(c.model, ctx.preferred);
            let cost = cost_score(c.model.average_cost(), min_cost, max_cost);
            let performance = performance_score(c.performance.as_ref());
            let availability = availability_score(
                c.health,
                c.stale,
                c.consecutive_failures,
                ctx.failure_threshold,
            );

            let mut adjustment = 0.0;
            if let Some(bound) = ctx.max_latency_ms.filter(|b| *b > 0) {
                let ratio = (c.model.average_latency_ms as f64 / bound as f64).min(1.0);
                adjustment += LATENCY_BOUND_BONUS * (1.0 - ratio);
            }
            if let Some(boost) = ctx.boosts.get(&c.model.id) {
                adjustment += boost;
            }

            let total = weights.capability * capability
                + weights.cost * cost
                + weights.performance * performance
                + weights.availability * availability
                + adjustment;

            ScoredCandidate {
                model: c.model,
                breakdown: ScoreBreakdown {
                    capability,
                    cost,
                    performance,
                    availability,
                    adjustment,
                    total,
                },
                matched_preferred,
            }
        })
        .collect();

    scored.sort_by(rank);
    scored
}

fn rank(a: &ScoredCandidate<'_>, b: &ScoredCandidate<'_>) -> Ordering {
    b.breakdown
        .total
        .total_cmp(&a.breakdown.total)
        .then_with(|| a.model.average_cost().total_cmp(&b.model.average_cost()))
        .then_with(|| a.model.average_latency_ms.cmp(&b.model.average_latency_ms))
        .then_with(|| a.model.id.cmp(&b.model.id))
}
