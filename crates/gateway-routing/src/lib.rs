//! # Gateway Routing
//!
//! Model routing for the failover gateway.
//!
//! This crate provides:
//! - The read-only model registry
//! - Per-model health checking with probe backoff
//! - Fixed-window rate limiting with admission-time reservations
//! - Pure weighted scoring and the model selector built on it

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod health;
pub mod rate_limiter;
pub mod registry;
pub mod scoring;
pub mod selector;
pub mod task;

// Re-export main types
pub use health::{HealthChecker, HealthCheckerConfig, HealthRecord, HealthState};
pub use rate_limiter::{RateLimitStatus, RateLimiter, RateLimiterConfig};
pub use registry::ModelRegistry;
pub use scoring::{score_candidates, Candidate, ScoreBreakdown, ScoringContext, ScoringWeights};
pub use selector::{Alternative, ModelSelector, Selection, SelectorConfig};
pub use task::{BackgroundTask, ShutdownSignal};
