//! # Gateway Resilience
//!
//! Resilience patterns for the failover gateway.
//!
//! This crate provides:
//! - Bulkheads and the two-level (global, per-provider) concurrency gate
//! - Retry policy with exponential backoff and jitter
//! - The dispatcher that calls transport adapters and reports outcomes
//! - The failover coordinator
//! - Provider isolation, the degradation queue and the degradation manager

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bulkhead;
pub mod concurrency;
pub mod degradation;
pub mod dispatcher;
pub mod failover;
pub mod provider_state;
pub mod queue;
pub mod retry;

// Re-export main types
pub use bulkhead::{Bulkhead, BulkheadPermit, BulkheadStats};
pub use concurrency::{ConcurrencyConfig, ConcurrencyGate, ConcurrencyStatus, GatePermit};
pub use degradation::{
    DegradationConfig, DegradationEvent, DegradationManager, DegradationMode, DegradationStatus,
    DrainReport, QueueReplayer, Subsystem,
};
pub use dispatcher::{Dispatched, Dispatcher};
pub use failover::{FailoverConfig, FailoverCoordinator, FailoverHook};
pub use provider_state::{ProviderHealth, ProviderState, ProviderStateConfig, Transition};
pub use queue::{
    QueueConfig, QueuedRequest, ReplayOutcome, ReplayResult, RequestQueue, RequeueOutcome,
};
pub use retry::{RetryConfig, RetryPolicy};
