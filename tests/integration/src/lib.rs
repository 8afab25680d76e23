//! Integration tests for the LLM Failover Gateway
//!
//! Scenario tests run the real components against in-memory collaborators:
//! - Model selection across a three-provider fleet
//! - Concurrency gating under load
//! - Failover and retry exhaustion
//! - Provider isolation, caching and monitoring outages, queued replay
//! - End-to-end request flows through the `Gateway` facade

pub mod fixtures;
pub mod helpers;
pub mod mock_providers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod concurrency_tests;
#[cfg(test)]
mod degradation_tests;
#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod failover_tests;
#[cfg(test)]
mod selection_tests;
