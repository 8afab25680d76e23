//! # Gateway Core
//!
//! Core types, traits, and error handling for the failover gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Validated identifiers (newtypes)
//! - Model descriptors owned by the registry
//! - Request and response types
//! - Collaborator traits (transport adapters, performance store, cache)
//! - The error taxonomy shared by every component

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod model;
pub mod provider;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types
pub use error::{CapacityScope, GatewayError, GatewayResult};
pub use model::{ModelDescriptor, RateLimits};
pub use provider::{
    AdapterRegistry, NoIsolation, PerformanceSample, PerformanceSnapshot, PerformanceStore,
    ProviderIsolation, ResponseCache, TransportAdapter,
};
pub use request::{
    CapabilityRequirements, ChatMessage, ExecuteRequest, MessageRole, Priority,
    RequestConstraints, RequestPayload, SelectionRequest,
};
pub use response::{
    CompletionOutput, ExecuteOutcome, FailoverEvent, FailoverReason, ModelResponse, QueuedAck,
    Usage,
};
pub use types::{ModelId, ProviderId, QueueTicket, RequestId};
