//! # Gateway Telemetry
//!
//! Observability for the failover gateway.
//!
//! This crate provides:
//! - Logging and OpenTelemetry tracing initialization
//! - Prometheus metrics for requests, failovers, queueing and degradation
//! - An in-memory performance store feeding model selection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod performance;
pub mod tracing_setup;

// Re-export main types
pub use metrics::{GatewayMetrics, MetricsConfig, MetricsError, RequestOutcome};
pub use performance::{InMemoryPerformanceStore, PerformanceStoreConfig};
pub use tracing_setup::{
    build_filter, init_tracing, shutdown_tracing, LogFormat, TracingConfig, TracingError,
};
