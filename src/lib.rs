//! # LLM Failover Gateway
//!
//! A resilient client gateway in front of several interchangeable model
//! providers. For every request it:
//!
//! - selects the best viable model by capability, cost, history and health
//! - admits the call through a global and a per-provider concurrency gate
//! - fails over to the next-best model on retryable failures
//! - queues the request for replay when no model is viable at all
//!
//! ```no_run
//! use llm_failover_gateway::gateway_config::GatewayConfig;
//! use llm_failover_gateway::gateway_core::{AdapterRegistry, ExecuteRequest, GatewayError};
//! use llm_failover_gateway::Gateway;
//!
//! # async fn example(config: GatewayConfig, adapters: AdapterRegistry) -> Result<(), GatewayError> {
//! let gateway = Gateway::from_config(&config, adapters)?;
//! gateway.start();
//!
//! let request = ExecuteRequest::builder()
//!     .require("chat")
//!     .prompt("Summarize the incident report")
//!     .build()?;
//! let outcome = gateway.execute(request).await?;
//! if let Some(ack) = outcome.queued() {
//!     println!("queued as {}", ack.ticket);
//! }
//!
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gateway;

pub use gateway::{cache_key, Gateway, GatewayBuilder};

pub use gateway_config;
pub use gateway_core;
pub use gateway_resilience;
pub use gateway_routing;
pub use gateway_telemetry;
