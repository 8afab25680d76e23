//! Test fixtures and sample data for integration tests

use gateway_core::{
    ExecuteRequest, GatewayError, ModelDescriptor, ModelId, Priority, ProviderId, RateLimits,
};
use std::time::Duration;

/// Cheapest chat model, on provider `alpha`
pub const CHEAP: &str = "alpha-small";
/// Mid-priced chat model, on provider `beta`
pub const MID: &str = "beta-medium";
/// Most expensive model, on provider `gamma`; the only one tagged `code`
pub const PREMIUM: &str = "gamma-large";

/// Provider ids in the default fleet
pub const PROVIDERS: [&str; 3] = ["alpha", "beta", "gamma"];

/// Parse a model id
pub fn model_id(id: &str) -> ModelId {
    ModelId::new(id).expect("valid model id")
}

/// Parse a provider id
pub fn provider_id(id: &str) -> ProviderId {
    ProviderId::new(id).expect("valid provider id")
}

/// A chat model with generous limits
pub fn chat_model(id: &str, provider: &str, cost: f64) -> ModelDescriptor {
    ModelDescriptor::new(model_id(id), provider_id(provider))
        .with_capabilities(["chat"])
        .with_costs(cost, cost * 2.0)
        .with_rate_limits(RateLimits::per_minute(1_000, 10_000_000))
        .with_latency_ms(800)
}

/// Three models on three providers with increasing cost
pub fn fleet() -> Vec<ModelDescriptor> {
    vec![
        chat_model(CHEAP, "alpha", 0.5),
        chat_model(MID, "beta", 8.0),
        chat_model(PREMIUM, "gamma", 10.0).with_capabilities(["code"]),
    ]
}

/// A chat request with the given prompt
pub fn chat_request(prompt: &str) -> ExecuteRequest {
    ExecuteRequest::builder()
        .require("chat")
        .prompt(prompt)
        .max_tokens(128)
        .build()
        .expect("valid request")
}

/// A request requiring the `code` capability
pub fn code_request(prompt: &str) -> ExecuteRequest {
    ExecuteRequest::builder()
        .require("chat")
        .require("code")
        .prompt(prompt)
        .build()
        .expect("valid request")
}

/// A chat request that may not use `provider`
pub fn request_avoiding(provider: &str, prompt: &str) -> ExecuteRequest {
    ExecuteRequest::builder()
        .require("chat")
        .prompt(prompt)
        .exclude_provider(provider_id(provider))
        .build()
        .expect("valid request")
}

/// A high-priority chat request
pub fn urgent_request(prompt: &str) -> ExecuteRequest {
    ExecuteRequest::builder()
        .require("chat")
        .prompt(prompt)
        .priority(Priority::Critical)
        .build()
        .expect("valid request")
}

/// Retryable 503 from `provider`
pub fn server_error(provider: &str) -> GatewayError {
    GatewayError::provider(provider, "service unavailable", Some(503), true)
}

/// Terminal 401
pub fn auth_error() -> GatewayError {
    GatewayError::authentication("invalid api key")
}

/// Provider-side throttling with a retry hint
pub fn throttled(retry_after: Duration) -> GatewayError {
    GatewayError::rate_limit(Some(retry_after), Some(60))
}
