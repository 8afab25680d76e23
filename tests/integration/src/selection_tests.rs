//! Model selection scenarios through the gateway

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::Behavior;
use gateway_core::{GatewayError, RateLimits};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_cheapest_matching_model_wins() {
    let harness = TestHarness::new();

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();
    let response = outcome.completed().expect("served");

    assert_eq!(response.model_id.as_str(), CHEAP);
    assert_eq!(response.provider_id.as_str(), "alpha");
    assert_eq!(response.attempts, 1);
    assert!(!response.from_cache);
    assert_eq!(harness.adapter("alpha").calls_to(CHEAP), 1);
}

#[tokio::test]
async fn test_required_capability_narrows_to_premium() {
    let harness = TestHarness::new();

    let outcome = harness
        .gateway
        .execute(code_request("write a parser"))
        .await
        .unwrap();

    assert_eq!(outcome.completed().unwrap().model_id.as_str(), PREMIUM);
    assert_eq!(harness.adapter("alpha").total_calls(), 0);
}

#[tokio::test]
async fn test_excluded_provider_is_never_called() {
    let harness = TestHarness::new();

    let outcome = harness
        .gateway
        .execute(request_avoiding("alpha", "hello"))
        .await
        .unwrap();

    assert_eq!(outcome.completed().unwrap().model_id.as_str(), MID);
    assert_eq!(harness.adapter("alpha").total_calls(), 0);
}

#[tokio::test]
async fn test_unsatisfiable_constraints_are_terminal() {
    let harness = TestHarness::new();
    let request = gateway_core::ExecuteRequest::builder()
        .require("vision")
        .prompt("describe this image")
        .build()
        .unwrap();

    let err = harness.gateway.execute(request).await.unwrap_err();

    assert!(matches!(err, GatewayError::NoMatchingModel { .. }));
    assert!(err.is_terminal());
    assert_eq!(harness.gateway.queue_len(), 0);
}

#[tokio::test]
async fn test_cost_ceiling_excludes_expensive_models() {
    let harness = TestHarness::new();
    let request = gateway_core::ExecuteRequest::builder()
        .require("chat")
        .require("code")
        .prompt("refactor this")
        .max_cost(1.0)
        .build()
        .unwrap();

    let err = harness.gateway.execute(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoMatchingModel { .. }));
}

#[tokio::test]
async fn test_unhealthy_model_is_skipped() {
    let harness = TestHarness::new();
    harness.adapter("alpha").set_healthy(false);
    harness.probe_model(CHEAP, 3).await;

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();

    assert_eq!(outcome.completed().unwrap().model_id.as_str(), MID);
    assert_eq!(harness.adapter("alpha").total_calls(), 0);
}

#[tokio::test]
async fn test_rate_limited_model_is_skipped() {
    let harness = HarnessBuilder::new()
        .models(vec![
            chat_model(CHEAP, "alpha", 0.5).with_rate_limits(RateLimits::per_minute(1, 100_000)),
            chat_model(MID, "beta", 8.0),
        ])
        .build();

    let first = harness.gateway.execute(chat_request("one")).await.unwrap();
    let second = harness.gateway.execute(chat_request("two")).await.unwrap();

    assert_eq!(first.completed().unwrap().model_id.as_str(), CHEAP);
    assert_eq!(second.completed().unwrap().model_id.as_str(), MID);
}

#[tokio::test]
async fn test_provider_throttle_blocks_model() {
    let harness = TestHarness::new();
    harness
        .adapter("alpha")
        .script(CHEAP, [Behavior::Fail(throttled(Duration::from_secs(60)))]);

    let first = harness.gateway.execute(chat_request("one")).await.unwrap();
    let second = harness.gateway.execute(chat_request("two")).await.unwrap();

    // First request failed over after the 429; the throttle keeps the model out
    assert_eq!(first.completed().unwrap().model_id.as_str(), MID);
    assert_eq!(second.completed().unwrap().model_id.as_str(), MID);
    assert_eq!(harness.adapter("alpha").calls_to(CHEAP), 1);
}

#[tokio::test]
async fn test_high_priority_request_is_served() {
    let harness = TestHarness::new();

    let outcome = harness
        .gateway
        .execute(urgent_request("page the on-call"))
        .await
        .unwrap();

    assert!(outcome.completed().is_some());
}
