//! Failover and retry behaviour

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::Behavior;
use gateway_core::{FailoverReason, GatewayError};
use gateway_resilience::DegradationMode;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_fails_over_to_next_model() {
    let harness = TestHarness::new();
    harness
        .adapter("alpha")
        .script(CHEAP, [Behavior::Fail(server_error("alpha"))]);

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();
    let response = outcome.completed().unwrap();

    assert_eq!(response.model_id.as_str(), MID);
    assert_eq!(response.attempts, 2);

    let failovers = harness.store.failovers();
    assert_eq!(failovers.len(), 1);
    assert_eq!(failovers[0].original_model.as_str(), CHEAP);
    assert_eq!(
        failovers[0].replacement_model.as_ref().map(|m| m.as_str()),
        Some(MID)
    );
    assert_eq!(failovers[0].reason, FailoverReason::ProviderError);
    assert_eq!(failovers[0].attempt, 1);

    let events = harness.gateway.degradation_events(None, None);
    assert!(events
        .iter()
        .any(|e| e.message == format!("failover from {CHEAP} to {MID} (provider_error)")));
    assert_eq!(harness.metrics.failovers("provider_error"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_over() {
    let harness = HarnessBuilder::new()
        .timeout(Duration::from_secs(2))
        .build();
    harness.adapter("alpha").set_behavior(CHEAP, Behavior::Hang);

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();

    assert_eq!(outcome.completed().unwrap().model_id.as_str(), MID);
    assert_eq!(harness.store.failovers()[0].reason, FailoverReason::Timeout);
    assert_eq!(harness.adapter("alpha").in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_model_failing_exhausts_retries() {
    let harness = TestHarness::new();
    harness.all_down();

    let err = harness
        .gateway
        .execute(chat_request("hello"))
        .await
        .unwrap_err();

    match &err {
        GatewayError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert!(matches!(
        err.root_cause(),
        GatewayError::Provider {
            status_code: Some(503),
            ..
        }
    ));
    for (provider, model) in [("alpha", CHEAP), ("beta", MID), ("gamma", PREMIUM)] {
        assert_eq!(harness.adapter(provider).calls_to(model), 1);
    }

    let failovers = harness.store.failovers();
    assert_eq!(failovers.len(), 3);
    assert!(failovers[2].replacement_model.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_limits_attempts() {
    let harness = HarnessBuilder::new().max_retries(1).build();
    harness.all_down();

    let err = harness
        .gateway
        .execute(chat_request("hello"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(harness.adapter("gamma").total_calls(), 0);
}

#[tokio::test]
async fn test_terminal_failure_is_not_retried() {
    let harness = TestHarness::new();
    harness
        .adapter("alpha")
        .set_behavior(CHEAP, Behavior::Fail(auth_error()));

    let err = harness
        .gateway
        .execute(chat_request("hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Authentication { .. }));
    assert_eq!(harness.adapter("beta").total_calls(), 0);
    assert!(harness.store.failovers().is_empty());
    assert!(harness
        .gateway
        .health_records()
        .iter()
        .all(|r| r.consecutive_failures == 0));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_isolate_provider() {
    let harness = HarnessBuilder::new()
        .models(vec![
            chat_model(CHEAP, "alpha", 0.5),
            chat_model(MID, "beta", 8.0),
        ])
        .build();
    harness
        .adapter("alpha")
        .set_behavior(CHEAP, Behavior::Fail(server_error("alpha")));

    for i in 0..3 {
        let outcome = harness
            .gateway
            .execute(chat_request(&format!("req {i}")))
            .await
            .unwrap();
        assert_eq!(outcome.completed().unwrap().model_id.as_str(), MID);
    }

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::ProviderUnavailable);
    assert_eq!(status.isolated_providers, vec![provider_id("alpha")]);

    let outcome = harness.gateway.execute(chat_request("after")).await.unwrap();
    let response = outcome.completed().unwrap();
    assert_eq!(response.model_id.as_str(), MID);
    assert_eq!(response.attempts, 1);
    assert_eq!(harness.adapter("alpha").calls_to(CHEAP), 3);
}

#[tokio::test(start_paused = true)]
async fn test_isolated_provider_restored_by_probe() {
    let harness = TestHarness::new();
    harness.adapter("alpha").set_healthy(false);
    harness.probe_model(CHEAP, 3).await;
    assert_eq!(
        harness.gateway.degradation_status().isolated_providers,
        vec![provider_id("alpha")]
    );

    harness.adapter("alpha").set_healthy(true);
    tokio::time::advance(Duration::from_secs(3)).await;
    harness.probe_model(CHEAP, 1).await;

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::Normal);
    let outcome = harness.gateway.execute(chat_request("back")).await.unwrap();
    assert_eq!(outcome.completed().unwrap().model_id.as_str(), CHEAP);
}
