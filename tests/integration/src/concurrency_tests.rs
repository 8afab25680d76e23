//! Concurrency gate behaviour under load

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::Behavior;
use futures::future::join_all;
use gateway_core::{CapacityScope, ExecuteRequest, GatewayError, RateLimits};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_provider_limit_serializes_calls() {
    let harness = HarnessBuilder::new().concurrency(10, 1).build();
    harness
        .adapter("alpha")
        .set_default(Behavior::slow(Duration::from_secs(1)));

    let calls = (0..3).map(|i| {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { gateway.execute(chat_request(&format!("req {i}"))).await })
    });
    let results = join_all(calls).await;

    for result in results {
        let outcome = result.expect("task completes").expect("request served");
        assert_eq!(outcome.completed().unwrap().model_id.as_str(), CHEAP);
    }
    assert_eq!(harness.adapter("alpha").calls_to(CHEAP), 3);
    assert_eq!(harness.adapter("alpha").peak_in_flight(), 1);
    assert_eq!(harness.gateway.concurrency_status().global.active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_global_limit_caps_total_in_flight() {
    let harness = HarnessBuilder::new().concurrency(2, 10).build();
    for provider in PROVIDERS {
        harness
            .adapter(provider)
            .set_default(Behavior::slow(Duration::from_millis(500)));
    }

    let calls = (0..4).map(|i| {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { gateway.execute(chat_request(&format!("req {i}"))).await })
    });
    let results = join_all(calls).await;

    assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
    assert_eq!(harness.adapter("alpha").peak_in_flight(), 2);
    assert_eq!(harness.gateway.concurrency_status().global.active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_provider_does_not_block_others() {
    let harness = HarnessBuilder::new().concurrency(2, 1).build();
    harness
        .adapter("alpha")
        .set_default(Behavior::slow(Duration::from_secs(10)));

    let busy: Vec<_> = (0..2)
        .map(|i| {
            let gateway = harness.gateway.clone();
            tokio::spawn(async move { gateway.execute(chat_request(&format!("slow {i}"))).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = harness.gateway.concurrency_status();
    assert_eq!(status.provider("alpha").map(|s| s.active), Some(1));
    assert_eq!(status.global.active, 1);

    let started = Instant::now();
    let outcome = harness
        .gateway
        .execute(request_avoiding("alpha", "fast"))
        .await
        .unwrap();
    assert_eq!(outcome.completed().unwrap().model_id.as_str(), MID);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(harness.adapter("alpha").in_flight(), 1);

    for task in busy {
        assert!(task.await.unwrap().is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_gate_timeout_is_capacity_error_not_provider_failure() {
    let harness = HarnessBuilder::new().concurrency(1, 1).build();
    harness
        .adapter("alpha")
        .set_default(Behavior::slow(Duration::from_secs(5)));

    let gateway = harness.gateway.clone();
    let holder = tokio::spawn(async move { gateway.execute(chat_request("holder")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let impatient = ExecuteRequest::builder()
        .require("chat")
        .prompt("impatient")
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let err = harness.gateway.execute(impatient).await.unwrap_err();

    match err {
        GatewayError::CapacityExhausted { scope, waited } => {
            assert_eq!(scope, CapacityScope::Global);
            assert!(waited >= Duration::from_secs(1));
        }
        other => panic!("expected capacity error, got {other:?}"),
    }

    let alpha = harness
        .gateway
        .provider_health()
        .into_iter()
        .find(|p| p.provider_id.as_str() == "alpha")
        .unwrap();
    assert_eq!(alpha.consecutive_failures, 0);
    assert!(holder.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_releases_slots_and_counts_as_failure() {
    let harness = HarnessBuilder::new().concurrency(1, 1).build();
    harness
        .adapter("alpha")
        .set_default(Behavior::slow(Duration::from_secs(60)));

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), harness.gateway.execute(chat_request("x")))
            .await;
    assert!(abandoned.is_err());

    let status = harness.gateway.concurrency_status();
    assert_eq!(status.global.active, 0);
    assert_eq!(status.provider("alpha").map(|s| s.active), Some(0));
    assert_eq!(harness.adapter("alpha").in_flight(), 0);

    let record = harness
        .gateway
        .health_records()
        .into_iter()
        .find(|r| r.model_id.as_str() == CHEAP)
        .unwrap();
    assert_eq!(record.consecutive_failures, 1);

    harness.adapter("alpha").set_default(Behavior::ok());
    assert!(harness.gateway.execute(chat_request("y")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_burst_respects_rate_window() {
    let harness = HarnessBuilder::new()
        .models(vec![
            chat_model(CHEAP, "alpha", 0.5).with_rate_limits(RateLimits::per_minute(1, 100_000))
        ])
        .build();
    harness
        .adapter("alpha")
        .set_default(Behavior::slow(Duration::from_millis(300)));

    let calls = (0..5).map(|i| harness.gateway.execute(chat_request(&format!("burst {i}"))));
    let results = join_all(calls).await;

    let completed = results
        .iter()
        .filter(|r| matches!(r, Ok(outcome) if outcome.completed().is_some()))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(harness.adapter("alpha").calls_to(CHEAP), 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Ok(outcome) if outcome.completed().is_some() || outcome.is_queued())));

    let window = harness
        .gateway
        .rate_limit_status()
        .into_iter()
        .find(|s| s.model_id.as_str() == CHEAP)
        .unwrap();
    assert_eq!(window.requests_used, 1);
    assert_eq!(window.remaining_requests, 0);
}
