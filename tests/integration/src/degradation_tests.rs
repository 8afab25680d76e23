//! Degradation: provider outages, queueing, cache and monitoring fallbacks

use crate::fixtures::*;
use crate::helpers::*;
use chrono::Utc;
use gateway_core::{GatewayError, RateLimits};
use gateway_resilience::{DegradationMode, QueueConfig};
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn test_request_is_queued_when_every_provider_is_isolated() {
    let harness = TestHarness::new();
    harness.all_down();
    harness.probe_rounds(3).await;

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();
    let ack = outcome.queued().expect("queued");

    assert_eq!(ack.position, 1);
    assert!(ack.target_model.is_some());
    assert_eq!(harness.gateway.queue_len(), 1);

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::TotalUnavailability);
    assert_eq!(status.isolated_providers.len(), 3);
    assert_eq!(status.queue_len, 1);
    for provider in PROVIDERS {
        assert_eq!(harness.adapter(provider).total_calls(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_rejects_request() {
    let harness = HarnessBuilder::new()
        .queue(QueueConfig {
            max_size: 1,
            ..QueueConfig::default()
        })
        .build();
    harness.all_down();
    harness.probe_rounds(3).await;

    let first = harness.gateway.execute(chat_request("one")).await.unwrap();
    assert!(first.is_queued());

    let err = harness
        .gateway
        .execute(chat_request("two"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::QueueFull { capacity: 1 }));
    assert_eq!(harness.gateway.queue_len(), 1);
}

#[tokio::test]
async fn test_cache_hit_skips_dispatch() {
    let harness = HarnessBuilder::new().with_cache().build();
    let cache = harness.cache.clone().unwrap();

    let first = harness.gateway.execute(chat_request("same")).await.unwrap();
    let second = harness.gateway.execute(chat_request("same")).await.unwrap();

    let first = first.completed().unwrap();
    let second = second.completed().unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.content, first.content);
    assert_ne!(second.request_id, first.request_id);
    assert_eq!(harness.adapter("alpha").calls_to(CHEAP), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_dispatch() {
    let harness = HarnessBuilder::new().with_cache().build();
    let cache = harness.cache.clone().unwrap();
    cache.set_failing(true);

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();
    assert_eq!(outcome.completed().unwrap().model_id.as_str(), CHEAP);

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::CacheUnavailable);
    assert!(!status.cache_available);
    // The store after dispatch is skipped once the cache is marked down
    assert_eq!(cache.gets(), 1);
    assert_eq!(cache.sets(), 0);

    // Bypassed entirely while unavailable
    harness.gateway.execute(chat_request("again")).await.unwrap();
    assert_eq!(cache.gets(), 1);

    assert!(!harness.gateway.probe_cache().await);
    cache.set_failing(false);
    assert!(harness.gateway.probe_cache().await);
    assert_eq!(harness.gateway.degradation_status().mode, DegradationMode::Normal);

    harness.gateway.execute(chat_request("restored")).await.unwrap();
    assert_eq!(cache.gets(), 2);
    assert_eq!(cache.sets(), 1);
}

#[tokio::test]
async fn test_monitoring_outage_does_not_fail_requests() {
    let harness = TestHarness::new();
    harness.store.set_failing(true);

    let first = harness.gateway.execute(chat_request("one")).await.unwrap();
    assert!(first.completed().is_some());

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::MonitoringUnavailable);
    assert!(!status.monitoring_available);

    harness.store.set_failing(false);
    let second = harness.gateway.execute(chat_request("two")).await.unwrap();
    assert!(second.completed().is_some());
    // Samples stay off until monitoring is marked available again
    assert!(harness.store.samples().is_empty());
}

#[tokio::test]
async fn test_isolation_and_restore_are_logged() {
    let harness = TestHarness::new();
    let before = Utc::now();

    harness.adapter("beta").set_healthy(false);
    harness.probe_model(MID, 3).await;
    harness.adapter("beta").set_healthy(true);
    harness.probe_model(MID, 1).await;

    let events = harness.gateway.degradation_events(Some(before), None);
    let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("provider beta isolated"));
    assert_eq!(messages[1], "provider beta restored");
    assert_eq!(events[0].mode, DegradationMode::ProviderUnavailable);
    assert_eq!(events[1].mode, DegradationMode::Normal);
    assert_eq!(events[0].affected_components, vec!["beta".to_string()]);

    let latest = harness.gateway.degradation_events(None, Some(1));
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].message, "provider beta restored");

    let future = Utc::now() + chrono::Duration::seconds(60);
    assert!(harness
        .gateway
        .degradation_events(Some(future), None)
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_outage_keeps_serving() {
    let harness = TestHarness::new();
    for provider in ["alpha", "beta"] {
        harness.adapter(provider).set_healthy(false);
    }
    harness.probe_model(CHEAP, 3).await;
    harness.probe_model(MID, 3).await;

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::PartialProviderUnavailable);

    let outcome = harness.gateway.execute(chat_request("hello")).await.unwrap();
    assert_eq!(outcome.completed().unwrap().model_id.as_str(), PREMIUM);
    assert_eq!(harness.gateway.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capability_outage_queues_without_total_outage() {
    let harness = TestHarness::new();
    harness.adapter("gamma").set_healthy(false);
    harness.probe_model(PREMIUM, 3).await;

    // Only gamma serves `code`
    let outcome = harness.gateway.execute(code_request("refactor")).await.unwrap();
    assert!(outcome.is_queued());

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::ProviderUnavailable);
    assert_eq!(status.isolated_providers.len(), 1);
    assert_eq!(status.queue_len, 1);

    let chat = harness.gateway.execute(chat_request("still here")).await.unwrap();
    assert_eq!(chat.completed().unwrap().model_id.as_str(), CHEAP);
    assert_eq!(
        harness.gateway.degradation_status().mode,
        DegradationMode::ProviderUnavailable
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_model_rate_limited_is_total_outage() {
    let harness = HarnessBuilder::new()
        .models(vec![
            chat_model(CHEAP, "alpha", 0.5).with_rate_limits(RateLimits::per_minute(1, 100_000)),
            chat_model(MID, "beta", 8.0).with_rate_limits(RateLimits::per_minute(1, 100_000)),
        ])
        .build();

    let first = harness.gateway.execute(chat_request("one")).await.unwrap();
    let second = harness.gateway.execute(chat_request("two")).await.unwrap();
    assert_eq!(first.completed().unwrap().model_id.as_str(), CHEAP);
    assert_eq!(second.completed().unwrap().model_id.as_str(), MID);

    let third = harness.gateway.execute(chat_request("three")).await.unwrap();
    assert!(third.is_queued());

    let status = harness.gateway.degradation_status();
    assert_eq!(status.mode, DegradationMode::TotalUnavailability);
    assert!(status.isolated_providers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_multi_model_provider_isolated_per_round() {
    let harness = HarnessBuilder::new()
        .models(vec![
            chat_model(CHEAP, "alpha", 0.5),
            chat_model("alpha-backup", "alpha", 0.6),
            chat_model("alpha-spare", "alpha", 0.7),
            chat_model(MID, "beta", 8.0),
        ])
        .build();
    harness.adapter("alpha").set_healthy(false);

    // Three failed checks in one round are one provider failure
    harness.probe_rounds(1).await;
    assert!(harness.gateway.degradation_status().isolated_providers.is_empty());

    harness.probe_rounds(2).await;
    let status = harness.gateway.degradation_status();
    assert_eq!(status.isolated_providers.len(), 1);
    assert_eq!(status.isolated_providers[0].as_str(), "alpha");
}
