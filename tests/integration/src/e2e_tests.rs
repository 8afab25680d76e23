//! End-to-end request flows through the `Gateway` facade

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::{Behavior, ScriptedAdapter};
use gateway_config::{parse_str, ConfigFormat};
use gateway_core::{AdapterRegistry, ChatMessage, ExecuteRequest, FailoverReason, GatewayError};
use gateway_resilience::{DegradationMode, ReplayResult};
use gateway_telemetry::RequestOutcome;
use llm_failover_gateway::Gateway;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
concurrency:
  global_limit: 8
  default_provider_limit: 2
failover:
  max_retries: 2
  base_delay: 10ms
request:
  default_timeout: 5s
models:
  - id: alpha-small
    provider: alpha
    capabilities: [chat]
    cost_per_input_unit: 0.5
    cost_per_output_unit: 1.0
  - id: beta-medium
    provider: beta
    capabilities: [chat]
    cost_per_input_unit: 8.0
    cost_per_output_unit: 16.0
"#;

#[tokio::test]
async fn test_e2e_request_flow() {
    let harness = TestHarness::new();
    let request = ExecuteRequest::builder()
        .require("chat")
        .message(ChatMessage::system("You are terse."))
        .message(ChatMessage::user("What is the capital of France?"))
        .max_tokens(64)
        .temperature(0.2)
        .build()
        .unwrap();
    let request_id = request.id.clone();

    let outcome = harness.gateway.execute(request).await.unwrap();
    let response = outcome.completed().unwrap();

    assert_eq!(response.request_id, request_id);
    assert_eq!(response.content, format!("{CHEAP}: What is the capital of France?"));
    assert_eq!(response.usage.total(), 42);
    assert_eq!(response.attempts, 1);

    let samples = harness.store.samples();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].success);
    assert_eq!(samples[0].model_id.as_str(), CHEAP);

    let record = harness
        .gateway
        .health_records()
        .into_iter()
        .find(|r| r.model_id.as_str() == CHEAP)
        .unwrap();
    assert_eq!(record.consecutive_failures, 0);

    assert_eq!(harness.gateway.concurrency_status().global.active, 0);
    assert_eq!(harness.metrics.requests(RequestOutcome::Completed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_failover_then_recovery() {
    let harness = TestHarness::new();
    harness
        .adapter("alpha")
        .script(CHEAP, [Behavior::Fail(GatewayError::timeout(Duration::from_secs(1)))]);

    let first = harness.gateway.execute(chat_request("one")).await.unwrap();
    assert_eq!(first.completed().unwrap().model_id.as_str(), MID);
    assert_eq!(harness.store.failovers()[0].reason, FailoverReason::Timeout);

    // A single failure leaves the cheap model usable
    let second = harness.gateway.execute(chat_request("two")).await.unwrap();
    assert_eq!(second.completed().unwrap().model_id.as_str(), CHEAP);
    assert_eq!(harness.gateway.degradation_status().mode, DegradationMode::Normal);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_queued_request_replays_after_recovery() {
    let harness = TestHarness::new();
    harness.all_down();
    harness.probe_rounds(3).await;

    let outcome = harness.gateway.execute(chat_request("hold on")).await.unwrap();
    let ack = outcome.queued().expect("queued").clone();
    assert_eq!(harness.metrics.queue_depth(), 1);

    let mut replays = harness.gateway.subscribe_replays();
    harness.all_up();
    harness.gateway.start();

    let replayed = tokio::time::timeout(Duration::from_secs(60), replays.recv())
        .await
        .expect("replayed in time")
        .expect("replay channel open");

    assert_eq!(replayed.ticket, ack.ticket);
    assert!(replayed.queued_for >= Duration::from_secs(5));
    match replayed.result {
        ReplayResult::Completed(response) => {
            assert_eq!(response.content, format!("{}: hold on", response.model_id));
        }
        other => panic!("expected completed replay, got {other:?}"),
    }

    assert_eq!(harness.gateway.queue_len(), 0);
    assert_eq!(harness.gateway.degradation_status().mode, DegradationMode::Normal);
    assert!(
        eventually(Duration::from_secs(1), || async {
            harness.metrics.queue_depth() == 0
        })
        .await
    );

    harness.gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_e2e_gateway_from_config() {
    let config = parse_str(CONFIG, ConfigFormat::Yaml).unwrap();
    let alpha = Arc::new(ScriptedAdapter::new("alpha"));
    let beta = Arc::new(ScriptedAdapter::new("beta"));
    let adapters = AdapterRegistry::new()
        .with_adapter(alpha.clone())
        .with_adapter(beta.clone());

    let gateway = Gateway::from_config(&config, adapters).unwrap();
    assert_eq!(gateway.registry().len(), 2);

    let outcome = gateway.execute(chat_request("hello")).await.unwrap();
    assert_eq!(outcome.completed().unwrap().model_id.as_str(), CHEAP);

    alpha.go_down();
    let outcome = gateway.execute(chat_request("again")).await.unwrap();
    let response = outcome.completed().unwrap();
    assert_eq!(response.model_id.as_str(), MID);
    assert_eq!(response.attempts, 2);
    assert_eq!(beta.total_calls(), 1);
}

#[tokio::test]
async fn test_e2e_metrics_exposition() {
    let harness = TestHarness::new();
    harness.gateway.execute(chat_request("hello")).await.unwrap();
    harness
        .gateway
        .execute(
            ExecuteRequest::builder()
                .require("vision")
                .prompt("nothing can serve this")
                .build()
                .unwrap(),
        )
        .await
        .unwrap_err();

    let text = harness.metrics.encode().unwrap();
    assert!(text.contains("gateway_requests_total{outcome=\"completed\"} 1"));
    assert!(text.contains("gateway_requests_total{outcome=\"failed\"} 1"));
    assert!(text.contains("gateway_request_errors_total{kind=\"no_matching_model\"} 1"));
    assert!(text.contains("gateway_degradation_severity 0"));
}

#[tokio::test]
async fn test_e2e_start_and_shutdown() {
    let harness = TestHarness::new();
    assert!(!harness.gateway.is_running());

    harness.gateway.start();
    harness.gateway.start();
    assert!(harness.gateway.is_running());

    harness.gateway.shutdown().await;
    assert!(!harness.gateway.is_running());

    // Requests are still served without background tasks
    let outcome = harness.gateway.execute(chat_request("after")).await.unwrap();
    assert!(outcome.completed().is_some());
}
