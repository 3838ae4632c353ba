//! Failure scenario tests
//!
//! Tests behavior when the broker misbehaves:
//! - Every connect step failing, with nothing left open
//! - Subscriptions that cannot be bound
//! - Publish and acknowledgement failures while running
//! - Close failures during disconnect
//! - Reconnect giving up and resuming later

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use sensu_bridge::{
    CheckResult, ConfigError, ConnectorError, ExecutionResult,
    broker::{BrokerError, FailurePoint},
    error::SetupStep,
    protocol::{QUEUE_KEEPALIVES, QUEUE_RESULTS},
};

use crate::helpers::*;

async fn assert_connect_fails_at(point: FailurePoint, successes: usize, expected: SetupStep) {
    let broker = create_broker(&["a"]);
    broker.fail_after(point, successes);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));

    let result = connector.connect().await;

    assert_matches!(result, Err(ConnectorError::Connection { step, .. }) if step == expected);
    assert!(!connector.is_connected());
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.bindings("a").is_empty());
}

#[tokio::test]
async fn test_connect_failure_at_each_step_leaves_nothing_open() {
    assert_connect_fails_at(FailurePoint::Dial, 0, SetupStep::DialInbound).await;
    assert_connect_fails_at(FailurePoint::Dial, 1, SetupStep::DialOutbound).await;
    assert_connect_fails_at(FailurePoint::Channel, 0, SetupStep::OpenInboundChannel).await;
    assert_connect_fails_at(FailurePoint::Channel, 1, SetupStep::OpenOutboundChannel).await;
    assert_connect_fails_at(FailurePoint::DeclareExchange, 0, SetupStep::DeclareExchange).await;
    assert_connect_fails_at(FailurePoint::DeclareQueue, 0, SetupStep::DeclareQueue).await;
    assert_connect_fails_at(FailurePoint::Consume, 0, SetupStep::RegisterConsumer).await;
}

#[tokio::test]
async fn test_connect_fails_when_no_subscription_binds() {
    let broker = create_broker(&[]);
    let mut connector = create_connector(&broker, create_test_settings(&["a", "b"]));

    let result = connector.connect().await;

    let failures = match result {
        Err(ConnectorError::AllSubscriptionsFailed(failures)) => failures,
        other => panic!("unexpected result: {other:?}"),
    };
    let topics: Vec<_> = failures.iter().map(|f| f.subscription.as_str()).collect();
    assert_eq!(topics, vec!["a", "b"]);
    assert_matches!(failures[0].error, BrokerError::BindFailed(_));

    assert!(!connector.is_connected());
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.queues().is_empty());
    assert_eq!(connector.queue_name(), None);
}

#[tokio::test]
async fn test_connect_fails_with_empty_subscription_list() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&[]));

    let result = connector.connect().await;

    assert_matches!(result, Err(ConnectorError::AllSubscriptionsFailed(failures)) if failures.is_empty());
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_zero_keepalive_interval_is_rejected_before_dialing() {
    let broker = create_broker(&["a"]);
    let mut settings = create_test_settings(&["a"]);
    settings.keepalive_interval = Duration::ZERO;
    let mut connector = create_connector(&broker, settings);

    let result = connector.connect().await;

    assert_matches!(
        result,
        Err(ConnectorError::Configuration(ConfigError::InvalidValue { key, .. }))
            if key == "keepalive_interval"
    );
    assert_eq!(broker.dials(), 0);
    assert_matches!(connector.reconnect().await, Err(ConnectorError::Configuration(_)));
    assert_eq!(broker.dials(), 0);
}

#[tokio::test]
async fn test_connect_succeeds_after_failure() {
    let broker = create_broker(&["a"]);
    broker.fail(FailurePoint::Dial);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));

    assert!(connector.connect().await.is_err());
    broker.clear_failures();
    connector.connect().await.unwrap();

    assert!(connector.is_connected());
    connector.disconnect().await;
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_outbound() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let agent = start_agent(&mut connector);
    broker
        .wait_for_published(QUEUE_KEEPALIVES, 1, Duration::from_secs(2))
        .await;

    broker.fail(FailurePoint::Publish);
    agent.results.send(sample("lost").into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    broker.clear_failures();
    agent.results.send(sample("kept").into()).await.unwrap();

    let published = broker
        .wait_for_published(QUEUE_RESULTS, 1, Duration::from_secs(2))
        .await;
    assert_eq!(published.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(body["check"]["name"], "kept");
    assert!(connector.is_running());

    connector.disconnect().await;
}

#[tokio::test]
async fn test_ack_failure_still_forwards_request() {
    let broker = create_broker(&["a"]);
    broker.fail(FailurePoint::Ack);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let mut agent = start_agent(&mut connector);

    broker.publish_to_exchange("a", check_body("true", "t1", 1));

    let request = agent.next_request().await.unwrap();
    assert_eq!(request.name, "t1");
    assert_eq!(broker.acked(), 0);

    connector.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_reports_close_failures() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let _agent = start_agent(&mut connector);

    broker.fail(FailurePoint::Close);
    let failures = connector.disconnect().await;

    // two channels and two connections
    assert_eq!(failures.len(), 4);
    assert!(
        failures
            .iter()
            .all(|failure| matches!(failure, BrokerError::CloseFailed(_)))
    );
    assert!(!connector.is_connected());
    assert!(!connector.is_running());
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_reconnect_gives_up_then_resumes() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let mut agent = start_agent(&mut connector);

    broker.fail(FailurePoint::Dial);
    let result = connector.reconnect().await;

    assert_matches!(
        result,
        Err(ConnectorError::ReconnectFailed { attempts: 3, last })
            if matches!(*last, ConnectorError::Connection { step: SetupStep::DialInbound, .. })
    );
    assert!(!connector.is_connected());
    assert!(!connector.is_running());
    assert_eq!(broker.open_connections(), 0);

    // the agent channels were kept for the next attempt
    broker.clear_failures();
    connector.reconnect().await.unwrap();
    assert!(connector.is_running());

    broker.publish_to_exchange("a", check_body("true", "resumed", 2));
    let request = agent.next_request().await.unwrap();
    assert_eq!(request.name, "resumed");

    connector.disconnect().await;
}

fn sample(name: &str) -> CheckResult {
    CheckResult {
        client: "c1".to_string(),
        result: ExecutionResult {
            command: "true".to_string(),
            name: name.to_string(),
            issued: 1,
            executed: 2,
            duration: 0.01,
            output: String::new(),
            status: 0,
        },
    }
}
