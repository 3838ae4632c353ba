//! Dispatch tests
//!
//! Tests the message flow between the broker and the agent:
//! - Check requests from subscriptions reach the agent and are acknowledged
//! - Malformed requests are acknowledged and dropped
//! - Check results are published to the results queue
//! - Non-result agent messages are ignored
//! - A full round trip through the check executor

use std::time::Duration;

use pretty_assertions::assert_eq;
use sensu_bridge::{
    AgentMessage, CheckRequest, CheckResult, ExecutionResult,
    executor::CheckExecutor,
    protocol::QUEUE_RESULTS,
};
use tokio::sync::mpsc;

use crate::helpers::*;

fn sample_result(name: &str) -> CheckResult {
    CheckResult {
        client: "c1".to_string(),
        result: ExecutionResult {
            command: "echo hi".to_string(),
            name: name.to_string(),
            issued: 1000,
            executed: 1001,
            duration: 0.25,
            output: "hi\n".to_string(),
            status: 0,
        },
    }
}

#[tokio::test]
async fn test_check_request_reaches_agent() {
    let broker = create_broker(&["a", "b"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a", "b"]));
    connector.connect().await.unwrap();
    let mut agent = start_agent(&mut connector);

    let routed = broker.publish_to_exchange("a", check_body("echo hi", "t1", 1000));
    assert_eq!(routed, 1);

    let request = agent.next_request().await.unwrap();
    assert_eq!(
        request,
        CheckRequest {
            command: "echo hi".to_string(),
            name: "t1".to_string(),
            issued: 1000,
        }
    );
    assert_eq!(broker.acked(), 1);

    connector.disconnect().await;
}

#[tokio::test]
async fn test_requests_keep_delivery_order() {
    let broker = create_broker(&["a", "b"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a", "b"]));
    connector.connect().await.unwrap();
    let mut agent = start_agent(&mut connector);

    for (i, topic) in ["a", "b", "a", "b"].iter().enumerate() {
        broker.publish_to_exchange(topic, check_body("true", &format!("t{i}"), i as i64));
    }

    let mut names = vec![];
    for _ in 0..4 {
        names.push(agent.next_request().await.unwrap().name);
    }
    assert_eq!(names, vec!["t0", "t1", "t2", "t3"]);

    connector.disconnect().await;
}

#[tokio::test]
async fn test_malformed_request_is_acked_and_dropped() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let mut agent = start_agent(&mut connector);

    broker.publish_to_exchange("a", "not json");
    broker.publish_to_exchange("a", r#"{"command": 5}"#);
    broker.publish_to_exchange("a", check_body("true", "valid", 7));

    // only the valid request comes through
    let request = agent.next_request().await.unwrap();
    assert_eq!(request.name, "valid");
    assert_eq!(broker.acked(), 3);

    connector.disconnect().await;
}

#[tokio::test]
async fn test_requests_queued_before_start_are_delivered() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();

    broker.publish_to_exchange("a", check_body("true", "early", 1));
    let mut agent = start_agent(&mut connector);

    let request = agent.next_request().await.unwrap();
    assert_eq!(request.name, "early");

    connector.disconnect().await;
}

#[tokio::test]
async fn test_check_result_is_published() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let agent = start_agent(&mut connector);

    agent.results.send(sample_result("t1").into()).await.unwrap();

    let published = broker
        .wait_for_published(QUEUE_RESULTS, 1, Duration::from_secs(2))
        .await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].content_type, "text/json");
    assert_eq!(published[0].delivery_mode, 1);

    let body: serde_json::Value = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(body["client"], "c1");
    assert_eq!(body["check"]["name"], "t1");
    assert_eq!(body["check"]["status"], 0);
    assert_eq!(body["check"]["output"], "hi\n");

    connector.disconnect().await;
}

#[tokio::test]
async fn test_other_agent_messages_are_not_published() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();
    let agent = start_agent(&mut connector);

    agent
        .results
        .send(AgentMessage::Other("metrics".to_string()))
        .await
        .unwrap();
    agent.results.send(sample_result("after").into()).await.unwrap();

    // results are published in order, so the first one must be "after"
    let published = broker
        .wait_for_published(QUEUE_RESULTS, 1, Duration::from_secs(2))
        .await;
    assert_eq!(published.len(), 1);
    let result: CheckResult = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(result.result.name, "after");

    connector.disconnect().await;
}

#[tokio::test]
async fn test_round_trip_through_executor() {
    let broker = create_broker(&["a"]);
    let mut connector = create_connector(&broker, create_test_settings(&["a"]));
    connector.connect().await.unwrap();

    let (request_tx, request_rx) = mpsc::channel(4);
    let (result_tx, result_rx) = mpsc::channel(4);
    let executor = CheckExecutor::new("c1", Duration::from_secs(5));
    let agent = tokio::spawn(executor.serve(request_rx, result_tx));
    connector.start(request_tx, result_rx).unwrap();

    broker.publish_to_exchange("a", check_body("echo hi", "t1", 1000));

    let published = broker
        .wait_for_published(QUEUE_RESULTS, 1, Duration::from_secs(5))
        .await;
    assert_eq!(published.len(), 1);

    let result: CheckResult = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(result.client, "c1");
    assert_eq!(result.result.name, "t1");
    assert_eq!(result.result.command, "echo hi");
    assert_eq!(result.result.issued, 1000);
    assert_eq!(result.result.output, "hi\n");
    assert_eq!(result.result.status, 0);

    connector.disconnect().await;
    // the connector dropped the request sender, so the executor finishes
    tokio::time::timeout(Duration::from_secs(2), agent)
        .await
        .unwrap()
        .unwrap();
}
