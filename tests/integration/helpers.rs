//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use sensu_bridge::{
    AgentMessage, CheckRequest, ConnectorSettings, SensuConnector,
    broker::MemoryBroker,
    config::ReconnectPolicy,
};
use tokio::sync::mpsc;

pub const ADDRESS: &str = "amqp://guest@localhost//";

pub fn create_test_settings(subscriptions: &[&str]) -> ConnectorSettings {
    ConnectorSettings {
        address: ADDRESS.to_string(),
        subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
        client_name: "c1".to_string(),
        client_address: "10.0.0.1".to_string(),
        keepalive_interval: Duration::from_secs(60),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
    }
}

/// Broker with one exchange per topic already declared by the server
pub fn create_broker(topics: &[&str]) -> MemoryBroker {
    let broker = MemoryBroker::new();
    for topic in topics {
        broker.declare_exchange(topic);
    }
    broker
}

pub fn create_connector(broker: &MemoryBroker, settings: ConnectorSettings) -> SensuConnector {
    SensuConnector::new(settings, Arc::new(broker.clone()))
}

/// Agent side of the connector's channels
pub struct Agent {
    pub requests: mpsc::Receiver<CheckRequest>,
    pub results: mpsc::Sender<AgentMessage>,
}

impl Agent {
    pub async fn next_request(&mut self) -> Option<CheckRequest> {
        tokio::time::timeout(Duration::from_millis(500), self.requests.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Start `connector` and return the agent's ends of the channels
pub fn start_agent(connector: &mut SensuConnector) -> Agent {
    let (request_tx, requests) = mpsc::channel(16);
    let (results, result_rx) = mpsc::channel(16);
    connector.start(request_tx, result_rx).unwrap();
    Agent { requests, results }
}

pub fn check_body(command: &str, name: &str, issued: i64) -> String {
    serde_json::json!({
        "command": command,
        "name": name,
        "issued": issued,
    })
    .to_string()
}
