//! Wire messages exchanged with the Sensu server and the check agent
//!
//! Every type here maps one-to-one onto a JSON body. Field names follow the
//! Sensu 1.x wire format, which is why the execution result is nested under
//! `check` in [`CheckResult`].

use serde::{Deserialize, Serialize};

/// Queue the Sensu server reads check results from
pub const QUEUE_RESULTS: &str = "results";

/// Queue the Sensu server reads keepalives from
pub const QUEUE_KEEPALIVES: &str = "keepalives";

/// Version advertised in keepalive messages
pub const KEEPALIVE_VERSION: &str = "collectd";

/// Request to execute a check, as published by the Sensu server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub command: String,
    pub name: String,
    /// Unix seconds at which the server issued the request
    pub issued: i64,
}

/// Outcome of one check execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    pub name: String,
    pub issued: i64,
    /// Unix seconds at which execution started
    pub executed: i64,
    /// Wall-clock duration in seconds
    pub duration: f64,
    pub output: String,
    pub status: i32,
}

/// Envelope published to the results queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub client: String,
    #[serde(rename = "check")]
    pub result: ExecutionResult,
}

/// Liveness announcement, built fresh on every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    pub name: String,
    pub address: String,
    pub subscriptions: Vec<String>,
    pub version: String,
    pub timestamp: i64,
}

/// Anything the agent hands back to the connector
///
/// Only check results are forwarded to the server; every other variant is
/// dropped with a debug log.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    CheckResult(CheckResult),
    Other(String),
}

impl AgentMessage {
    /// Short name of the variant for logging
    pub fn kind(&self) -> &'static str {
        match self {
            AgentMessage::CheckResult(_) => "check_result",
            AgentMessage::Other(_) => "other",
        }
    }
}

impl From<CheckResult> for AgentMessage {
    fn from(result: CheckResult) -> Self {
        AgentMessage::CheckResult(result)
    }
}
