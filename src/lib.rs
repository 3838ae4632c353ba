pub mod actors;
pub mod broker;
pub mod config;
pub mod connector;
pub mod error;
pub mod executor;
pub mod logging;
pub mod protocol;

pub use config::ConnectorSettings;
pub use connector::SensuConnector;
pub use error::{ConfigError, ConnectorError, ConnectorResult};
pub use protocol::{AgentMessage, CheckRequest, CheckResult, ExecutionResult, Keepalive};
