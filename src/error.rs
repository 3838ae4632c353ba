//! Error types for configuration and the connector lifecycle

use std::fmt;
use std::path::PathBuf;

use crate::broker::BrokerError;

/// Result type alias for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised while loading or resolving configuration
#[derive(Debug)]
pub enum ConfigError {
    /// A required option is not set
    Missing { key: String },

    /// An option is set but has the wrong type
    InvalidType { key: String, expected: &'static str },

    /// An option has the right type but an unusable value
    InvalidValue { key: String, reason: String },

    /// The file extension maps to no supported format
    UnsupportedFormat(PathBuf),

    /// The file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid for its format
    Parse { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing { key } => write!(f, "missing configuration option '{}'", key),
            ConfigError::InvalidType { key, expected } => {
                write!(f, "configuration option '{}' must be a {}", key, expected)
            }
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "invalid value for configuration option '{}': {}", key, reason)
            }
            ConfigError::UnsupportedFormat(path) => {
                write!(f, "unsupported configuration format: {}", path.display())
            }
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "failed to parse {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Setup steps performed by `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    DialInbound,
    DialOutbound,
    OpenInboundChannel,
    OpenOutboundChannel,
    DeclareExchange,
    DeclareQueue,
    RegisterConsumer,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            SetupStep::DialInbound => "dial inbound connection",
            SetupStep::DialOutbound => "dial outbound connection",
            SetupStep::OpenInboundChannel => "open inbound channel",
            SetupStep::OpenOutboundChannel => "open outbound channel",
            SetupStep::DeclareExchange => "declare client exchange",
            SetupStep::DeclareQueue => "declare client queue",
            SetupStep::RegisterConsumer => "register consumer",
        };
        f.write_str(step)
    }
}

/// A subscription topic that could not be bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFailure {
    pub subscription: String,
    pub error: BrokerError,
}

impl fmt::Display for SubscriptionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subscription, self.error)
    }
}

/// Errors returned by the connector's lifecycle operations
#[derive(Debug)]
pub enum ConnectorError {
    /// Configuration could not be resolved
    Configuration(ConfigError),

    /// A connection setup step failed
    Connection { step: SetupStep, source: BrokerError },

    /// Not a single subscription could be bound
    AllSubscriptionsFailed(Vec<SubscriptionFailure>),

    /// The operation needs an established connection
    NotConnected,

    /// `connect` was called on a connected connector
    AlreadyConnected,

    /// `start` was called while the loops are running
    AlreadyStarted,

    /// Every reconnect attempt failed
    ReconnectFailed {
        attempts: u32,
        last: Box<ConnectorError>,
    },
}

impl ConnectorError {
    pub(crate) fn connection(step: SetupStep) -> impl FnOnce(BrokerError) -> Self {
        move |source| ConnectorError::Connection { step, source }
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Configuration(err) => write!(f, "configuration error: {}", err),
            ConnectorError::Connection { step, source } => {
                write!(f, "failed to {}: {}", step, source)
            }
            ConnectorError::AllSubscriptionsFailed(failures) if failures.is_empty() => {
                write!(f, "no subscriptions to bind")
            }
            ConnectorError::AllSubscriptionsFailed(failures) => {
                let failures: Vec<String> = failures.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "failed to subscribe to all channels: {}",
                    failures.join("; ")
                )
            }
            ConnectorError::NotConnected => write!(f, "connector is not connected"),
            ConnectorError::AlreadyConnected => write!(f, "connector is already connected"),
            ConnectorError::AlreadyStarted => write!(f, "connector loops are already running"),
            ConnectorError::ReconnectFailed { attempts, last } => {
                write!(f, "reconnect failed after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectorError::Configuration(err) => Some(err),
            ConnectorError::Connection { source, .. } => Some(source),
            ConnectorError::ReconnectFailed { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<ConfigError> for ConnectorError {
    fn from(err: ConfigError) -> Self {
        ConnectorError::Configuration(err)
    }
}
