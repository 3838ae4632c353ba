//! Error types for broker operations

use std::fmt;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors reported by a broker backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Dialing the broker failed
    ConnectionFailed(String),

    /// A channel could not be opened or was already closed
    ChannelFailed(String),

    /// Exchange or queue declaration was rejected
    DeclarationFailed(String),

    /// Queue binding was rejected
    BindFailed(String),

    /// Consumer registration failed
    ConsumeFailed(String),

    /// Publishing a message failed
    PublishFailed(String),

    /// Acknowledging a delivery failed
    AckFailed(String),

    /// Closing a channel or connection failed
    CloseFailed(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => write!(f, "failed to connect to broker: {}", msg),
            BrokerError::ChannelFailed(msg) => write!(f, "channel error: {}", msg),
            BrokerError::DeclarationFailed(msg) => write!(f, "declaration failed: {}", msg),
            BrokerError::BindFailed(msg) => write!(f, "queue bind failed: {}", msg),
            BrokerError::ConsumeFailed(msg) => write!(f, "consumer registration failed: {}", msg),
            BrokerError::PublishFailed(msg) => write!(f, "publish failed: {}", msg),
            BrokerError::AckFailed(msg) => write!(f, "acknowledgement failed: {}", msg),
            BrokerError::CloseFailed(msg) => write!(f, "close failed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}
