//! Error types for the events crate.

use std::fmt;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Publishing to the bus failed.
    PublishFailed { reason: String },
    /// Transition store operation failed.
    StoreFailed { operation: String, reason: String },
    /// Flight payload is missing a required attribute.
    InvalidFlight { reason: String },
    /// Subscription channel closed or lagged.
    ChannelClosed,
    /// Serialization error.
    Serialization { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublishFailed { reason } => write!(f, "publish failed: {reason}"),
            Self::StoreFailed { operation, reason } => {
                write!(f, "transition store operation '{operation}' failed: {reason}")
            }
            Self::InvalidFlight { reason } => write!(f, "invalid flight: {reason}"),
            Self::ChannelClosed => write!(f, "transition channel closed"),
            Self::Serialization { reason } => write!(f, "serialization error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a publish failed error.
    pub fn publish_failed(reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            reason: reason.into(),
        }
    }

    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid flight error.
    pub fn invalid_flight(reason: impl Into<String>) -> Self {
        Self::InvalidFlight {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}
