//! Error types for the workflow crate.

use std::fmt;

use crate::types::{InstanceId, Seq};

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Workflow error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Storage operation failed.
    StorageFailed { operation: String, reason: String },
    /// Journal has no start entry, or its start entry does not match.
    CorruptJournal { instance_id: String, reason: String },
    /// The replayed body asked for a different operation than the one
    /// recorded at this sequence number.
    NondeterministicReplay {
        seq: Seq,
        expected: String,
        found: String,
    },
    /// A live execution already exists for this identity.
    InstanceAlreadyRunning { instance_id: String },
    /// No execution is registered for this identity.
    InstanceNotFound { instance_id: String },
    /// The execution task was aborted before it finished.
    ExecutionAborted { instance_id: String },
    /// The execution halted with a fatal error.
    ExecutionFailed { instance_id: String, reason: String },
    /// Malformed instance identifier.
    InvalidInstanceId { value: String, reason: String },
    /// A duration or deadline is out of range.
    InvalidDuration { reason: String },
    /// Serialization error.
    Serialization { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageFailed { operation, reason } => {
                write!(f, "storage operation '{operation}' failed: {reason}")
            }
            Self::CorruptJournal {
                instance_id,
                reason,
            } => {
                write!(f, "journal for '{instance_id}' is corrupt: {reason}")
            }
            Self::NondeterministicReplay {
                seq,
                expected,
                found,
            } => {
                write!(
                    f,
                    "nondeterministic replay at seq {seq}: body requested {expected}, journal has {found}"
                )
            }
            Self::InstanceAlreadyRunning { instance_id } => {
                write!(f, "instance '{instance_id}' is already running")
            }
            Self::InstanceNotFound { instance_id } => {
                write!(f, "instance '{instance_id}' not found")
            }
            Self::ExecutionAborted { instance_id } => {
                write!(f, "execution of '{instance_id}' was aborted")
            }
            Self::ExecutionFailed {
                instance_id,
                reason,
            } => {
                write!(f, "execution of '{instance_id}' failed: {reason}")
            }
            Self::InvalidInstanceId { value, reason } => {
                write!(f, "invalid instance id '{value}': {reason}")
            }
            Self::InvalidDuration { reason } => write!(f, "invalid duration: {reason}"),
            Self::Serialization { reason } => write!(f, "serialization error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a storage failed error.
    pub fn storage_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt journal error.
    pub fn corrupt_journal(instance_id: &InstanceId, reason: impl Into<String>) -> Self {
        Self::CorruptJournal {
            instance_id: instance_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a nondeterministic replay error.
    pub fn nondeterministic(seq: Seq, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::NondeterministicReplay {
            seq,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an already running error.
    pub fn already_running(instance_id: &InstanceId) -> Self {
        Self::InstanceAlreadyRunning {
            instance_id: instance_id.to_string(),
        }
    }

    /// Create a not found error.
    pub fn not_found(instance_id: &InstanceId) -> Self {
        Self::InstanceNotFound {
            instance_id: instance_id.to_string(),
        }
    }

    /// Create an aborted error.
    pub fn aborted(instance_id: &InstanceId) -> Self {
        Self::ExecutionAborted {
            instance_id: instance_id.to_string(),
        }
    }

    /// Create an execution failed error.
    pub fn execution_failed(instance_id: &InstanceId, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            instance_id: instance_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid instance id error.
    pub fn invalid_instance_id(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInstanceId {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Check if the instance can be resumed by replaying its journal.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::StorageFailed { .. } | Self::ExecutionAborted { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
