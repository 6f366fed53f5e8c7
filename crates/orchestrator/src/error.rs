//! Orchestrator error types.
//!
//! Admission errors are returned to callers of [`crate::Orchestrator`];
//! runtime errors wrap the durable runtime's failures.

use thiserror::Error;

use jetstream_workflow::InstanceId;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// A live execution already exists for this identity.
    #[error("instance already running: {0}")]
    InstanceAlreadyRunning(String),

    /// No live or recently terminated execution exists for this identity.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// A request argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The instance has already reached a terminal state.
    #[error("instance has terminated: {0}")]
    Terminal(String),

    /// The flight payload is missing attributes or inconsistent.
    #[error("invalid flight: {0}")]
    InvalidFlight(String),

    /// The execution halted on an infrastructure failure.
    #[error("execution of {instance_id} failed: {reason}")]
    ExecutionFailed { instance_id: String, reason: String },

    /// Durable runtime failure.
    #[error("runtime error: {0}")]
    Runtime(jetstream_workflow::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] jetstream_core::Error),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn terminal(instance_id: &InstanceId) -> Self {
        Self::Terminal(instance_id.to_string())
    }

    pub fn not_found(instance_id: &InstanceId) -> Self {
        Self::InstanceNotFound(instance_id.to_string())
    }

    pub fn execution_failed(instance_id: &InstanceId, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            instance_id: instance_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<jetstream_workflow::Error> for Error {
    fn from(err: jetstream_workflow::Error) -> Self {
        use jetstream_workflow::Error as Wf;
        match err {
            Wf::InstanceAlreadyRunning { instance_id } => Self::InstanceAlreadyRunning(instance_id),
            Wf::InstanceNotFound { instance_id } => Self::InstanceNotFound(instance_id),
            Wf::ExecutionFailed {
                instance_id,
                reason,
            } => Self::ExecutionFailed {
                instance_id,
                reason,
            },
            Wf::InvalidInstanceId { value, reason } => {
                Self::InvalidArgument(format!("{value}: {reason}"))
            }
            other => Self::Runtime(other),
        }
    }
}

impl From<jetstream_events::Error> for Error {
    fn from(err: jetstream_events::Error) -> Self {
        match err {
            jetstream_events::Error::InvalidFlight { reason } => Self::InvalidFlight(reason),
            other => Self::Runtime(jetstream_workflow::Error::storage_failed(
                "transition",
                other.to_string(),
            )),
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;
