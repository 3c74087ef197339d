//! Error types shared by the reconciliation engine
//!
//! Errors are classified as transient or permanent. Transient errors are
//! retried by the retry wrapper and by the controller error policy;
//! permanent errors drop the reconcile and wait for the object to change.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Any non-classified failure from the Kubernetes API
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The object does not structurally match the expected schema
    #[error("wrong type: {0}")]
    WrongType(String),

    /// Construction-time precondition failure
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal sentinel of the Service handler's update diff, used to
    /// distinguish appending a new port from overwriting an orphaned one.
    /// Never surfaced to callers.
    #[error("no service port with port {0}")]
    PortNotFound(i32),

    /// Reserved for the historical port allocation path. Load balancer
    /// ports are specified by the input, so this is never constructed by
    /// the current resource semantics.
    #[error("port capacity reached: {0}")]
    CapacityReached(String),

    /// The reconcile context was cancelled while an operation was pending
    #[error("reconciliation cancelled")]
    Cancelled,
}

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Should be retried with backoff
    Transient,
    /// Will not recover without the object changing
    Permanent,
}

impl HandlerError {
    /// Classify this error for retry purposes
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Api(_) => ErrorKind::Transient,
            HandlerError::WrongType(_)
            | HandlerError::InvalidConfig(_)
            | HandlerError::PortNotFound(_)
            | HandlerError::CapacityReached(_)
            | HandlerError::Cancelled => ErrorKind::Permanent,
        }
    }

    /// Assert the Service handler's internal port lookup sentinel
    pub fn is_port_not_found(&self) -> bool {
        matches!(self, HandlerError::PortNotFound(_))
    }
}
