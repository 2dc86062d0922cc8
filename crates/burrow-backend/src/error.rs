//! Backend error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a container backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The named object does not exist on the backend.
    #[error("backend object not found: {0}")]
    NotFound(String),

    /// A backend operation ran and reported failure.
    #[error("backend operation '{op}' failed: {message}")]
    OperationFailed { op: &'static str, message: String },

    /// The operation is not supported by this backend.
    #[error("backend does not support {0}")]
    Unsupported(&'static str),

    /// The caller cancelled the operation.
    #[error("backend operation cancelled")]
    Cancelled,

    /// The operation did not complete within its bound.
    #[error("backend operation timed out after {0:?}")]
    DeadlineExceeded(Duration),

    /// An operation panicked; the backend state for this object is unknown.
    #[error("backend operation panicked: {0}")]
    Panic(String),

    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub(crate) fn op_failed(op: &'static str, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            op,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
