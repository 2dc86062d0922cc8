//! Error taxonomy for service network operations.

use std::collections::BTreeMap;

use thiserror::Error;

use burrow_backend::BackendError;
use burrow_core::{EnclaveId, ServiceGuid};

/// Broad classification of a [`NetworkError`], used by callers that map
/// errors onto transport codes or retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Conflict,
    NotFound,
    Exhausted,
    BackendFailure,
    PartialEnforcement,
    Cancelled,
    DeadlineExceeded,
    Fatal,
}

/// Errors returned by public service network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The network was destroyed; no further mutation is possible.
    #[error("the service network for enclave '{0}' has been destroyed")]
    Destroyed(EnclaveId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("address pool exhausted: {0}")]
    Exhausted(String),

    #[error("backend operation '{op}' failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("artifact operation '{op}' failed: {source}")]
    Artifacts {
        op: &'static str,
        #[source]
        source: burrow_artifacts::ArtifactError,
    },

    /// The topology swap took effect but some sidecars could not be
    /// brought in line; traffic control is inconsistent for the listed
    /// services until the next repartition succeeds.
    #[error("topology updated but traffic control failed for {} service(s)", .affected.len())]
    PartialEnforcement {
        affected: BTreeMap<ServiceGuid, BackendError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// An internal invariant broke; the enclave should be destroyed.
    #[error("internal invariant violated: {0}")]
    Fatal(String),
}

impl NetworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            NetworkError::Conflict(_) | NetworkError::Destroyed(_) => ErrorKind::Conflict,
            NetworkError::NotFound(_) => ErrorKind::NotFound,
            NetworkError::Exhausted(_) => ErrorKind::Exhausted,
            NetworkError::Backend { source, .. } => match source {
                BackendError::Cancelled => ErrorKind::Cancelled,
                BackendError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
                BackendError::Panic(_) => ErrorKind::Fatal,
                _ => ErrorKind::BackendFailure,
            },
            NetworkError::Artifacts { source, .. } => match source {
                burrow_artifacts::ArtifactError::NotFound(_) => ErrorKind::NotFound,
                burrow_artifacts::ArtifactError::InvalidName(_) => ErrorKind::InvalidArgument,
                _ => ErrorKind::BackendFailure,
            },
            NetworkError::PartialEnforcement { .. } => ErrorKind::PartialEnforcement,
            NetworkError::Cancelled => ErrorKind::Cancelled,
            NetworkError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            NetworkError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub(crate) fn backend(op: &'static str, source: BackendError) -> Self {
        match source {
            BackendError::Cancelled => NetworkError::Cancelled,
            BackendError::DeadlineExceeded(_) => NetworkError::DeadlineExceeded,
            source => NetworkError::Backend { op, source },
        }
    }

    pub(crate) fn artifacts(op: &'static str, source: burrow_artifacts::ArtifactError) -> Self {
        NetworkError::Artifacts { op, source }
    }
}

pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroyed_classifies_as_conflict() {
        let err = NetworkError::Destroyed(EnclaveId::from("e"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn backend_cancellation_classifies_as_cancelled() {
        let err = NetworkError::backend("exec", BackendError::Cancelled);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn backend_panic_classifies_as_fatal() {
        let err = NetworkError::backend("exec", BackendError::Panic("boom".into()));
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
