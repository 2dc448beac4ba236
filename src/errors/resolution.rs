//! Boundary resolution error types

use sea_orm::DbErr;
use thiserror::Error;

use super::data_set::is_connectivity_error;

/// Fatal errors for a boundary resolution job.
///
/// Per-row problems (bad coordinates, no containing boundary) are part of the
/// job report instead.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The store could not be reached or rejected a statement
    #[error("Store error during resolution: {0}")]
    Store(#[from] DbErr),

    /// The manifest does not describe the target table
    #[error("Invalid manifest for '{table}': {reason}")]
    InvalidManifest { table: String, reason: String },

    /// The job worker is no longer accepting work
    #[error("Resolution queue is closed")]
    QueueClosed,
}

impl ResolutionError {
    /// Whether the worker should retry the job under its retry policy.
    /// Only an unreachable store is transient; any other store error would
    /// fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        self.is_store_unavailable()
    }

    /// Whether the store itself was unreachable
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            ResolutionError::Store(err) => is_connectivity_error(err),
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ResolutionError::Store(_) => "STORE_ERROR",
            ResolutionError::InvalidManifest { .. } => "INVALID_MANIFEST",
            ResolutionError::QueueClosed => "QUEUE_CLOSED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::RuntimeErr;

    #[test]
    fn test_store_errors_are_retryable() {
        let err = ResolutionError::from(DbErr::Conn(RuntimeErr::Internal("down".into())));
        assert!(err.is_retryable());
        assert!(err.is_store_unavailable());
        assert_eq!(err.error_code(), "STORE_ERROR");

        let err = ResolutionError::from(DbErr::ConnectionAcquire(sea_orm::ConnAcquireErr::Timeout));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_query_errors_are_not_retryable() {
        let err = ResolutionError::from(DbErr::Custom("no such column: lat".into()));
        assert!(!err.is_retryable());
        assert!(!err.is_store_unavailable());
        assert_eq!(err.error_code(), "STORE_ERROR");
    }

    #[test]
    fn test_manifest_errors_are_not_retryable() {
        let err = ResolutionError::InvalidManifest {
            table: "mp_data_a_1".into(),
            reason: "empty".into(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_store_unavailable());
    }
}
