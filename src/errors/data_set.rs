//! Data set error types
//!
//! Errors raised while managing map data records, reading uploaded files and
//! synthesizing or dropping their backing tables.
//!
//! # Examples
//!
//! ```rust
//! use mapdata::errors::DataSetError;
//!
//! let err = DataSetError::EmptyFile("survey.csv".to_string());
//! assert!(err.is_client_error());
//! assert_eq!(err.error_code(), "VALIDATION_FAILED");
//! ```

use sea_orm::DbErr;
use thiserror::Error;

/// Data set operation errors
#[derive(Error, Debug)]
pub enum DataSetError {
    /// Map data record not found by ID
    #[error("Map data {0} not found")]
    NotFound(String),

    /// Uploaded file has no rows (or no named header cells)
    #[error("Empty file: {0}")]
    EmptyFile(String),

    /// Uploaded file could not be parsed as a supported tabular format
    #[error("Unreadable file: {0}")]
    UnreadableFile(String),

    /// File extension does not map to a supported tabular format
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Creating the backing table failed
    #[error("Schema synthesis failed for '{table}': {reason}")]
    SchemaSynthesis { table: String, reason: String },

    /// The relational store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Column manifest is missing, malformed or does not fit the table
    #[error("Invalid column manifest: {0}")]
    InvalidManifest(String),

    /// Record failed validation
    #[error("Map data validation failed: {0}")]
    ValidationFailed(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(DbErr),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DbErr> for DataSetError {
    fn from(err: DbErr) -> Self {
        if is_connectivity_error(&err) {
            DataSetError::StoreUnavailable(err.to_string())
        } else {
            DataSetError::Database(err)
        }
    }
}

/// True for errors that mean the store itself could not be reached, as opposed
/// to a statement being rejected.
pub fn is_connectivity_error(err: &DbErr) -> bool {
    matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
}

impl DataSetError {
    /// Check if this is a client error (400-series)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DataSetError::EmptyFile(_)
                | DataSetError::UnreadableFile(_)
                | DataSetError::UnsupportedFormat(_)
                | DataSetError::ValidationFailed(_)
        )
    }

    /// Check if this is a not found error (404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataSetError::NotFound(_))
    }

    /// Check if this is a server error (500-series)
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            DataSetError::SchemaSynthesis { .. }
                | DataSetError::StoreUnavailable(_)
                | DataSetError::InvalidManifest(_)
                | DataSetError::Database(_)
                | DataSetError::Io(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            DataSetError::NotFound(_) => "NOT_FOUND",
            DataSetError::EmptyFile(_)
            | DataSetError::UnreadableFile(_)
            | DataSetError::UnsupportedFormat(_)
            | DataSetError::ValidationFailed(_) => "VALIDATION_FAILED",
            DataSetError::SchemaSynthesis { .. } => "SCHEMA_SYNTHESIS_FAILED",
            DataSetError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            DataSetError::InvalidManifest(_) => "INVALID_MANIFEST",
            DataSetError::Database(_) => "DATABASE_ERROR",
            DataSetError::Io(_) => "IO_ERROR",
            DataSetError::Json(_) => "JSON_ERROR",
        }
    }
}
