//! Domain-specific error types for mapdata
//!
//! # Error Categories
//!
//! - **DataSetError**: map data records, file reading, table synthesis and drops
//! - **UploadError**: failure outcome of an upload, tagged with the failing stage
//! - **RowCoercionError**: per-row load failures (recorded, never fatal)
//! - **ResolutionError**: fatal boundary resolution job failures
//! - **GeometryError**: boundary GeoJSON parsing
//!
//! # Examples
//!
//! ```rust
//! use mapdata::errors::{DataSetError, UploadError, UploadStage};
//!
//! let err = UploadError::header_extraction(DataSetError::EmptyFile("rows.csv".into()));
//! assert_eq!(err.stage, UploadStage::HeaderExtraction);
//! assert_eq!(err.rows_loaded, 0);
//! ```

pub mod data_set;
pub mod geometry;
pub mod ingest;
pub mod resolution;

pub use data_set::DataSetError;
pub use geometry::GeometryError;
pub use ingest::{RowCoercionError, UploadError, UploadStage};
pub use resolution::ResolutionError;

/// Result type alias for data set operations
pub type DataSetResult<T> = Result<T, DataSetError>;

/// Result type alias for boundary resolution
pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// Result type alias for upload operations
pub type UploadResult<T> = Result<T, UploadError>;
