//! Upload pipeline error types
//!
//! `UploadError` is the failure outcome of the upload entry point: it names the
//! stage that failed and how many rows were committed before it did.
//! `RowCoercionError` is the per-row failure recorded by the row loader; it never
//! aborts a batch.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::DataSetError;

/// Stage of the upload pipeline an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    RecordLookup,
    HeaderExtraction,
    SchemaSynthesis,
    RowLoading,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadStage::RecordLookup => "record lookup",
            UploadStage::HeaderExtraction => "header extraction",
            UploadStage::SchemaSynthesis => "schema synthesis",
            UploadStage::RowLoading => "row loading",
        };
        f.write_str(label)
    }
}

/// Upload failed at `stage` after `rows_loaded` rows were committed
#[derive(Error, Debug)]
#[error("Upload failed during {stage} ({rows_loaded} rows loaded): {source}")]
pub struct UploadError {
    pub stage: UploadStage,
    pub rows_loaded: usize,
    #[source]
    pub source: DataSetError,
}

impl UploadError {
    pub fn new(stage: UploadStage, rows_loaded: usize, source: DataSetError) -> Self {
        Self {
            stage,
            rows_loaded,
            source,
        }
    }

    pub fn record_lookup(source: DataSetError) -> Self {
        Self::new(UploadStage::RecordLookup, 0, source)
    }

    pub fn header_extraction(source: DataSetError) -> Self {
        Self::new(UploadStage::HeaderExtraction, 0, source)
    }

    pub fn schema_synthesis(source: DataSetError) -> Self {
        Self::new(UploadStage::SchemaSynthesis, 0, source)
    }

    pub fn row_loading(rows_loaded: usize, source: DataSetError) -> Self {
        Self::new(UploadStage::RowLoading, rows_loaded, source)
    }
}

/// A single data row could not be turned into an insert record.
///
/// `row` is 1-based and counts the header row. For CSV/TSV it is the physical
/// line the record starts on, so a quoted multi-line cell does not shift later
/// rows; for spreadsheets it is the sheet row number.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Row {row}: {reason}")]
pub struct RowCoercionError {
    pub row: usize,
    pub column: Option<String>,
    pub reason: String,
}

impl RowCoercionError {
    pub fn new(row: usize, column: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            row,
            column,
            reason: reason.into(),
        }
    }
}
