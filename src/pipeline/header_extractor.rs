use crate::errors::{DataSetError, DataSetResult};

use super::tabular::{Cell, TabularFile};

/// Surrogate key column every synthesized table carries
pub const ID_COLUMN: &str = "id";

/// Column holding the owning map data record's id
pub const MAP_DATA_ID_COLUMN: &str = "map_data_id";

/// A named header cell and the position it occupies in each data row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCell {
    /// Zero-based column position in the source file, `None` for reserved columns
    pub source_index: Option<usize>,
    pub raw: String,
}

/// The header row of an upload, blank cells removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRow {
    pub cells: Vec<HeaderCell>,
}

impl HeaderRow {
    /// Raw header names in file order
    pub fn names(&self) -> Vec<String> {
        self.cells.iter().map(|cell| cell.raw.clone()).collect()
    }

    /// The header cells preceded by the reserved `id` and `map_data_id` columns,
    /// so every synthesized table gets a key and an ownership column whatever the
    /// file contains.
    pub fn with_reserved_columns(&self) -> Vec<HeaderCell> {
        let mut cells = vec![
            HeaderCell {
                source_index: None,
                raw: ID_COLUMN.to_string(),
            },
            HeaderCell {
                source_index: None,
                raw: MAP_DATA_ID_COLUMN.to_string(),
            },
        ];
        cells.extend(self.cells.iter().cloned());
        cells
    }
}

/// Read the first row of `file` as its header row
pub fn extract_header_row(file: &TabularFile) -> DataSetResult<HeaderRow> {
    let mut rows = file.rows()?;

    let first = match rows.next_row() {
        None => return Err(DataSetError::EmptyFile(file.filename().to_string())),
        Some(Err(unreadable)) => {
            return Err(DataSetError::UnreadableFile(format!(
                "{}: header row: {}",
                file.filename(),
                unreadable.reason
            )))
        }
        Some(Ok(row)) => row,
    };

    let cells: Vec<HeaderCell> = first
        .cells
        .iter()
        .enumerate()
        .filter_map(|(index, cell)| match cell {
            Cell::Text(text) => Some(HeaderCell {
                source_index: Some(index),
                raw: text.clone(),
            }),
            Cell::Empty | Cell::Invalid(_) => None,
        })
        .collect();

    if cells.is_empty() {
        return Err(DataSetError::EmptyFile(format!(
            "{}: header row has no named columns",
            file.filename()
        )));
    }

    tracing::debug!(
        "Extracted {} headers from {}: {:?}",
        cells.len(),
        file.filename(),
        cells.iter().map(|c| c.raw.as_str()).collect::<Vec<_>>()
    );

    Ok(HeaderRow { cells })
}

/// Ordered raw header names of `file`, blank header cells dropped
pub fn extract_headers(file: &TabularFile) -> DataSetResult<Vec<String>> {
    extract_header_row(file).map(|row| row.names())
}
