//! Upload ingestion: header extraction, schema synthesis and chunked row loading.

pub mod header_extractor;
pub mod identifier;
pub mod row_loader;
pub mod schema;
pub mod tabular;

pub use header_extractor::{extract_header_row, extract_headers, HeaderCell, HeaderRow};
pub use identifier::sanitize;
pub use row_loader::{load, LoadReport, DEFAULT_CHUNK_SIZE};
pub use schema::{synthesize, ColumnManifest};
pub use tabular::{FileFormat, TabularFile};
