//! Chunked bulk loading of upload rows into a synthesized table.
//!
//! The file is streamed `chunk_size` source rows at a time. Each chunk is
//! inserted inside its own transaction, so a failure part way through leaves
//! the earlier chunks committed and `rows_loaded` reports exactly how many.

use sea_orm::sea_query::{Alias, InsertStatement, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{DataSetError, RowCoercionError, UploadError};
use crate::geometry::Point;

use super::header_extractor::MAP_DATA_ID_COLUMN;
use super::schema::{
    ColumnManifest, ManifestColumn, CREATED_AT_COLUMN, LOCATION_COLUMN, TEXT_COLUMN_LENGTH,
    UPDATED_AT_COLUMN,
};
use super::tabular::{Cell, SourceRow, TabularFile, UnreadableRow};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

// SQLite caps bound parameters per statement at 32766
const MAX_BIND_PARAMS: usize = 30_000;

/// Outcome of a completed load
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub rows_loaded: usize,
    /// Committed insert batches, one per chunk that produced at least one record
    pub batches: usize,
    pub errors: Vec<RowCoercionError>,
}

/// How source rows map onto the insert columns of one table
struct RowPlan<'a> {
    data_columns: Vec<&'a ManifestColumn>,
    /// Indexes into `data_columns` of the latitude and longitude columns
    coordinates: Option<(usize, usize)>,
}

impl<'a> RowPlan<'a> {
    fn new(manifest: &'a ColumnManifest) -> Self {
        let data_columns: Vec<&ManifestColumn> = manifest.data_columns().collect();
        let position = |name: &str| data_columns.iter().position(|c| c.name == name);
        let coordinates = manifest
            .coordinate_columns()
            .and_then(|(lat, lng)| Some((position(lat.as_str())?, position(lng.as_str())?)));

        Self {
            data_columns,
            coordinates,
        }
    }

    /// Column list of every insert: reference, data columns, location, timestamps
    fn insert_columns(&self) -> Vec<Alias> {
        let mut columns = Vec::with_capacity(self.data_columns.len() + 4);
        columns.push(Alias::new(MAP_DATA_ID_COLUMN));
        columns.extend(self.data_columns.iter().map(|c| Alias::new(c.name.as_str())));
        columns.push(Alias::new(LOCATION_COLUMN));
        columns.push(Alias::new(CREATED_AT_COLUMN));
        columns.push(Alias::new(UPDATED_AT_COLUMN));
        columns
    }

    /// Turn one source row into insert values, or explain why it can't be
    fn coerce(
        &self,
        row: &SourceRow,
        map_data_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<SimpleExpr>, RowCoercionError> {
        let mut texts: Vec<Option<String>> = Vec::with_capacity(self.data_columns.len());

        for column in &self.data_columns {
            // Short rows and columns without a source position load as null
            let cell = column
                .source_index
                .and_then(|index| row.cells.get(index))
                .unwrap_or(&Cell::Empty);

            let value = match cell {
                Cell::Empty => None,
                Cell::Text(text) => {
                    if text.chars().count() > TEXT_COLUMN_LENGTH as usize {
                        return Err(RowCoercionError::new(
                            row.number,
                            Some(column.name.clone()),
                            format!(
                                "value in column '{}' exceeds {} characters",
                                column.name, TEXT_COLUMN_LENGTH
                            ),
                        ));
                    }
                    Some(text.clone())
                }
                Cell::Invalid(reason) => {
                    return Err(RowCoercionError::new(
                        row.number,
                        Some(column.name.clone()),
                        format!("column '{}' holds an error value: {}", column.name, reason),
                    ))
                }
            };
            texts.push(value);
        }

        // Unparseable coordinates leave the point null; resolution reports them
        let location = self.coordinates.and_then(|(lat, lng)| {
            let lat = texts[lat].as_deref()?;
            let lng = texts[lng].as_deref()?;
            Point::parse(lat, lng).ok().map(|point| point.to_geojson())
        });

        let mut values: Vec<SimpleExpr> = Vec::with_capacity(texts.len() + 4);
        values.push(map_data_id.to_string().into());
        values.extend(texts.into_iter().map(SimpleExpr::from));
        values.push(location.into());
        values.push(now.into());
        values.push(now.into());
        Ok(values)
    }
}

/// Whether every cell of the row is blank
fn is_blank(row: &SourceRow) -> bool {
    row.cells.iter().all(Cell::is_empty)
}

/// Stream the data rows of `file` into `table_name`.
///
/// The table must already have the shape `manifest` describes. Rows that
/// cannot be coerced are recorded in the report and skipped; fully blank rows
/// are skipped silently. A store failure aborts the load with the number of
/// rows committed so far.
pub async fn load(
    db: &DatabaseConnection,
    table_name: &str,
    manifest: &ColumnManifest,
    map_data_id: &str,
    file: &TabularFile,
    chunk_size: usize,
) -> Result<LoadReport, UploadError> {
    let chunk_size = chunk_size.max(1);
    let plan = RowPlan::new(manifest);
    let columns = plan.insert_columns();
    let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);

    let mut report = LoadReport::default();
    let mut rows = file
        .rows()
        .map_err(|e| UploadError::row_loading(0, e))?;

    // Header row
    rows.next_row();

    loop {
        let chunk = rows.next_chunk(chunk_size);
        if chunk.is_empty() {
            break;
        }

        let now = chrono::Utc::now();
        let mut records = Vec::with_capacity(chunk.len());
        for row in chunk {
            match row {
                Ok(row) if is_blank(&row) => continue,
                Ok(row) => match plan.coerce(&row, map_data_id, now) {
                    Ok(values) => records.push(values),
                    Err(err) => {
                        debug!("Skipping {}", err);
                        report.errors.push(err);
                    }
                },
                Err(UnreadableRow { number, reason }) => {
                    report
                        .errors
                        .push(RowCoercionError::new(number, None, reason));
                }
            }
        }

        if records.is_empty() {
            continue;
        }

        let inserted = records.len();
        let statements = insert_statements(table_name, &columns, records, rows_per_statement)
            .map_err(|e| UploadError::row_loading(report.rows_loaded, e))?;
        insert_chunk(db, &statements)
            .await
            .map_err(|e| UploadError::row_loading(report.rows_loaded, e))?;

        report.rows_loaded += inserted;
        report.batches += 1;
        debug!(
            "Committed batch {} into {} ({} rows, {} total)",
            report.batches, table_name, inserted, report.rows_loaded
        );
    }

    info!(
        "Loaded {} rows into {} in {} batches ({} rows skipped)",
        report.rows_loaded,
        table_name,
        report.batches,
        report.errors.len()
    );

    Ok(report)
}

fn insert_statements(
    table_name: &str,
    columns: &[Alias],
    records: Vec<Vec<SimpleExpr>>,
    rows_per_statement: usize,
) -> Result<Vec<InsertStatement>, DataSetError> {
    let mut statements = Vec::new();
    let mut records = records.into_iter().peekable();

    while records.peek().is_some() {
        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(table_name))
            .columns(columns.iter().cloned());
        for values in records.by_ref().take(rows_per_statement) {
            insert
                .values(values)
                .map_err(|e| DataSetError::InvalidManifest(e.to_string()))?;
        }
        statements.push(insert);
    }

    Ok(statements)
}

async fn insert_chunk(
    db: &DatabaseConnection,
    statements: &[InsertStatement],
) -> Result<(), DataSetError> {
    let backend = db.get_database_backend();
    let txn = db.begin().await?;
    for statement in statements {
        txn.execute(backend.build(statement)).await?;
    }
    txn.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_utils::setup_test_db;
    use crate::pipeline::header_extractor::extract_header_row;
    use crate::pipeline::schema::synthesize;
    use sea_orm::{QueryResult, Statement};

    async fn prepare(
        db: &DatabaseConnection,
        table: &str,
        body: String,
    ) -> (ColumnManifest, TabularFile) {
        let file = TabularFile::from_bytes("upload.csv", body.into_bytes()).unwrap();
        let header = extract_header_row(&file).unwrap();
        let manifest = synthesize(db, table, &header.with_reserved_columns())
            .await
            .unwrap();
        (manifest, file)
    }

    async fn fetch(db: &DatabaseConnection, sql: &str) -> Vec<QueryResult> {
        db.query_all(Statement::from_string(db.get_database_backend(), sql.to_string()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_loads_in_chunks() {
        let db = setup_test_db().await;
        let mut body = String::from("Name,Value\n");
        for i in 0..2500 {
            body.push_str(&format!("row {},{}\n", i, i * 2));
        }
        let (manifest, file) = prepare(&db, "mp_data_chunks_00000001", body).await;

        let report = load(&db, "mp_data_chunks_00000001", &manifest, "ds-1", &file, 1000)
            .await
            .unwrap();

        assert_eq!(report.rows_loaded, 2500);
        assert_eq!(report.batches, 3);
        assert!(report.errors.is_empty());

        let rows = fetch(
            &db,
            "SELECT COUNT(*) AS n FROM mp_data_chunks_00000001 WHERE map_data_id = 'ds-1'",
        )
        .await;
        assert_eq!(rows[0].try_get::<i64>("", "n").unwrap(), 2500);
    }

    #[tokio::test]
    async fn test_short_rows_fill_nulls() {
        let db = setup_test_db().await;
        let (manifest, file) =
            prepare(&db, "mp_data_short_00000001", "A,B,C\n1\n1,2\n".to_string()).await;

        let report = load(&db, "mp_data_short_00000001", &manifest, "ds", &file, 10)
            .await
            .unwrap();
        assert_eq!(report.rows_loaded, 2);
        assert!(report.errors.is_empty());

        let rows = fetch(&db, "SELECT a, b, c FROM mp_data_short_00000001 ORDER BY id").await;
        assert_eq!(rows[0].try_get::<Option<String>>("", "a").unwrap(), Some("1".into()));
        assert_eq!(rows[0].try_get::<Option<String>>("", "b").unwrap(), None);
        assert_eq!(rows[1].try_get::<Option<String>>("", "b").unwrap(), Some("2".into()));
        assert_eq!(rows[1].try_get::<Option<String>>("", "c").unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_cell_is_a_row_error() {
        let db = setup_test_db().await;
        let body = format!("Name,Note\nok,fine\nbad,{}\nalso ok,\n", "x".repeat(300));
        let (manifest, file) = prepare(&db, "mp_data_long_00000001", body).await;

        let report = load(&db, "mp_data_long_00000001", &manifest, "ds", &file, 1000)
            .await
            .unwrap();
        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 3);
        assert_eq!(report.errors[0].column.as_deref(), Some("note"));
    }

    #[tokio::test]
    async fn test_blank_header_column_is_not_loaded() {
        let db = setup_test_db().await;
        let (manifest, file) =
            prepare(&db, "mp_data_gap_00000001", "Name,,Town\nAda,skip,London\n".to_string())
                .await;

        load(&db, "mp_data_gap_00000001", &manifest, "ds", &file, 1000)
            .await
            .unwrap();

        let rows = fetch(&db, "SELECT name, town FROM mp_data_gap_00000001").await;
        assert_eq!(rows[0].try_get::<String>("", "town").unwrap(), "London");
    }

    #[tokio::test]
    async fn test_location_point_is_derived() {
        let db = setup_test_db().await;
        let body = "Name,Latitude,Longitude\nNairobi CBD,-1.2833,36.8167\nNowhere,north,east\n";
        let (manifest, file) = prepare(&db, "mp_data_loc_00000001", body.to_string()).await;

        let report = load(&db, "mp_data_loc_00000001", &manifest, "ds", &file, 1000)
            .await
            .unwrap();
        assert_eq!(report.rows_loaded, 2);

        let rows = fetch(&db, "SELECT location_point FROM mp_data_loc_00000001 ORDER BY id").await;
        let point: Option<String> = rows[0].try_get("", "location_point").unwrap();
        let point: serde_json::Value = serde_json::from_str(&point.unwrap()).unwrap();
        assert_eq!(point["coordinates"][0], 36.8167);
        assert_eq!(point["coordinates"][1], -1.2833);
        assert_eq!(
            rows[1].try_get::<Option<String>>("", "location_point").unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_missing_table_reports_rows_loaded() {
        let db = setup_test_db().await;
        let file = TabularFile::from_bytes("a.csv", b"Name\nx\n".to_vec()).unwrap();
        let manifest = ColumnManifest::from_names(&["id", "map_data_id", "name"]).unwrap();

        let err = load(&db, "mp_data_absent_00000001", &manifest, "ds", &file, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.rows_loaded, 0);
        assert_eq!(err.stage, crate::errors::UploadStage::RowLoading);
    }
}
