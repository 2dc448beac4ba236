//! Schema synthesis for uploaded files.
//!
//! Every upload gets a physical table built from its header row: one nullable
//! text column per distinct sanitized header, plus the system columns below.
//! Synthesis is destructive: a table with the same name is dropped first, since
//! a re-upload may change the column shape entirely.

use sea_orm::sea_query::{Alias, ColumnDef, Table, TableCreateStatement, TableDropStatement};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::errors::data_set::is_connectivity_error;
use crate::errors::{DataSetError, DataSetResult};

use super::header_extractor::{HeaderCell, ID_COLUMN, MAP_DATA_ID_COLUMN};
use super::identifier::{is_valid_identifier, sanitize};

/// Derived GeoJSON point for rows that carry a coordinate pair
pub const LOCATION_COLUMN: &str = "location_point";
/// Resolved boundary reference written by the resolution job
pub const BOUNDARY_ID_COLUMN: &str = "boundary_id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Columns every synthesized table has besides `id` and `map_data_id`
pub const SYSTEM_COLUMNS: [&str; 4] = [
    LOCATION_COLUMN,
    BOUNDARY_ID_COLUMN,
    CREATED_AT_COLUMN,
    UPDATED_AT_COLUMN,
];

/// Maximum length of a data cell
pub const TEXT_COLUMN_LENGTH: u32 = 255;

const LATITUDE_NAMES: [&str; 2] = ["latitude", "lat"];

/// One column of a manifest and where its values come from in the source rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestColumn {
    pub name: String,
    pub source_index: Option<usize>,
}

impl ManifestColumn {
    pub fn is_reserved(&self) -> bool {
        is_reserved_name(&self.name)
    }
}

fn is_reserved_name(name: &str) -> bool {
    name == ID_COLUMN || name == MAP_DATA_ID_COLUMN
}

/// Ordered, de-duplicated, sanitized column names backing a map data table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnManifest {
    columns: Vec<ManifestColumn>,
}

impl ColumnManifest {
    /// Sanitize `headers` into a manifest. A header that sanitizes to a name
    /// already taken is discarded (first occurrence wins), as is one that
    /// collides with a system column.
    pub fn build(headers: &[HeaderCell]) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut columns = Vec::with_capacity(headers.len());

        for header in headers {
            let name = sanitize(&header.raw);

            if SYSTEM_COLUMNS.contains(&name.as_str()) {
                warn!(
                    "Header '{}' collides with system column '{}', discarding it",
                    header.raw, name
                );
                continue;
            }

            if !seen.insert(name.clone()) {
                debug!(
                    "Header '{}' duplicates column '{}', discarding it",
                    header.raw, name
                );
                continue;
            }

            columns.push(ManifestColumn {
                name,
                source_index: header.source_index,
            });
        }

        Self { columns }
    }

    /// Rebuild a manifest from persisted column names. The result carries no
    /// source positions; it describes an existing table rather than a file.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> DataSetResult<Self> {
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !is_valid_identifier(name) {
                return Err(DataSetError::InvalidManifest(format!(
                    "'{}' is not a valid column identifier",
                    name
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(DataSetError::InvalidManifest(format!(
                    "column '{}' appears more than once",
                    name
                )));
            }
            columns.push(ManifestColumn {
                name: name.to_string(),
                source_index: None,
            });
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ManifestColumn] {
        &self.columns
    }

    /// All column names, reserved ones included, in manifest order
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns holding file data (everything except `id` and `map_data_id`)
    pub fn data_columns(&self) -> impl Iterator<Item = &ManifestColumn> {
        self.columns.iter().filter(|c| !c.is_reserved())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// The (latitude, longitude) columns if the manifest carries a usable pair:
    /// `latitude`+`longitude`, or `lat`+`lng`/`lon`, matched case-insensitively.
    pub fn coordinate_columns(&self) -> Option<(String, String)> {
        coordinate_columns(&self.names())
    }

    pub fn to_json(&self) -> DataSetResult<String> {
        Ok(serde_json::to_string(&self.names())?)
    }
}

/// Find a usable coordinate pair among `names`
pub fn coordinate_columns<S: AsRef<str>>(names: &[S]) -> Option<(String, String)> {
    let find = |wanted: &str| {
        names
            .iter()
            .map(|n| n.as_ref())
            .find(|n| n.eq_ignore_ascii_case(wanted))
            .map(str::to_string)
    };

    for lat_name in LATITUDE_NAMES {
        let Some(lat) = find(lat_name) else {
            continue;
        };
        let longitude_names: &[&str] = if lat_name == "latitude" {
            &["longitude"]
        } else {
            &["lng", "lon"]
        };
        if let Some(lng) = longitude_names.iter().find_map(|n| find(*n)) {
            return Some((lat, lng));
        }
    }
    None
}

/// Build the CREATE TABLE statement for `table_name`
pub fn create_table_statement(table_name: &str, manifest: &ColumnManifest) -> TableCreateStatement {
    let mut create = Table::create();
    create
        .table(Alias::new(table_name))
        .col(
            ColumnDef::new(Alias::new(ID_COLUMN))
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(Alias::new(MAP_DATA_ID_COLUMN)).string().null());

    for column in manifest.data_columns() {
        create.col(
            ColumnDef::new(Alias::new(column.name.as_str()))
                .string_len(TEXT_COLUMN_LENGTH)
                .null(),
        );
    }

    create
        .col(ColumnDef::new(Alias::new(LOCATION_COLUMN)).text().null())
        .col(ColumnDef::new(Alias::new(BOUNDARY_ID_COLUMN)).integer().null())
        .col(ColumnDef::new(Alias::new(CREATED_AT_COLUMN)).timestamp().not_null())
        .col(ColumnDef::new(Alias::new(UPDATED_AT_COLUMN)).timestamp().not_null());

    create.to_owned()
}

pub fn drop_table_statement(table_name: &str) -> TableDropStatement {
    Table::drop()
        .table(Alias::new(table_name))
        .if_exists()
        .to_owned()
}

/// Validate `table_name` and build the manifest `headers` would produce
pub fn prepare(table_name: &str, headers: &[HeaderCell]) -> DataSetResult<ColumnManifest> {
    if !is_valid_identifier(table_name) {
        return Err(DataSetError::SchemaSynthesis {
            table: table_name.to_string(),
            reason: "table name is not a valid identifier".to_string(),
        });
    }

    let manifest = ColumnManifest::build(headers);
    if manifest.data_columns().next().is_none() {
        return Err(DataSetError::SchemaSynthesis {
            table: table_name.to_string(),
            reason: "no data columns remain after sanitization".to_string(),
        });
    }

    Ok(manifest)
}

/// Drop any existing `table_name` and create it for `manifest` on `conn`.
///
/// Callers run this inside a transaction; SQLite DDL is transactional, so a
/// rollback restores the previous table.
pub async fn apply<C: ConnectionTrait>(
    conn: &C,
    table_name: &str,
    manifest: &ColumnManifest,
) -> DataSetResult<()> {
    let to_error = |err: DbErr| synthesis_error(table_name, err);
    let backend = conn.get_database_backend();

    conn.execute(backend.build(&drop_table_statement(table_name)))
        .await
        .map_err(to_error)?;
    conn.execute(backend.build(&create_table_statement(table_name, manifest)))
        .await
        .map_err(to_error)?;
    Ok(())
}

/// (Re)create `table_name` for `headers` and return the applied manifest.
///
/// The drop and the create run in one transaction, so a failed synthesis
/// leaves any previous table with this name intact.
pub async fn synthesize(
    db: &DatabaseConnection,
    table_name: &str,
    headers: &[HeaderCell],
) -> DataSetResult<ColumnManifest> {
    let manifest = prepare(table_name, headers)?;

    let txn = db
        .begin()
        .await
        .map_err(|e| synthesis_error(table_name, e))?;
    apply(&txn, table_name, &manifest).await?;
    txn.commit()
        .await
        .map_err(|e| synthesis_error(table_name, e))?;

    info!(
        "Synthesized table {} with {} columns",
        table_name,
        manifest.columns().len()
    );

    Ok(manifest)
}

pub(crate) fn synthesis_error(table_name: &str, err: DbErr) -> DataSetError {
    if is_connectivity_error(&err) {
        DataSetError::StoreUnavailable(err.to_string())
    } else {
        DataSetError::SchemaSynthesis {
            table: table_name.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_utils::setup_test_db;
    use sea_orm::sea_query::SqliteQueryBuilder;
    use sea_orm_migration::SchemaManager;

    fn headers(names: &[&str]) -> Vec<HeaderCell> {
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
        cells.extend(names.iter().enumerate().map(|(i, n)| HeaderCell {
            source_index: Some(i),
            raw: n.to_string(),
        }));
        cells
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let manifest = ColumnManifest::build(&headers(&["Name", "name", "NAME"]));
        assert_eq!(manifest.names(), vec!["id", "map_data_id", "name"]);
        assert_eq!(manifest.columns()[2].source_index, Some(0));
    }

    #[test]
    fn test_user_id_header_does_not_replace_surrogate_key() {
        let manifest = ColumnManifest::build(&headers(&["ID", "Town"]));
        assert_eq!(manifest.names(), vec!["id", "map_data_id", "town"]);
        assert_eq!(manifest.columns()[0].source_index, None);
    }

    #[test]
    fn test_system_column_collisions_are_discarded() {
        let manifest = ColumnManifest::build(&headers(&["Created At", "Boundary ID", "Shop"]));
        assert_eq!(manifest.names(), vec!["id", "map_data_id", "shop"]);
    }

    #[test]
    fn test_coordinate_detection() {
        let names = |cols: &[&str]| cols.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            coordinate_columns(&names(&["name", "latitude", "longitude"])),
            Some(("latitude".into(), "longitude".into()))
        );
        assert_eq!(
            coordinate_columns(&names(&["LAT", "Lon"])),
            Some(("LAT".into(), "Lon".into()))
        );
        assert_eq!(
            coordinate_columns(&names(&["lat", "lng"])),
            Some(("lat".into(), "lng".into()))
        );
        assert_eq!(coordinate_columns(&names(&["latitude", "lng"])), None);
        assert_eq!(coordinate_columns(&names(&["name", "town"])), None);
    }

    #[test]
    fn test_from_names_validates() {
        assert!(ColumnManifest::from_names(&["id", "map_data_id", "name"]).is_ok());
        assert!(matches!(
            ColumnManifest::from_names(&["id", "Bad Name"]),
            Err(DataSetError::InvalidManifest(_))
        ));
        assert!(matches!(
            ColumnManifest::from_names(&["name", "name"]),
            Err(DataSetError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_create_statement_shape() {
        let manifest = ColumnManifest::build(&headers(&["Name", "Latitude"]));
        let sql = create_table_statement("mp_data_shops_ab12cd34", &manifest)
            .to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"CREATE TABLE "mp_data_shops_ab12cd34""#));
        assert!(sql.contains(r#""id" integer NOT NULL PRIMARY KEY AUTOINCREMENT"#));
        assert!(sql.contains(r#""name" varchar(255)"#));
        assert!(sql.contains(r#""latitude" varchar(255)"#));
        assert!(sql.contains(r#""boundary_id" integer"#));
        assert_eq!(sql.matches(r#""id""#).count(), 1);
    }

    #[tokio::test]
    async fn test_synthesize_recreates_table() {
        let db = setup_test_db().await;
        let manager = SchemaManager::new(&db);

        synthesize(&db, "mp_data_t_00000001", &headers(&["Alpha", "Beta"]))
            .await
            .unwrap();
        assert!(manager.has_column("mp_data_t_00000001", "alpha").await.unwrap());

        let manifest = synthesize(&db, "mp_data_t_00000001", &headers(&["Gamma"]))
            .await
            .unwrap();
        assert_eq!(manifest.names(), vec!["id", "map_data_id", "gamma"]);
        assert!(manager.has_column("mp_data_t_00000001", "gamma").await.unwrap());
        assert!(!manager.has_column("mp_data_t_00000001", "alpha").await.unwrap());
    }

    #[tokio::test]
    async fn test_synthesize_rejects_bad_table_name() {
        let db = setup_test_db().await;
        let err = synthesize(&db, "drop table; --", &headers(&["A"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DataSetError::SchemaSynthesis { .. }));
    }
}
