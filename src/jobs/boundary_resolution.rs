//! Boundary resolution: assign each row's coordinate to its containing boundary.
//!
//! The job is a pure function of `(table_name, manifest)`. It only touches
//! rows whose `boundary_id` is still null, and each update re-checks that
//! condition, so re-running it (or racing another run) never rewrites a row.

use sea_orm::sea_query::{Alias, Expr, Order, Query};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, TransactionTrait};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::entities::boundaries;
use crate::errors::{ResolutionError, ResolutionResult};
use crate::geometry::Point;
use crate::pipeline::header_extractor::ID_COLUMN;
use crate::pipeline::identifier::is_valid_identifier;
use crate::pipeline::schema::{coordinate_columns, ColumnManifest, BOUNDARY_ID_COLUMN, UPDATED_AT_COLUMN};
use crate::services::boundary_service::BoundaryIndex;
use crate::services::table_lifecycle::{table_columns, table_exists};

/// Rows fetched per scan page
const PAGE_SIZE: u64 = 1000;

/// Why a run did no work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoopReason {
    /// The manifest has no latitude/longitude pair
    NoCoordinates,
    /// The table was dropped before the job ran
    TableMissing,
}

/// A row whose coordinate could not be turned into a point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowResolutionError {
    pub row_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub table_name: String,
    pub noop: Option<NoopReason>,
    /// Rows with both coordinates and no boundary at the time they were read
    pub scanned: usize,
    pub resolved: usize,
    /// Valid points no boundary contains
    pub unresolved: usize,
    pub errors: Vec<RowResolutionError>,
}

impl ResolutionReport {
    fn noop(table_name: &str, reason: NoopReason) -> Self {
        Self {
            table_name: table_name.to_string(),
            noop: Some(reason),
            ..Default::default()
        }
    }
}

/// Resolve boundaries for every unresolved row of `table_name`.
///
/// Per-row problems are recorded in the report. A manifest naming columns the
/// table lacks fails with `InvalidManifest`; store failures are returned as
/// errors and the worker retries the run when the store was unreachable.
pub async fn resolve_boundaries(
    db: &DatabaseConnection,
    table_name: &str,
    manifest: &[String],
) -> ResolutionResult<ResolutionReport> {
    let invalid = |reason: String| ResolutionError::InvalidManifest {
        table: table_name.to_string(),
        reason,
    };
    if !is_valid_identifier(table_name) {
        return Err(invalid("table name is not a valid identifier".to_string()));
    }
    ColumnManifest::from_names(manifest).map_err(|e| invalid(e.to_string()))?;

    let Some((lat_column, lng_column)) = coordinate_columns(manifest) else {
        debug!("No coordinate columns in {}, nothing to resolve", table_name);
        return Ok(ResolutionReport::noop(table_name, NoopReason::NoCoordinates));
    };

    if !table_exists(db, table_name).await? {
        info!("Table {} no longer exists, skipping resolution", table_name);
        return Ok(ResolutionReport::noop(table_name, NoopReason::TableMissing));
    }

    // SQLite reads an unknown double-quoted column as a string literal, so a
    // stale manifest would otherwise scan without error
    let existing = table_columns(db, table_name).await?;
    let missing: Vec<&str> = [lat_column.as_str(), lng_column.as_str(), BOUNDARY_ID_COLUMN]
        .into_iter()
        .filter(|column| !existing.iter().any(|name| name.as_str() == *column))
        .collect();
    if !missing.is_empty() {
        return Err(invalid(format!("table has no column {}", missing.join(", "))));
    }

    let index = BoundaryIndex::from_models(boundaries::Entity::find().all(db).await?);
    let backend = db.get_database_backend();
    let mut report = ResolutionReport {
        table_name: table_name.to_string(),
        ..Default::default()
    };

    // Keyset pagination: resolved rows drop out of the filter as we go
    let mut last_id: i64 = 0;
    loop {
        let page = Query::select()
            .column(Alias::new(ID_COLUMN))
            .column(Alias::new(lat_column.as_str()))
            .column(Alias::new(lng_column.as_str()))
            .from(Alias::new(table_name))
            .and_where(Expr::col(Alias::new(ID_COLUMN)).gt(last_id))
            .and_where(Expr::col(Alias::new(lat_column.as_str())).is_not_null())
            .and_where(Expr::col(Alias::new(lng_column.as_str())).is_not_null())
            .and_where(Expr::col(Alias::new(BOUNDARY_ID_COLUMN)).is_null())
            .order_by(Alias::new(ID_COLUMN), Order::Asc)
            .limit(PAGE_SIZE)
            .to_owned();
        let rows = db.query_all(backend.build(&page)).await?;
        if rows.is_empty() {
            break;
        }

        let mut assignments: Vec<(i64, i32)> = Vec::new();
        for row in &rows {
            let row_id: i64 = row.try_get("", ID_COLUMN)?;
            let lat: String = row.try_get("", &lat_column)?;
            let lng: String = row.try_get("", &lng_column)?;
            last_id = row_id;
            report.scanned += 1;

            match Point::parse(&lat, &lng) {
                Ok(point) => match index.locate(&point) {
                    Some(found) => assignments.push((row_id, found.id)),
                    None => report.unresolved += 1,
                },
                Err(err) => report.errors.push(RowResolutionError {
                    row_id,
                    reason: err.to_string(),
                }),
            }
        }

        if !assignments.is_empty() {
            let now = chrono::Utc::now();
            let txn = db.begin().await?;
            for (row_id, boundary_id) in assignments {
                let update = Query::update()
                    .table(Alias::new(table_name))
                    .value(Alias::new(BOUNDARY_ID_COLUMN), boundary_id)
                    .value(Alias::new(UPDATED_AT_COLUMN), now)
                    .and_where(Expr::col(Alias::new(ID_COLUMN)).eq(row_id))
                    .and_where(Expr::col(Alias::new(BOUNDARY_ID_COLUMN)).is_null())
                    .to_owned();
                let result = txn.execute(backend.build(&update)).await?;
                if result.rows_affected() > 0 {
                    report.resolved += 1;
                }
            }
            txn.commit().await?;
        }

        debug!(
            "Resolution of {}: {} scanned, {} resolved so far",
            table_name, report.scanned, report.resolved
        );

        if (rows.len() as u64) < PAGE_SIZE {
            break;
        }
    }

    info!(
        "Resolved {} of {} rows in {} ({} unresolved, {} invalid)",
        report.resolved,
        report.scanned,
        table_name,
        report.unresolved,
        report.errors.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_utils::setup_test_db;
    use crate::geometry::square_geojson;
    use crate::pipeline::{extract_header_row, load, synthesize, TabularFile};
    use sea_orm::{ActiveModelTrait, Set, Statement};

    async fn boundary(
        db: &DatabaseConnection,
        name: &str,
        kind: &str,
        code: i32,
        parent: (&str, &str),
        geometry: String,
    ) -> i32 {
        let now = chrono::Utc::now();
        boundaries::ActiveModel {
            name: Set(name.to_string()),
            code: Set(code),
            boundary_type: Set(kind.to_string()),
            parent_type: Set(parent.0.to_string()),
            parent_code: Set(parent.1.to_string()),
            geometry: Set(Some(geometry)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
        .id
    }

    async fn loaded_table(db: &DatabaseConnection, table: &str, body: &str) -> Vec<String> {
        let file = TabularFile::from_bytes("points.csv", body.as_bytes().to_vec()).unwrap();
        let header = extract_header_row(&file).unwrap();
        let manifest = synthesize(db, table, &header.with_reserved_columns())
            .await
            .unwrap();
        load(db, table, &manifest, "ds", &file, 1000).await.unwrap();
        manifest.names()
    }

    async fn boundary_ids(db: &DatabaseConnection, table: &str) -> Vec<Option<i32>> {
        let rows = db
            .query_all(Statement::from_string(
                db.get_database_backend(),
                format!("SELECT boundary_id FROM {} ORDER BY id", table),
            ))
            .await
            .unwrap();
        rows.iter()
            .map(|r| r.try_get::<Option<i32>>("", "boundary_id").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_ward_beats_constituency_and_reruns_are_noops() {
        let db = setup_test_db().await;
        boundary(&db, "Nairobi", "county", 47, ("country", "0"), square_geojson(36.8, -1.28, 0.5)).await;
        boundary(&db, "Starehe", "constituency", 290, ("county", "47"), square_geojson(36.82, -1.28, 0.1)).await;
        let ward = boundary(&db, "Nairobi Central", "ward", 1441, ("constituency", "290"), square_geojson(36.8167, -1.2833, 0.01)).await;

        let table = "mp_data_points_00000001";
        let manifest = loaded_table(
            &db,
            table,
            "Name,Latitude,Longitude\nNairobi CBD,-1.2833,36.8167\nAtlantic,0,-30\nBad,abc,36.8\nMissing,,\n",
        )
        .await;

        let first = resolve_boundaries(&db, table, &manifest).await.unwrap();
        assert_eq!(first.scanned, 3);
        assert_eq!(first.resolved, 1);
        assert_eq!(first.unresolved, 1);
        assert_eq!(first.errors.len(), 1);
        assert_eq!(first.errors[0].row_id, 3);

        let after_first = boundary_ids(&db, table).await;
        assert_eq!(after_first, vec![Some(ward), None, None, None]);

        let second = resolve_boundaries(&db, table, &manifest).await.unwrap();
        assert_eq!(second.resolved, 0);
        assert_eq!(boundary_ids(&db, table).await, after_first);
    }

    #[tokio::test]
    async fn test_no_coordinates_is_a_noop() {
        let db = setup_test_db().await;
        let table = "mp_data_plain_00000001";
        let manifest = loaded_table(&db, table, "Name,Town\nA,B\n").await;

        let report = resolve_boundaries(&db, table, &manifest).await.unwrap();
        assert_eq!(report.noop, Some(NoopReason::NoCoordinates));
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn test_dropped_table_is_a_noop() {
        let db = setup_test_db().await;
        let manifest = vec![
            "id".to_string(),
            "map_data_id".to_string(),
            "lat".to_string(),
            "lng".to_string(),
        ];
        let report = resolve_boundaries(&db, "mp_data_gone_00000001", &manifest)
            .await
            .unwrap();
        assert_eq!(report.noop, Some(NoopReason::TableMissing));
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_rejected() {
        let db = setup_test_db().await;
        let manifest = vec!["Not Valid".to_string()];
        let err = resolve_boundaries(&db, "mp_data_x_00000001", &manifest)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidManifest { .. }));
        assert!(!err.is_retryable());
    }
}
