//! Keeps a map data record and its synthesized table in step.
//!
//! Creation is synthesize-then-record: the table is (re)built and the record's
//! `data_table`/`data_columns` are written in the same transaction, so the
//! record never points at a half-created table. Deletion is drop-then-delete,
//! again in one transaction.

use sea_orm::sea_query::{Alias, Table};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Set, Statement,
    TransactionTrait,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::database::entities::map_data;
use crate::errors::{DataSetError, DataSetResult};
use crate::pipeline::header_extractor::HeaderCell;
use crate::pipeline::identifier::{sanitize, MAX_IDENTIFIER_LEN};
use crate::pipeline::schema::{self, synthesis_error, ColumnManifest};

/// Namespace every synthesized table name starts with
pub const TABLE_PREFIX: &str = "mp_data_";

const SUFFIX_LEN: usize = 8;

/// Build a fresh backing table name: `mp_data_<sanitized name>_<random suffix>`
pub fn generate_table_name(map_data_name: &str) -> String {
    let budget = MAX_IDENTIFIER_LEN - TABLE_PREFIX.len() - 1 - SUFFIX_LEN;
    let mut base = sanitize(map_data_name);
    if base.len() > budget {
        base.truncate(budget);
        base = base.trim_end_matches('_').to_string();
    }
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}_{}", TABLE_PREFIX, base, &token[..SUFFIX_LEN])
}

/// Whether `table_name` lies in the synthesized-table namespace
pub fn is_synthesized_table(table_name: &str) -> bool {
    table_name.starts_with(TABLE_PREFIX) && table_name.len() > TABLE_PREFIX.len()
}

/// What happened to a record's backing table during deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "table", rename_all = "snake_case")]
pub enum DropOutcome {
    Dropped(String),
    /// The stored name was outside the synthesized namespace; left in place
    Skipped(String),
    /// Nothing to drop, the table was already gone
    AlreadyAbsent(String),
    /// The record never had a backing table
    NoTable,
}

/// Result of `ensure_table_for`
#[derive(Debug, Clone)]
pub struct EnsuredTable {
    pub table_name: String,
    pub manifest: ColumnManifest,
    pub record: map_data::Model,
}

#[derive(Clone)]
pub struct TableLifecycleManager {
    db: DatabaseConnection,
}

impl TableLifecycleManager {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// (Re)synthesize the backing table of `record` for `headers` and persist
    /// the table name and applied manifest onto the record.
    ///
    /// An existing synthesized table name is reused; a record without one (or
    /// with a name outside the namespace) gets a new generated name.
    pub async fn ensure_table_for(
        &self,
        record: &map_data::Model,
        headers: &[HeaderCell],
    ) -> DataSetResult<EnsuredTable> {
        let table_name = match record.data_table.as_deref() {
            Some(existing) if is_synthesized_table(existing) => existing.to_string(),
            Some(existing) if !existing.is_empty() => {
                warn!(
                    "Map data {} points at unmanaged table {}, synthesizing a new one",
                    record.id, existing
                );
                generate_table_name(&record.name)
            }
            _ => generate_table_name(&record.name),
        };

        let manifest = schema::prepare(&table_name, headers)?;
        let columns_json = manifest.to_json()?;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| synthesis_error(&table_name, e))?;
        schema::apply(&txn, &table_name, &manifest).await?;

        let mut active: map_data::ActiveModel = record.clone().into();
        active.data_table = Set(Some(table_name.clone()));
        active.data_columns = Set(Some(columns_json));
        let record = active
            .set_updated_at()
            .update(&txn)
            .await
            .map_err(|e| synthesis_error(&table_name, e))?;

        txn.commit()
            .await
            .map_err(|e| synthesis_error(&table_name, e))?;

        info!(
            "Map data {} now backed by {} ({} columns)",
            record.id,
            table_name,
            manifest.columns().len()
        );

        Ok(EnsuredTable {
            table_name,
            manifest,
            record,
        })
    }

    /// Drop the backing table of `id` and delete the record, in one transaction
    pub async fn delete_with_table(&self, id: &str) -> DataSetResult<DropOutcome> {
        let record = map_data::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| DataSetError::NotFound(id.to_string()))?;

        let txn = self.db.begin().await?;
        let outcome = drop_table_for(&txn, &record).await?;
        map_data::Entity::delete_by_id(record.id.clone())
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!("Deleted map data {} ({:?})", record.id, outcome);
        Ok(outcome)
    }
}

/// Drop the backing table of `record` on `conn`, if it is one we synthesized.
///
/// Must run before the record itself is deleted. A name outside the namespace
/// is never dropped; a table that is already gone is not an error.
pub async fn drop_table_for<C: ConnectionTrait>(
    conn: &C,
    record: &map_data::Model,
) -> DataSetResult<DropOutcome> {
    let table_name = match record.data_table.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => return Ok(DropOutcome::NoTable),
    };

    if !is_synthesized_table(table_name) {
        warn!(
            "Skipping drop of table {} for map data {}: not a synthesized table",
            table_name, record.id
        );
        return Ok(DropOutcome::Skipped(table_name.to_string()));
    }

    if !table_exists(conn, table_name).await? {
        info!(
            "Table {} for map data {} already absent",
            table_name, record.id
        );
        return Ok(DropOutcome::AlreadyAbsent(table_name.to_string()));
    }

    let drop = Table::drop().table(Alias::new(table_name)).to_owned();
    conn.execute(conn.get_database_backend().build(&drop)).await?;

    info!("Dropped table {} for map data {}", table_name, record.id);
    Ok(DropOutcome::Dropped(table_name.to_string()))
}

/// Whether a table named `table_name` exists
pub async fn table_exists<C: ConnectionTrait>(conn: &C, table_name: &str) -> Result<bool, DbErr> {
    let statement = Statement::from_sql_and_values(
        conn.get_database_backend(),
        "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table_name.into()],
    );
    let row = conn.query_one(statement).await?;
    let count: i64 = match row {
        Some(row) => row.try_get("", "n")?,
        None => 0,
    };
    Ok(count > 0)
}

/// Column names of `table_name` in declaration order; empty if it does not exist
pub async fn table_columns<C: ConnectionTrait>(
    conn: &C,
    table_name: &str,
) -> Result<Vec<String>, DbErr> {
    let statement = Statement::from_sql_and_values(
        conn.get_database_backend(),
        "SELECT name FROM pragma_table_info(?) ORDER BY cid",
        [table_name.into()],
    );
    conn.query_all(statement)
        .await?
        .iter()
        .map(|row| row.try_get("", "name"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_utils::setup_test_db;
    use crate::pipeline::identifier::is_valid_identifier;
    use sea_orm::sea_query::ColumnDef;

    fn headers(names: &[&str]) -> Vec<HeaderCell> {
        let mut cells = vec![
            HeaderCell {
                source_index: None,
                raw: "id".to_string(),
            },
            HeaderCell {
                source_index: None,
                raw: "map_data_id".to_string(),
            },
        ];
        cells.extend(names.iter().enumerate().map(|(i, n)| HeaderCell {
            source_index: Some(i),
            raw: n.to_string(),
        }));
        cells
    }

    async fn insert_record(db: &DatabaseConnection, name: &str) -> map_data::Model {
        let mut active = map_data::ActiveModel::new();
        active.name = Set(name.to_string());
        active.user_id = Set(1);
        active.insert(db).await.unwrap()
    }

    #[test]
    fn test_generated_names() {
        let name = generate_table_name("Retail Outlets 2024!");
        assert!(name.starts_with("mp_data_retail_outlets_2024_"));
        assert!(is_valid_identifier(&name));
        assert_ne!(name, generate_table_name("Retail Outlets 2024!"));

        let long = generate_table_name(&"very long name ".repeat(20));
        assert!(long.len() <= MAX_IDENTIFIER_LEN);
        assert!(is_valid_identifier(&long));
    }

    #[test]
    fn test_namespace_check() {
        assert!(is_synthesized_table("mp_data_shops_1a2b3c4d"));
        assert!(!is_synthesized_table("legacy_table"));
        assert!(!is_synthesized_table("mp_data_"));
    }

    #[tokio::test]
    async fn test_ensure_reuses_name_and_replaces_manifest() {
        let db = setup_test_db().await;
        let manager = TableLifecycleManager::new(db.clone());
        let record = insert_record(&db, "Shops").await;

        let first = manager
            .ensure_table_for(&record, &headers(&["Name", "Town"]))
            .await
            .unwrap();
        assert!(first.table_name.starts_with("mp_data_shops_"));
        assert_eq!(first.record.data_table.as_deref(), Some(first.table_name.as_str()));

        let second = manager
            .ensure_table_for(&first.record, &headers(&["Region"]))
            .await
            .unwrap();
        assert_eq!(second.table_name, first.table_name);
        assert_eq!(
            second.record.column_manifest().unwrap(),
            vec!["id", "map_data_id", "region"]
        );
    }

    #[tokio::test]
    async fn test_failed_synthesis_leaves_record_untouched() {
        let db = setup_test_db().await;
        let manager = TableLifecycleManager::new(db.clone());
        let record = insert_record(&db, "Empty").await;

        let err = manager
            .ensure_table_for(&record, &headers(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, DataSetError::SchemaSynthesis { .. }));

        let reloaded = map_data::Entity::find_by_id(record.id.clone())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.data_table, None);
    }

    #[tokio::test]
    async fn test_delete_drops_table_first() {
        let db = setup_test_db().await;
        let manager = TableLifecycleManager::new(db.clone());
        let record = insert_record(&db, "Routes").await;
        let ensured = manager
            .ensure_table_for(&record, &headers(&["Stop"]))
            .await
            .unwrap();

        let outcome = manager.delete_with_table(&record.id).await.unwrap();
        assert_eq!(outcome, DropOutcome::Dropped(ensured.table_name.clone()));
        assert!(!table_exists(&db, &ensured.table_name).await.unwrap());
        assert!(map_data::Entity::find_by_id(record.id)
            .one(&db)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_skips_unmanaged_table() {
        let db = setup_test_db().await;
        let manager = TableLifecycleManager::new(db.clone());

        let create = Table::create()
            .table(Alias::new("legacy_table"))
            .col(ColumnDef::new(Alias::new("x")).integer())
            .to_owned();
        db.execute(db.get_database_backend().build(&create))
            .await
            .unwrap();

        let record = insert_record(&db, "Legacy").await;
        let mut active: map_data::ActiveModel = record.clone().into();
        active.data_table = Set(Some("legacy_table".to_string()));
        active.update(&db).await.unwrap();

        let outcome = manager.delete_with_table(&record.id).await.unwrap();
        assert_eq!(outcome, DropOutcome::Skipped("legacy_table".to_string()));
        assert!(table_exists(&db, "legacy_table").await.unwrap());
    }

    #[tokio::test]
    async fn test_table_columns_in_declaration_order() {
        let db = setup_test_db().await;
        let manager = TableLifecycleManager::new(db.clone());
        let record = insert_record(&db, "Clinics").await;
        let ensured = manager
            .ensure_table_for(&record, &headers(&["Name", "Lat"]))
            .await
            .unwrap();

        let columns = table_columns(&db, &ensured.table_name).await.unwrap();
        assert_eq!(&columns[..2], &["id".to_string(), "map_data_id".to_string()]);
        assert!(columns.contains(&"lat".to_string()));
        assert!(table_columns(&db, "mp_data_nothing_here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_table() {
        let db = setup_test_db().await;
        let manager = TableLifecycleManager::new(db.clone());

        let record = insert_record(&db, "Gone").await;
        let mut active: map_data::ActiveModel = record.clone().into();
        active.data_table = Set(Some("mp_data_gone_00000000".to_string()));
        active.update(&db).await.unwrap();

        let outcome = manager.delete_with_table(&record.id).await.unwrap();
        assert_eq!(
            outcome,
            DropOutcome::AlreadyAbsent("mp_data_gone_00000000".to_string())
        );

        let missing = manager.delete_with_table(&record.id).await.unwrap_err();
        assert!(missing.is_not_found());
    }
}
