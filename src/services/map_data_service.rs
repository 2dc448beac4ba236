use indexmap::IndexMap;
use sea_orm::sea_query::{Alias, Expr, Func, Order, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::entities::common_types::GeometryKind;
use crate::database::entities::map_data;
use crate::errors::{DataSetError, DataSetResult};
use crate::pipeline::header_extractor::{ID_COLUMN, MAP_DATA_ID_COLUMN};
use crate::pipeline::schema::{ColumnManifest, BOUNDARY_ID_COLUMN, LOCATION_COLUMN};
use crate::services::table_lifecycle::{table_exists, DropOutcome, TableLifecycleManager};

/// Fields for a new map data record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMapData {
    pub name: String,
    pub description: Option<String>,
    pub geometry_kind: GeometryKind,
    pub user_id: i32,
    pub is_active: bool,
}

impl NewMapData {
    pub fn new(name: impl Into<String>, user_id: i32) -> Self {
        Self {
            name: name.into(),
            description: None,
            geometry_kind: GeometryKind::Point,
            user_id,
            is_active: true,
        }
    }
}

/// Display fields that may be changed after creation; `None` leaves a field as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapDataUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub geometry_kind: Option<GeometryKind>,
}

/// One row of a backing table, data columns in manifest order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicRow {
    pub id: i64,
    pub values: IndexMap<String, Option<String>>,
    pub location: Option<String>,
    pub boundary_id: Option<i32>,
}

/// Service for map data records and read access to their backing tables
#[derive(Clone)]
pub struct MapDataService {
    db: DatabaseConnection,
}

impl MapDataService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: NewMapData) -> DataSetResult<map_data::Model> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DataSetError::ValidationFailed(
                "name must not be empty".to_string(),
            ));
        }

        let mut active = map_data::ActiveModel::new();
        active.name = Set(name.to_string());
        active.description = Set(input.description);
        active.geometry_type = Set(input.geometry_kind.as_ref().to_string());
        active.user_id = Set(input.user_id);
        active.is_active = Set(input.is_active);

        let record = active.insert(&self.db).await?;
        info!("Created map data {} ({})", record.id, record.name);
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> DataSetResult<map_data::Model> {
        map_data::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| DataSetError::NotFound(id.to_string()))
    }

    /// All records ordered by name, optionally restricted by active flag
    pub async fn list(&self, active: Option<bool>) -> DataSetResult<Vec<map_data::Model>> {
        let mut query = map_data::Entity::find();
        if let Some(active) = active {
            query = query.filter(map_data::Column::IsActive.eq(active));
        }
        Ok(query
            .order_by_asc(map_data::Column::Name)
            .all(&self.db)
            .await?)
    }

    pub async fn update(&self, id: &str, changes: MapDataUpdate) -> DataSetResult<map_data::Model> {
        let record = self.get(id).await?;
        let mut active: map_data::ActiveModel = record.into();

        if let Some(name) = changes.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DataSetError::ValidationFailed(
                    "name must not be empty".to_string(),
                ));
            }
            active.name = Set(name);
        }
        if let Some(description) = changes.description {
            active.description = Set(description);
        }
        if let Some(kind) = changes.geometry_kind {
            active.geometry_type = Set(kind.as_ref().to_string());
        }

        Ok(active.set_updated_at().update(&self.db).await?)
    }

    pub async fn activate(&self, id: &str) -> DataSetResult<map_data::Model> {
        self.set_active(id, true).await
    }

    pub async fn deactivate(&self, id: &str) -> DataSetResult<map_data::Model> {
        self.set_active(id, false).await
    }

    async fn set_active(&self, id: &str, is_active: bool) -> DataSetResult<map_data::Model> {
        let record = self.get(id).await?;
        let mut active: map_data::ActiveModel = record.into();
        active.is_active = Set(is_active);
        let record = active.set_updated_at().update(&self.db).await?;
        info!(
            "Map data {} {}",
            record.id,
            if is_active { "activated" } else { "deactivated" }
        );
        Ok(record)
    }

    pub async fn has_dynamic_table(&self, id: &str) -> DataSetResult<bool> {
        Ok(self.get(id).await?.has_dynamic_table())
    }

    /// Rows in the record's backing table; 0 when it has none
    pub async fn dynamic_row_count(&self, record: &map_data::Model) -> DataSetResult<u64> {
        let Some(table) = self.existing_table(record).await? else {
            return Ok(0);
        };

        let query = Query::select()
            .expr_as(Func::count(Expr::col(Alias::new(ID_COLUMN))), Alias::new("n"))
            .from(Alias::new(table.as_str()))
            .to_owned();
        let row = self
            .db
            .query_one(self.db.get_database_backend().build(&query))
            .await?;
        let count: i64 = match row {
            Some(row) => row.try_get("", "n")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    /// A page of rows from the record's backing table, ordered by id
    pub async fn dynamic_rows(
        &self,
        record: &map_data::Model,
        limit: u64,
        offset: u64,
    ) -> DataSetResult<Vec<DynamicRow>> {
        let Some(table) = self.existing_table(record).await? else {
            return Ok(Vec::new());
        };
        let manifest = ColumnManifest::from_names(&record.column_manifest()?)?;
        let data_columns: Vec<String> = manifest.data_columns().map(|c| c.name.clone()).collect();

        let mut query = Query::select();
        query
            .column(Alias::new(ID_COLUMN))
            .columns(data_columns.iter().map(|c| Alias::new(c.as_str())))
            .column(Alias::new(LOCATION_COLUMN))
            .column(Alias::new(BOUNDARY_ID_COLUMN))
            .from(Alias::new(table.as_str()))
            .and_where(Expr::col(Alias::new(MAP_DATA_ID_COLUMN)).eq(record.id.as_str()))
            .order_by(Alias::new(ID_COLUMN), Order::Asc)
            .limit(limit)
            .offset(offset);

        let rows = self
            .db
            .query_all(self.db.get_database_backend().build(&query))
            .await?;

        rows.into_iter()
            .map(|row| -> DataSetResult<DynamicRow> {
                let mut values: IndexMap<String, Option<String>> =
                    IndexMap::with_capacity(data_columns.len());
                for column in &data_columns {
                    values.insert(column.clone(), row.try_get("", column)?);
                }
                Ok(DynamicRow {
                    id: row.try_get("", ID_COLUMN)?,
                    values,
                    location: row.try_get("", LOCATION_COLUMN)?,
                    boundary_id: row.try_get("", BOUNDARY_ID_COLUMN)?,
                })
            })
            .collect()
    }

    /// Delete the record, dropping its backing table first
    pub async fn delete(&self, id: &str) -> DataSetResult<DropOutcome> {
        TableLifecycleManager::new(self.db.clone())
            .delete_with_table(id)
            .await
    }

    async fn existing_table(&self, record: &map_data::Model) -> DataSetResult<Option<String>> {
        let Some(table) = record.data_table.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        if table_exists(&self.db, table).await? {
            Ok(Some(table.to_string()))
        } else {
            Ok(None)
        }
    }
}
