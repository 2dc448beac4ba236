use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

pub use super::common_types::GeometryKind;

/// MapData entity: one user-managed tabular resource
///
/// The rows of an upload do not live here. Each upload synthesizes a physical
/// table named by `data_table` whose columns are `data_columns` plus the system
/// columns (`id`, `map_data_id`, `location_point`, `boundary_id`, `created_at`,
/// `updated_at`). Both fields stay null until the first successful upload and
/// are replaced together on every re-upload.
///
/// There is no foreign key from the synthesized table back to this record since
/// the table name is itself data; the table lifecycle service keeps the two in
/// step (synthesize-then-record, drop-then-delete).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "map_data")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub geometry_type: String, // 'point', 'line', 'polygon', 'multipoint', ...
    pub user_id: i32,
    pub is_active: bool,
    pub data_table: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub data_columns: Option<String>, // JSON array of sanitized column names
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub fn new() -> Self {
        Self {
            id: Set(uuid::Uuid::new_v4().to_string()),
            name: ActiveValue::NotSet,
            description: ActiveValue::NotSet,
            geometry_type: Set(GeometryKind::Point.as_ref().to_string()),
            user_id: ActiveValue::NotSet,
            is_active: Set(true),
            data_table: Set(None),
            data_columns: Set(None),
            created_at: Set(chrono::Utc::now()),
            updated_at: Set(chrono::Utc::now()),
        }
    }

    pub fn set_updated_at(mut self) -> Self {
        self.updated_at = Set(chrono::Utc::now());
        self
    }
}

impl Model {
    /// Get the declared geometry as an enum for type safety
    pub fn get_geometry_kind(&self) -> Option<GeometryKind> {
        self.geometry_type.parse().ok()
    }

    /// Whether an upload has produced a backing table for this record
    pub fn has_dynamic_table(&self) -> bool {
        self.data_table
            .as_deref()
            .map(|name| !name.is_empty())
            .unwrap_or(false)
    }

    /// Parse the stored column manifest
    pub fn column_manifest(&self) -> Result<Vec<String>, serde_json::Error> {
        match self.data_columns.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
            _ => Ok(Vec::new()),
        }
    }

    pub fn is_inactive(&self) -> bool {
        !self.is_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        Model {
            id: "6f1c".to_string(),
            name: "Outlets".to_string(),
            description: None,
            geometry_type: "point".to_string(),
            user_id: 1,
            is_active: true,
            data_table: None,
            data_columns: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_no_table_until_upload() {
        let model = model();
        assert!(!model.has_dynamic_table());
        assert!(model.column_manifest().unwrap().is_empty());
        assert_eq!(model.get_geometry_kind(), Some(GeometryKind::Point));
    }

    #[test]
    fn test_manifest_parsing() {
        let model = Model {
            data_table: Some("mp_data_outlets_1a2b3c4d".to_string()),
            data_columns: Some(r#"["id","map_data_id","name"]"#.to_string()),
            ..model()
        };
        assert!(model.has_dynamic_table());
        assert_eq!(
            model.column_manifest().unwrap(),
            vec!["id", "map_data_id", "name"]
        );

        let broken = Model {
            data_columns: Some("not json".to_string()),
            ..model
        };
        assert!(broken.column_manifest().is_err());
    }
}
