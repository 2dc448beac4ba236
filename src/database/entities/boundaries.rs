use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub use super::common_types::BoundaryType;

/// Administrative boundary reference data (county, constituency, ward)
///
/// Boundaries form a strict tree through `(parent_type, parent_code)`:
/// ward -> constituency -> county -> country. `geometry` holds a GeoJSON
/// Polygon or MultiPolygon (or an empty object when the provider shipped none).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "boundaries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub code: i32,
    #[sea_orm(column_name = "type")]
    pub boundary_type: String,
    pub parent_type: String,
    pub parent_code: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub geometry: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn get_boundary_type(&self) -> Option<BoundaryType> {
        self.boundary_type.parse().ok()
    }

    pub fn get_parent_type(&self) -> Option<BoundaryType> {
        self.parent_type.parse().ok()
    }

    pub fn is_root(&self) -> bool {
        self.get_parent_type() == Some(BoundaryType::Country)
    }
}
