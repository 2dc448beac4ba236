use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

use crate::database::entities::boundaries;
use crate::database::entities::common_types::BoundaryType;
use crate::errors::{DataSetError, DataSetResult};
use crate::geometry::{Point, Shape};

/// The boundary chosen for a point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryMatch {
    pub id: i32,
    pub name: String,
    pub boundary_type: BoundaryType,
}

#[derive(Debug, Clone)]
struct IndexedBoundary {
    id: i32,
    name: String,
    boundary_type: BoundaryType,
    area: f64,
    shape: Shape,
}

/// In-memory containment index over every boundary with usable geometry.
///
/// Entries are ordered most specific type first, then smallest area, then
/// lowest id, so the first containing entry is the answer: a ward beats its
/// constituency, and overlapping siblings resolve to the smaller polygon.
#[derive(Debug, Clone, Default)]
pub struct BoundaryIndex {
    entries: Vec<IndexedBoundary>,
}

impl BoundaryIndex {
    pub async fn load(db: &DatabaseConnection) -> DataSetResult<Self> {
        let records = boundaries::Entity::find().all(db).await?;
        Ok(Self::from_models(records))
    }

    pub fn from_models(records: Vec<boundaries::Model>) -> Self {
        let mut entries = Vec::with_capacity(records.len());
        let mut skipped = 0usize;

        for record in records {
            let Some(boundary_type) = record.get_boundary_type() else {
                warn!(
                    "Boundary {} has unknown type '{}', ignoring it",
                    record.id, record.boundary_type
                );
                skipped += 1;
                continue;
            };
            let Some(raw) = record.geometry.as_deref() else {
                skipped += 1;
                continue;
            };
            match Shape::from_geojson(raw) {
                Ok(shape) => entries.push(IndexedBoundary {
                    id: record.id,
                    name: record.name,
                    boundary_type,
                    area: shape.area(),
                    shape,
                }),
                Err(err) => {
                    debug!("Boundary {} has no usable geometry: {}", record.id, err);
                    skipped += 1;
                }
            }
        }

        entries.sort_by(|a, b| {
            b.boundary_type
                .specificity()
                .cmp(&a.boundary_type.specificity())
                .then_with(|| a.area.partial_cmp(&b.area).unwrap_or(Ordering::Equal))
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(
            "Boundary index holds {} shapes ({} skipped)",
            entries.len(),
            skipped
        );
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most specific boundary containing `point`
    pub fn locate(&self, point: &Point) -> Option<BoundaryMatch> {
        self.entries
            .iter()
            .find(|entry| entry.shape.contains(point))
            .map(|entry| BoundaryMatch {
                id: entry.id,
                name: entry.name.clone(),
                boundary_type: entry.boundary_type,
            })
    }
}

/// Outcome of a GeoJSON import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    geometry: Option<Value>,
}

/// Attributes a provider feature must carry to become a boundary
#[derive(Debug)]
struct FeatureAttributes {
    name: String,
    code: i32,
    boundary_type: BoundaryType,
    parent_type: BoundaryType,
    parent_code: String,
}

impl FeatureAttributes {
    fn from_properties(props: &serde_json::Map<String, Value>) -> Result<Self, String> {
        let text = |key: &str| -> Option<String> {
            match props.get(key)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        let name = text("name").ok_or("missing name")?;
        let code = text("code")
            .ok_or("missing code")?
            .parse::<i32>()
            .map_err(|_| "code is not an integer".to_string())?;
        let boundary_type: BoundaryType = text("type").ok_or("missing type")?.parse()?;
        let parent_type = match text("parent_type") {
            Some(raw) => raw.parse()?,
            None => BoundaryType::Country,
        };
        let parent_code = text("parent_code").unwrap_or_else(|| "0".to_string());

        Ok(Self {
            name,
            code,
            boundary_type,
            parent_type,
            parent_code,
        })
    }
}

/// Read access to the administrative boundary hierarchy
#[derive(Clone)]
pub struct BoundaryService {
    db: DatabaseConnection,
}

impl BoundaryService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: i32) -> DataSetResult<boundaries::Model> {
        boundaries::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| DataSetError::NotFound(format!("boundary {}", id)))
    }

    pub async fn list(
        &self,
        boundary_type: Option<BoundaryType>,
    ) -> DataSetResult<Vec<boundaries::Model>> {
        let mut query = boundaries::Entity::find();
        if let Some(boundary_type) = boundary_type {
            query = query.filter(boundaries::Column::BoundaryType.eq(boundary_type.as_ref()));
        }
        Ok(query
            .order_by_asc(boundaries::Column::BoundaryType)
            .order_by_asc(boundaries::Column::Name)
            .all(&self.db)
            .await?)
    }

    pub async fn counties(&self) -> DataSetResult<Vec<boundaries::Model>> {
        self.list(Some(BoundaryType::County)).await
    }

    pub async fn constituencies(&self, county_code: i32) -> DataSetResult<Vec<boundaries::Model>> {
        self.children_of(BoundaryType::County, county_code).await
    }

    pub async fn wards(&self, constituency_code: i32) -> DataSetResult<Vec<boundaries::Model>> {
        self.children_of(BoundaryType::Constituency, constituency_code)
            .await
    }

    /// Direct children of the boundary identified by `(boundary_type, code)`
    pub async fn children_of(
        &self,
        boundary_type: BoundaryType,
        code: i32,
    ) -> DataSetResult<Vec<boundaries::Model>> {
        let Some(child_type) = boundary_type.child() else {
            return Ok(Vec::new());
        };
        Ok(boundaries::Entity::find()
            .filter(boundaries::Column::BoundaryType.eq(child_type.as_ref()))
            .filter(boundaries::Column::ParentType.eq(boundary_type.as_ref()))
            .filter(boundaries::Column::ParentCode.eq(code.to_string()))
            .order_by_asc(boundaries::Column::Name)
            .all(&self.db)
            .await?)
    }

    /// Parent boundary; `None` for counties, whose parent is the country root
    pub async fn parent(
        &self,
        boundary: &boundaries::Model,
    ) -> DataSetResult<Option<boundaries::Model>> {
        if boundary.is_root() {
            return Ok(None);
        }
        let Ok(code) = boundary.parent_code.parse::<i32>() else {
            return Ok(None);
        };
        Ok(boundaries::Entity::find()
            .filter(boundaries::Column::BoundaryType.eq(boundary.parent_type.as_str()))
            .filter(boundaries::Column::Code.eq(code))
            .one(&self.db)
            .await?)
    }

    /// The most specific boundary containing `point`.
    ///
    /// Builds a fresh index per call; bulk callers should load a
    /// [`BoundaryIndex`] once instead.
    pub async fn find_containing(&self, point: &Point) -> DataSetResult<Option<BoundaryMatch>> {
        Ok(BoundaryIndex::load(&self.db).await?.locate(point))
    }

    /// Import a provider GeoJSON FeatureCollection.
    ///
    /// Each feature needs `name`, `code` and `type` properties, plus
    /// `parent_type`/`parent_code` for non-county levels. A feature matching an
    /// existing `(type, code)` replaces that boundary's attributes.
    pub async fn import_feature_collection(&self, raw: &str) -> DataSetResult<ImportSummary> {
        let collection: FeatureCollection = serde_json::from_str(raw)?;
        let mut summary = ImportSummary::default();
        let txn = self.db.begin().await?;

        for (index, feature) in collection.features.into_iter().enumerate() {
            let attributes = match FeatureAttributes::from_properties(&feature.properties) {
                Ok(attributes) => attributes,
                Err(reason) => {
                    warn!("Skipping feature {}: {}", index, reason);
                    summary.skipped += 1;
                    continue;
                }
            };
            let geometry = match feature.geometry {
                Some(geometry) if !geometry.is_null() => {
                    if let Err(err) = Shape::from_value(geometry.clone()) {
                        warn!(
                            "Feature {} ({}) has unusable geometry: {}",
                            index, attributes.name, err
                        );
                        summary.skipped += 1;
                        continue;
                    }
                    Some(geometry.to_string())
                }
                _ => None,
            };

            let now = chrono::Utc::now();
            let existing = boundaries::Entity::find()
                .filter(boundaries::Column::BoundaryType.eq(attributes.boundary_type.as_ref()))
                .filter(boundaries::Column::Code.eq(attributes.code))
                .one(&txn)
                .await?;

            let mut active: boundaries::ActiveModel = match &existing {
                Some(model) => model.clone().into(),
                None => boundaries::ActiveModel {
                    created_at: Set(now),
                    ..Default::default()
                },
            };
            active.name = Set(attributes.name);
            active.code = Set(attributes.code);
            active.boundary_type = Set(attributes.boundary_type.as_ref().to_string());
            active.parent_type = Set(attributes.parent_type.as_ref().to_string());
            active.parent_code = Set(attributes.parent_code);
            active.geometry = Set(geometry);
            active.updated_at = Set(now);

            if existing.is_some() {
                active.update(&txn).await?;
                summary.updated += 1;
            } else {
                active.insert(&txn).await?;
                summary.inserted += 1;
            }
        }

        txn.commit().await?;
        info!(
            "Imported boundaries: {} inserted, {} updated, {} skipped",
            summary.inserted, summary.updated, summary.skipped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_utils::setup_test_db;
    use crate::geometry::square_geojson;

    fn feature(name: &str, code: i32, kind: &str, parent: (&str, i32), geometry: String) -> Value {
        serde_json::json!({
            "type": "Feature",
            "properties": {
                "name": name,
                "code": code,
                "type": kind,
                "parent_type": parent.0,
                "parent_code": parent.1.to_string(),
            },
            "geometry": serde_json::from_str::<Value>(&geometry).unwrap(),
        })
    }

    async fn seeded() -> BoundaryService {
        let db = setup_test_db().await;
        let service = BoundaryService::new(db);
        let collection = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                feature("Nairobi", 47, "county", ("country", 0), square_geojson(36.8, -1.28, 0.5)),
                feature("Starehe", 290, "constituency", ("county", 47), square_geojson(36.82, -1.28, 0.1)),
                feature("Westlands", 274, "constituency", ("county", 47), square_geojson(36.6, -1.1, 0.1)),
                feature("Nairobi Central", 1441, "ward", ("constituency", 290), square_geojson(36.8167, -1.2833, 0.01)),
            ],
        });
        let summary = service
            .import_feature_collection(&collection.to_string())
            .await
            .unwrap();
        assert_eq!(summary.inserted, 4);
        service
    }

    #[tokio::test]
    async fn test_hierarchy_queries() {
        let service = seeded().await;

        let counties = service.counties().await.unwrap();
        assert_eq!(counties.len(), 1);
        assert_eq!(counties[0].name, "Nairobi");
        assert!(service.parent(&counties[0]).await.unwrap().is_none());

        let constituencies = service.constituencies(47).await.unwrap();
        let names: Vec<_> = constituencies.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Starehe", "Westlands"]);

        let wards = service.wards(290).await.unwrap();
        assert_eq!(wards.len(), 1);
        let parent = service.parent(&wards[0]).await.unwrap().unwrap();
        assert_eq!(parent.name, "Starehe");

        assert!(service
            .children_of(BoundaryType::Ward, 1441)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_most_specific_boundary_wins() {
        let service = seeded().await;

        let cbd = service
            .find_containing(&Point::new(36.8167, -1.2833))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cbd.name, "Nairobi Central");
        assert_eq!(cbd.boundary_type, BoundaryType::Ward);

        let westlands = service
            .find_containing(&Point::new(36.6, -1.1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(westlands.name, "Westlands");

        let edge_of_county = service
            .find_containing(&Point::new(37.2, -1.6))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge_of_county.boundary_type, BoundaryType::County);

        assert!(service
            .find_containing(&Point::new(10.0, 10.0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reimport_updates_and_skips_bad_features() {
        let service = seeded().await;
        let collection = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                feature("Nairobi City", 47, "county", ("country", 0), square_geojson(36.8, -1.28, 0.5)),
                { "type": "Feature", "properties": { "name": "No code" }, "geometry": null },
                feature("Broken", 1, "ward", ("constituency", 290), "{\"type\":\"Point\",\"coordinates\":[0,0]}".to_string()),
            ],
        });
        let summary = service
            .import_feature_collection(&collection.to_string())
            .await
            .unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                inserted: 0,
                updated: 1,
                skipped: 2
            }
        );
        assert_eq!(service.counties().await.unwrap()[0].name, "Nairobi City");
    }

    #[test]
    fn test_same_type_overlap_prefers_smaller_polygon() {
        let now = chrono::Utc::now();
        let model = |id: i32, half_width: f64| boundaries::Model {
            id,
            name: format!("ward {}", id),
            code: id,
            boundary_type: "ward".to_string(),
            parent_type: "constituency".to_string(),
            parent_code: "1".to_string(),
            geometry: Some(square_geojson(0.0, 0.0, half_width)),
            created_at: now,
            updated_at: now,
        };

        let index = BoundaryIndex::from_models(vec![model(1, 2.0), model(2, 1.0), model(3, 1.0)]);
        assert_eq!(index.len(), 3);
        let found = index.locate(&Point::new(0.1, 0.1)).unwrap();
        assert_eq!(found.id, 2);
    }
}
