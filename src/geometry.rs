//! Planar geometry for boundary lookups.
//!
//! Boundaries arrive as GeoJSON Polygon / MultiPolygon documents (optionally
//! wrapped in a Feature). Coordinates are `[longitude, latitude]` and are treated
//! as planar, which is adequate for containment tests at administrative scale.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::GeometryError;

/// A WGS84 position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lng: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Parse a coordinate pair from cell text, rejecting values outside the
    /// valid latitude/longitude ranges.
    pub fn parse(lat: &str, lng: &str) -> Result<Self, GeometryError> {
        let lat_value = parse_coordinate(lat, "latitude")?;
        let lng_value = parse_coordinate(lng, "longitude")?;

        if !(-90.0..=90.0).contains(&lat_value) {
            return Err(GeometryError::MalformedCoordinates(format!(
                "latitude {} out of range",
                lat_value
            )));
        }
        if !(-180.0..=180.0).contains(&lng_value) {
            return Err(GeometryError::MalformedCoordinates(format!(
                "longitude {} out of range",
                lng_value
            )));
        }

        Ok(Self::new(lng_value, lat_value))
    }

    /// GeoJSON Point representation
    pub fn to_geojson(&self) -> String {
        serde_json::json!({
            "type": "Point",
            "coordinates": [self.lng, self.lat],
        })
        .to_string()
    }
}

fn parse_coordinate(raw: &str, label: &str) -> Result<f64, GeometryError> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        GeometryError::MalformedCoordinates(format!("{} '{}' is not a number", label, raw))
    })?;
    if !value.is_finite() {
        return Err(GeometryError::MalformedCoordinates(format!(
            "{} '{}' is not finite",
            label, raw
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    fn empty() -> Self {
        Self {
            min_lng: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lng: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        }
    }

    fn extend(&mut self, (lng, lat): (f64, f64)) {
        self.min_lng = self.min_lng.min(lng);
        self.min_lat = self.min_lat.min(lat);
        self.max_lng = self.max_lng.max(lng);
        self.max_lat = self.max_lat.max(lat);
    }

    pub fn contains(&self, point: &Point) -> bool {
        point.lng >= self.min_lng
            && point.lng <= self.max_lng
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Ring {
    vertices: Vec<(f64, f64)>,
}

impl Ring {
    // Even-odd ray cast towards +lng
    fn contains(&self, point: &Point) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if (yi > point.lat) != (yj > point.lat)
                && point.lng < (xj - xi) * (point.lat - yi) / (yj - yi) + xi
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn area(&self) -> f64 {
        let n = self.vertices.len();
        let mut twice_area = 0.0;
        for i in 0..n {
            let (x1, y1) = self.vertices[i];
            let (x2, y2) = self.vertices[(i + 1) % n];
            twice_area += x1 * y2 - x2 * y1;
        }
        (twice_area / 2.0).abs()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Polygon {
    exterior: Ring,
    holes: Vec<Ring>,
}

impl Polygon {
    fn contains(&self, point: &Point) -> bool {
        self.exterior.contains(point) && !self.holes.iter().any(|hole| hole.contains(point))
    }

    fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(Ring::area).sum();
        (self.exterior.area() - holes).max(0.0)
    }
}

/// A parsed Polygon or MultiPolygon
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    polygons: Vec<Polygon>,
    bbox: BoundingBox,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    Feature {
        geometry: Option<Box<GeoJson>>,
    },
}

impl Shape {
    /// Parse a GeoJSON Polygon, MultiPolygon or a Feature wrapping one
    pub fn from_geojson(raw: &str) -> Result<Self, GeometryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GeometryError::Empty);
        }
        let value: Value = serde_json::from_str(trimmed)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, GeometryError> {
        match &value {
            Value::Null => return Err(GeometryError::Empty),
            Value::Object(map) if map.is_empty() => return Err(GeometryError::Empty),
            Value::Object(map) => match map.get("type").and_then(Value::as_str) {
                Some("Polygon" | "MultiPolygon" | "Feature") => {}
                Some(other) => return Err(GeometryError::UnsupportedType(other.to_string())),
                None => return Err(GeometryError::UnsupportedType("<missing>".to_string())),
            },
            _ => return Err(GeometryError::UnsupportedType("<not an object>".to_string())),
        }

        let geojson: GeoJson = serde_json::from_value(value)?;
        Self::from_parsed(geojson)
    }

    fn from_parsed(geojson: GeoJson) -> Result<Self, GeometryError> {
        let polygons = match geojson {
            GeoJson::Polygon { coordinates } => vec![polygon_from(coordinates)?],
            GeoJson::MultiPolygon { coordinates } => coordinates
                .into_iter()
                .map(polygon_from)
                .collect::<Result<Vec<_>, _>>()?,
            GeoJson::Feature { geometry } => {
                return match geometry {
                    Some(inner) => Self::from_parsed(*inner),
                    None => Err(GeometryError::Empty),
                }
            }
        };

        if polygons.is_empty() {
            return Err(GeometryError::Empty);
        }

        let mut bbox = BoundingBox::empty();
        for polygon in &polygons {
            for vertex in &polygon.exterior.vertices {
                bbox.extend(*vertex);
            }
        }

        Ok(Self { polygons, bbox })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn contains(&self, point: &Point) -> bool {
        self.bbox.contains(point) && self.polygons.iter().any(|p| p.contains(point))
    }

    /// Planar area in square degrees
    pub fn area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }
}

fn polygon_from(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon, GeometryError> {
    let mut rings = rings.into_iter().map(ring_from);
    let exterior = rings
        .next()
        .ok_or_else(|| GeometryError::MalformedCoordinates("polygon has no rings".to_string()))??;
    let holes = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon { exterior, holes })
}

fn ring_from(positions: Vec<Vec<f64>>) -> Result<Ring, GeometryError> {
    let mut vertices = positions
        .into_iter()
        .map(|position| match position.as_slice() {
            [lng, lat, ..] => Ok((*lng, *lat)),
            _ => Err(GeometryError::MalformedCoordinates(
                "position needs at least two values".to_string(),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;

    // GeoJSON rings repeat the first vertex at the end
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return Err(GeometryError::MalformedCoordinates(
            "ring needs at least three distinct vertices".to_string(),
        ));
    }
    Ok(Ring { vertices })
}

/// Square polygon centred on (lng, lat); handy for fixtures
pub fn square_geojson(lng: f64, lat: f64, half_width: f64) -> String {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": [[
            [lng - half_width, lat - half_width],
            [lng + half_width, lat - half_width],
            [lng + half_width, lat + half_width],
            [lng - half_width, lat + half_width],
            [lng - half_width, lat - half_width],
        ]],
    })
    .to_string()
}
