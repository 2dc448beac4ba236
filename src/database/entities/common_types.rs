use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Geometry a map data record declares its rows to carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
    MultiPoint,
    MultiLine,
    MultiPolygon,
}

impl GeometryKind {
    pub const ALL: [GeometryKind; 6] = [
        GeometryKind::Point,
        GeometryKind::Line,
        GeometryKind::Polygon,
        GeometryKind::MultiPoint,
        GeometryKind::MultiLine,
        GeometryKind::MultiPolygon,
    ];

    /// Human-readable label for selection lists
    pub fn label(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::Line => "Line",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "Multi Point",
            GeometryKind::MultiLine => "Multi Line",
            GeometryKind::MultiPolygon => "Multi Polygon",
        }
    }
}

impl AsRef<str> for GeometryKind {
    fn as_ref(&self) -> &str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Line => "line",
            GeometryKind::Polygon => "polygon",
            GeometryKind::MultiPoint => "multipoint",
            GeometryKind::MultiLine => "multiline",
            GeometryKind::MultiPolygon => "multipolygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for GeometryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "point" => Ok(GeometryKind::Point),
            "line" => Ok(GeometryKind::Line),
            "polygon" => Ok(GeometryKind::Polygon),
            "multipoint" => Ok(GeometryKind::MultiPoint),
            "multiline" => Ok(GeometryKind::MultiLine),
            "multipolygon" => Ok(GeometryKind::MultiPolygon),
            other => Err(format!("Invalid geometry kind: {}", other)),
        }
    }
}

/// Administrative level of a boundary, from least to most specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryType {
    Country,
    County,
    Constituency,
    Ward,
}

impl BoundaryType {
    /// Higher is more specific; used to prefer wards over their parents
    pub fn specificity(&self) -> u8 {
        match self {
            BoundaryType::Country => 0,
            BoundaryType::County => 1,
            BoundaryType::Constituency => 2,
            BoundaryType::Ward => 3,
        }
    }

    pub fn child(&self) -> Option<BoundaryType> {
        match self {
            BoundaryType::Country => Some(BoundaryType::County),
            BoundaryType::County => Some(BoundaryType::Constituency),
            BoundaryType::Constituency => Some(BoundaryType::Ward),
            BoundaryType::Ward => None,
        }
    }
}

impl AsRef<str> for BoundaryType {
    fn as_ref(&self) -> &str {
        match self {
            BoundaryType::Country => "country",
            BoundaryType::County => "county",
            BoundaryType::Constituency => "constituency",
            BoundaryType::Ward => "ward",
        }
    }
}

impl fmt::Display for BoundaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for BoundaryType {
    type Err = String;

    // Provider data spells the root level "COUNTRY"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "country" => Ok(BoundaryType::Country),
            "county" => Ok(BoundaryType::County),
            "constituency" => Ok(BoundaryType::Constituency),
            "ward" => Ok(BoundaryType::Ward),
            other => Err(format!("Invalid boundary type: {}", other)),
        }
    }
}
