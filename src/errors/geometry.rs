use thiserror::Error;

/// Errors raised while reading boundary geometry
#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Invalid GeoJSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unsupported geometry type: {0}")]
    UnsupportedType(String),

    #[error("Malformed coordinates: {0}")]
    MalformedCoordinates(String),

    #[error("Geometry is empty")]
    Empty,
}
