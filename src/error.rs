//! Error types for the projection engine
//!
//! One error enum covers the model boundary, calibration, asset loading and the
//! remote control protocol. Render loops surface `SurfaceLost` to the embedder.

use thiserror::Error;

use crate::calibration::Homography;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Errors produced by the projection engine
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    /// The four calibration points cannot define a projective transform.
    ///
    /// Carries a best-effort matrix so the render loop can keep drawing.
    #[error("degenerate geometry: {reason}")]
    DegenerateGeometry {
        reason: String,
        fallback: Homography,
    },

    /// Image or video could not be fetched or decoded
    #[error("failed to load asset '{source_uri}' for layer {layer_id}: {message}")]
    AssetLoad {
        layer_id: String,
        source_uri: String,
        message: String,
    },

    /// Remote control payload could not be parsed or validated
    #[error("malformed control message: {0}")]
    MalformedControlMessage(String),

    /// A geometry was built without exactly four corner points
    #[error("invalid geometry: expected 4 points, got {0}")]
    InvalidGeometry(usize),

    /// A referenced geometry, layer or group does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Project file could not be read or written
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The render target went away; the embedder must recreate the surface
    #[error("render surface lost: {0}")]
    SurfaceLost(String),
}

impl ProjectionError {
    pub fn asset_load(
        layer_id: impl Into<String>,
        source_uri: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AssetLoad {
            layer_id: layer_id.into(),
            source_uri: source_uri.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedControlMessage(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for ProjectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for ProjectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ProjectionError::InvalidGeometry(3);
        assert_eq!(err.to_string(), "invalid geometry: expected 4 points, got 3");

        let err = ProjectionError::not_found("layer", "L1");
        assert_eq!(err.to_string(), "layer 'L1' not found");

        let err = ProjectionError::asset_load("L2", "missing.png", "no such file");
        assert!(err.to_string().contains("missing.png"));
        assert!(err.to_string().contains("L2"));
    }

    #[test]
    fn test_io_error_maps_to_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ProjectionError = io.into();
        assert!(matches!(err, ProjectionError::Persistence(_)));
    }
}
