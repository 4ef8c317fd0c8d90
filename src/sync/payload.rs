//! Snapshot carried from the editing surface to the output surface

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};
use crate::project::{Geometry, GlobalSettings, Layer, LayerGroup, Project};
use crate::render::Scene;

/// Everything the output surface needs to render a frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub layers: Vec<Layer>,
    pub geometries: Vec<Geometry>,
    #[serde(default)]
    pub groups: Vec<LayerGroup>,
    pub global: GlobalSettings,
}

impl SyncPayload {
    /// Clone the renderable parts of a project
    pub fn from_project(project: &Project) -> Self {
        Self {
            layers: project.layers().to_vec(),
            geometries: project.geometries().to_vec(),
            groups: project.groups().to_vec(),
            global: project.global().clone(),
        }
    }

    pub fn scene(&self) -> Scene<'_> {
        Scene {
            layers: &self.layers,
            geometries: &self.geometries,
            groups: &self.groups,
            global: &self.global,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ProjectionError::malformed(format!("sync payload: {}", e)))?;
        Ok(Bytes::from(json))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProjectionError::malformed(format!("sync payload: {}", e)))
    }
}

/// One serialized snapshot with its sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFrame {
    pub seq: u64,
    pub bytes: Bytes,
}
