//! Project model and mutation funnel
//!
//! The project owns geometries, layers, groups and global settings. Every change goes
//! through one of the methods on [`Project`]; each validates fully before touching any
//! field, bumps `modified` and marks the project dirty.

pub mod geometry;
pub mod layer;
pub mod persistence;
mod settings;

pub use geometry::{Geometry, QuadPoint, QuadPoints, Transform, Vec2, Vec3, UNIT_QUAD};
pub use layer::{
    BlendMode, Color, ColorContent, ImageContent, Layer, LayerGroup, LayerKind, LayerType,
    PatternConfig, PatternContent, ShaderContent, VideoContent,
};
pub use persistence::{load_project, save_project};
pub use settings::GlobalSettings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ProjectionError, Result};

/// Project shared between the render loop, the sync endpoint and the control server
pub type SharedProject = Arc<RwLock<Project>>;

pub const PROJECT_VERSION: &str = "0.1.0";

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A projection mapping project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Creation time, ms since the Unix epoch
    pub created: u64,
    /// Last mutation time, ms since the Unix epoch
    pub modified: u64,
    geometries: Vec<Geometry>,
    layers: Vec<Layer>,
    #[serde(default)]
    groups: Vec<LayerGroup>,
    global: GlobalSettings,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new("Untitled Project")
    }
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            version: PROJECT_VERSION.to_string(),
            created: now,
            modified: now,
            geometries: Vec::new(),
            layers: Vec::new(),
            groups: Vec::new(),
            global: GlobalSettings::default(),
            dirty: false,
            path: None,
        }
    }

    pub fn into_shared(self) -> SharedProject {
        Arc::new(RwLock::new(self))
    }

    // Read access

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    /// Layers sorted by ascending `order`
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn groups(&self) -> &[LayerGroup] {
        &self.groups
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    pub fn geometry(&self, id: &str) -> Option<&Geometry> {
        self.geometries.iter().find(|g| g.id == id)
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&LayerGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// File the project was loaded from or last saved to
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Record a successful save
    pub fn mark_saved(&mut self, path: PathBuf) {
        self.path = Some(path);
        self.dirty = false;
    }

    fn touch(&mut self) {
        self.modified = now_millis().max(self.modified + 1);
        self.dirty = true;
    }

    // Whole-project operations

    /// Replace the whole project with a loaded snapshot
    pub fn load(&mut self, mut project: Project, path: Option<PathBuf>) {
        project.sort_layers();
        project.dirty = false;
        project.path = path;
        log::info!(
            "Loaded project '{}' ({} geometries, {} layers)",
            project.name,
            project.geometries.len(),
            project.layers.len()
        );
        *self = project;
    }

    // Geometry operations

    /// Add a geometry on the canonical unit quad and return its id
    pub fn add_geometry(&mut self, name: Option<&str>) -> String {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Geometry {}", self.geometries.len() + 1));
        let geometry = Geometry::with_default_corners(name);
        let id = geometry.id.clone();
        self.geometries.push(geometry);
        self.touch();
        log::debug!("Added geometry {}", id);
        id
    }

    /// Add a geometry with explicit corners (TL, TR, BR, BL)
    pub fn add_geometry_with_corners(&mut self, name: &str, corners: Vec<Vec2>) -> Result<String> {
        let points = corners.into_iter().map(QuadPoint::new).collect();
        let geometry = Geometry::new(name, points)?;
        let id = geometry.id.clone();
        self.geometries.push(geometry);
        self.touch();
        Ok(id)
    }

    /// Merge a partial JSON object over a geometry. `id` cannot change.
    pub fn update_geometry(&mut self, id: &str, updates: &Value) -> Result<()> {
        let index = self.geometry_index(id)?;
        if let Some(points) = updates.get("points").and_then(Value::as_array) {
            if points.len() != 4 {
                return Err(ProjectionError::InvalidGeometry(points.len()));
            }
        }

        let mut merged = serde_json::to_value(&self.geometries[index])?;
        merge_patch(&mut merged, updates, "geometry")?;
        merged["id"] = Value::String(id.to_string());
        let updated: Geometry = serde_json::from_value(merged)
            .map_err(|e| ProjectionError::malformed(format!("invalid geometry update: {}", e)))?;

        self.geometries[index] = updated;
        self.touch();
        Ok(())
    }

    /// Move a single corner point
    pub fn update_geometry_point(
        &mut self,
        geometry_id: &str,
        point_index: usize,
        position: Vec2,
    ) -> Result<()> {
        let index = self.geometry_index(geometry_id)?;
        self.geometries[index].set_corner(point_index, position)?;
        self.touch();
        Ok(())
    }

    /// Put a geometry's corners back on the unit quad
    pub fn reset_calibration(&mut self, geometry_id: &str) -> Result<()> {
        let index = self.geometry_index(geometry_id)?;
        self.geometries[index].reset_corners();
        self.touch();
        Ok(())
    }

    /// Remove a geometry and every layer projected through it.
    ///
    /// Returns the ids of the removed layers.
    pub fn delete_geometry(&mut self, id: &str) -> Result<Vec<String>> {
        let index = self.geometry_index(id)?;
        self.geometries.remove(index);

        let removed: Vec<String> = self
            .layers
            .iter()
            .filter(|l| l.geometry_id == id)
            .map(|l| l.id.clone())
            .collect();
        self.layers.retain(|l| l.geometry_id != id);
        self.touch();

        if !removed.is_empty() {
            log::info!("Deleted geometry {} and {} layer(s)", id, removed.len());
        }
        Ok(removed)
    }

    // Layer operations

    /// Create a layer with default payload on an existing geometry and return its id
    pub fn add_layer(
        &mut self,
        layer_type: LayerType,
        geometry_id: &str,
        name: Option<&str>,
    ) -> Result<String> {
        self.geometry_index(geometry_id)?;
        let order = self.layers.len();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Layer {}", order + 1));
        let mut layer = Layer::new(name, geometry_id, LayerKind::new(layer_type), order);
        // Keep order unique even after deletions left gaps
        if let Some(last) = self.layers.last() {
            layer.order = layer.order.max(last.order + 1);
        }
        let id = layer.id.clone();
        self.layers.push(layer);
        self.touch();
        log::debug!("Added {} layer {}", layer_type.as_str(), id);
        Ok(id)
    }

    /// Merge a partial JSON object over a layer. `id` and `type` cannot change.
    pub fn update_layer(&mut self, id: &str, updates: &Value) -> Result<()> {
        let index = self.layer_index(id)?;
        let current_type = self.layers[index].layer_type();
        if let Some(t) = updates.get("type") {
            if t.as_str() != Some(current_type.as_str()) {
                return Err(ProjectionError::malformed(format!(
                    "layer type cannot change from '{}'",
                    current_type.as_str()
                )));
            }
        }

        let mut merged = serde_json::to_value(&self.layers[index])?;
        merge_patch(&mut merged, updates, "layer")?;
        merged["id"] = Value::String(id.to_string());
        let mut updated: Layer = serde_json::from_value(merged)
            .map_err(|e| ProjectionError::malformed(format!("invalid layer update: {}", e)))?;

        if updated.geometry_id != self.layers[index].geometry_id {
            self.geometry_index(&updated.geometry_id)?;
        }
        if let Some(group_id) = &updated.group_id {
            self.group_index(group_id)?;
        }
        updated.opacity = updated.opacity.clamp(0.0, 1.0);

        let reordered = updated.order != self.layers[index].order;
        self.layers[index] = updated;
        if reordered {
            self.sort_layers();
        }
        self.touch();
        Ok(())
    }

    pub fn delete_layer(&mut self, id: &str) -> Result<Layer> {
        let index = self.layer_index(id)?;
        let layer = self.layers.remove(index);
        self.touch();
        Ok(layer)
    }

    /// Listed layers take `order = index`; unlisted layers follow in their previous
    /// relative order. Unknown ids are ignored.
    pub fn reorder_layers(&mut self, layer_ids: &[String]) {
        let mut listed: Vec<Layer> = Vec::with_capacity(self.layers.len());
        for id in layer_ids {
            if let Some(pos) = self.layers.iter().position(|l| &l.id == id) {
                listed.push(self.layers.remove(pos));
            }
        }
        listed.append(&mut self.layers);
        for (order, layer) in listed.iter_mut().enumerate() {
            layer.order = order;
        }
        self.layers = listed;
        self.touch();
    }

    fn sort_layers(&mut self) {
        self.layers.sort_by_key(|l| l.order);
    }

    // Video timeline

    fn video_mut(&mut self, layer_id: &str) -> Result<&mut VideoContent> {
        let index = self.layer_index(layer_id)?;
        match &mut self.layers[index].kind {
            LayerKind::Video(video) => Ok(video),
            _ => Err(ProjectionError::not_found("video layer", layer_id)),
        }
    }

    pub fn set_video_playing(&mut self, layer_id: &str, playing: bool) -> Result<()> {
        self.video_mut(layer_id)?.playing = playing;
        self.touch();
        Ok(())
    }

    /// Seek a video layer, clamped to the clip length once known
    pub fn seek_video(&mut self, layer_id: &str, time: f64) -> Result<()> {
        let video = self.video_mut(layer_id)?;
        let mut time = time.max(0.0);
        if video.duration > 0.0 {
            time = time.min(video.duration);
        }
        video.current_time = time;
        self.touch();
        Ok(())
    }

    // Group operations

    pub fn add_group(&mut self, name: Option<&str>) -> String {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Group {}", self.groups.len() + 1));
        let group = LayerGroup::new(name);
        let id = group.id.clone();
        self.groups.push(group);
        self.touch();
        id
    }

    pub fn update_group(&mut self, id: &str, updates: &Value) -> Result<()> {
        let index = self.group_index(id)?;
        let mut merged = serde_json::to_value(&self.groups[index])?;
        merge_patch(&mut merged, updates, "group")?;
        merged["id"] = Value::String(id.to_string());
        let mut updated: LayerGroup = serde_json::from_value(merged)
            .map_err(|e| ProjectionError::malformed(format!("invalid group update: {}", e)))?;
        updated.opacity = updated.opacity.clamp(0.0, 1.0);
        self.groups[index] = updated;
        self.touch();
        Ok(())
    }

    /// Remove a group; member layers survive without a group
    pub fn delete_group(&mut self, id: &str) -> Result<()> {
        let index = self.group_index(id)?;
        self.groups.remove(index);
        for layer in self.layers.iter_mut() {
            if layer.group_id.as_deref() == Some(id) {
                layer.group_id = None;
            }
        }
        self.touch();
        Ok(())
    }

    // Global settings

    /// Merge a partial settings object; intensity is clamped to [0, 1]
    pub fn update_global(&mut self, updates: &Value) -> Result<()> {
        let mut merged = serde_json::to_value(&self.global)?;
        merge_patch(&mut merged, updates, "global settings")?;
        let mut updated: GlobalSettings = serde_json::from_value(merged)
            .map_err(|e| ProjectionError::malformed(format!("invalid global update: {}", e)))?;
        updated.intensity = updated.intensity.clamp(0.0, 1.0);
        self.global = updated;
        self.touch();
        Ok(())
    }

    pub fn select_output_display(&mut self, display_id: Option<String>) {
        self.global.output_display_id = display_id;
        self.touch();
    }

    fn geometry_index(&self, id: &str) -> Result<usize> {
        self.geometries
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| ProjectionError::not_found("geometry", id))
    }

    fn layer_index(&self, id: &str) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| ProjectionError::not_found("layer", id))
    }

    fn group_index(&self, id: &str) -> Result<usize> {
        self.groups
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| ProjectionError::not_found("group", id))
    }
}

/// JSON merge patch: objects merge recursively, `null` removes, anything else replaces
fn merge_patch(target: &mut Value, patch: &Value, what: &str) -> Result<()> {
    if !patch.is_object() {
        return Err(ProjectionError::malformed(format!(
            "{} updates must be an object",
            what
        )));
    }
    apply_patch(target, patch);
    Ok(())
}

fn apply_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project_with_geometry() -> (Project, String) {
        let mut project = Project::default();
        let geometry_id = project.add_geometry(Some("G1"));
        (project, geometry_id)
    }

    #[test]
    fn test_default_project() {
        let project = Project::default();
        assert_eq!(project.name, "Untitled Project");
        assert_eq!(project.version, PROJECT_VERSION);
        assert!(project.geometries().is_empty());
        assert!(project.layers().is_empty());
        assert_eq!(project.global(), &GlobalSettings::default());
        assert!(!project.is_dirty());
    }

    #[test]
    fn test_mutations_bump_modified_and_dirty() {
        let mut project = Project::default();
        let before = project.modified;
        project.add_geometry(None);
        let after_first = project.modified;
        assert!(after_first > before);
        assert!(project.is_dirty());

        project.select_output_display(Some("display-2".into()));
        assert!(project.modified > after_first);
    }

    #[test]
    fn test_add_layer_requires_geometry() {
        let mut project = Project::default();
        let err = project.add_layer(LayerType::Color, "missing", None).unwrap_err();
        assert!(matches!(err, ProjectionError::NotFound { kind: "geometry", .. }));
        assert!(!project.is_dirty());
    }

    #[test]
    fn test_add_layer_defaults() {
        let (mut project, geometry_id) = project_with_geometry();
        let first = project.add_layer(LayerType::Color, &geometry_id, None).unwrap();
        let second = project.add_layer(LayerType::Video, &geometry_id, Some("Clip")).unwrap();

        let first = project.layer(&first).unwrap();
        assert_eq!(first.name, "Layer 1");
        assert_eq!(first.order, 0);
        assert_eq!(first.opacity, 1.0);
        assert_eq!(first.blend_mode, BlendMode::Normal);

        let second = project.layer(&second).unwrap();
        assert_eq!(second.name, "Clip");
        assert_eq!(second.order, 1);
    }

    #[test]
    fn test_update_layer_merges_and_clamps() {
        let (mut project, geometry_id) = project_with_geometry();
        let id = project.add_layer(LayerType::Color, &geometry_id, None).unwrap();

        project
            .update_layer(&id, &json!({"opacity": 0.5, "color": {"r": 0.0, "g": 1.0, "b": 0.0}}))
            .unwrap();
        let layer = project.layer(&id).unwrap();
        assert_eq!(layer.opacity, 0.5);
        assert_eq!(layer.kind, LayerKind::Color(ColorContent { color: Color::rgb(0.0, 1.0, 0.0) }));

        project.update_layer(&id, &json!({"opacity": 3.0})).unwrap();
        assert_eq!(project.layer(&id).unwrap().opacity, 1.0);
    }

    #[test]
    fn test_update_layer_is_atomic() {
        let (mut project, geometry_id) = project_with_geometry();
        let id = project.add_layer(LayerType::Color, &geometry_id, None).unwrap();
        let before = project.clone();

        // Valid opacity alongside an invalid blend mode: nothing changes
        let err = project.update_layer(&id, &json!({"opacity": 0.2, "blendMode": "overlay"}));
        assert!(err.is_err());
        assert_eq!(project, before);

        assert!(project.update_layer(&id, &json!({"type": "video"})).is_err());
        assert!(project.update_layer(&id, &json!({"geometryId": "nope"})).is_err());
        assert!(project.update_layer(&id, &json!({"groupId": "nope"})).is_err());
        assert_eq!(project, before);
    }

    #[test]
    fn test_update_layer_cannot_change_id() {
        let (mut project, geometry_id) = project_with_geometry();
        let id = project.add_layer(LayerType::Image, &geometry_id, None).unwrap();
        project.update_layer(&id, &json!({"id": "other", "name": "Renamed"})).unwrap();
        assert_eq!(project.layer(&id).unwrap().name, "Renamed");
        assert!(project.layer("other").is_none());
    }

    #[test]
    fn test_update_geometry_rejects_wrong_point_count() {
        let (mut project, geometry_id) = project_with_geometry();
        let before = project.clone();
        let updates = json!({"points": [
            {"id": "a", "position": {"x": 0, "y": 0}},
            {"id": "b", "position": {"x": 1, "y": 0}},
            {"id": "c", "position": {"x": 1, "y": 1}}
        ]});
        let err = project.update_geometry(&geometry_id, &updates).unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidGeometry(3)));
        assert_eq!(project, before);
    }

    #[test]
    fn test_update_geometry_partial() {
        let (mut project, geometry_id) = project_with_geometry();
        project
            .update_geometry(&geometry_id, &json!({"name": "Wall", "visible": false}))
            .unwrap();
        let geometry = project.geometry(&geometry_id).unwrap();
        assert_eq!(geometry.name, "Wall");
        assert!(!geometry.visible);
        assert_eq!(geometry.corners(), UNIT_QUAD);
    }

    #[test]
    fn test_point_drag_and_reset() {
        let (mut project, geometry_id) = project_with_geometry();
        project
            .update_geometry_point(&geometry_id, 1, Vec2::new(0.8, -0.9))
            .unwrap();
        assert_eq!(project.geometry(&geometry_id).unwrap().corners()[1], Vec2::new(0.8, -0.9));

        project.reset_calibration(&geometry_id).unwrap();
        assert_eq!(project.geometry(&geometry_id).unwrap().corners(), UNIT_QUAD);
    }

    #[test]
    fn test_delete_geometry_cascades() {
        let (mut project, g1) = project_with_geometry();
        let g2 = project.add_geometry(Some("G2"));
        let l1 = project.add_layer(LayerType::Color, &g1, None).unwrap();
        let l2 = project.add_layer(LayerType::Image, &g1, None).unwrap();
        let l3 = project.add_layer(LayerType::Color, &g2, None).unwrap();

        let removed = project.delete_geometry(&g1).unwrap();
        assert_eq!(removed, vec![l1.clone(), l2.clone()]);
        assert!(project.geometry(&g1).is_none());
        assert!(project.layer(&l1).is_none());
        assert!(project.layer(&l2).is_none());
        assert!(project.layer(&l3).is_some());
    }

    #[test]
    fn test_reorder_layers() {
        let (mut project, g) = project_with_geometry();
        let a = project.add_layer(LayerType::Color, &g, None).unwrap();
        let b = project.add_layer(LayerType::Color, &g, None).unwrap();
        let c = project.add_layer(LayerType::Color, &g, None).unwrap();

        project.reorder_layers(&[c.clone(), "unknown".to_string(), a.clone()]);
        let ids: Vec<&str> = project.layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec![c.as_str(), a.as_str(), b.as_str()]);
        let orders: Vec<usize> = project.layers().iter().map(|l| l.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_delete_group_clears_membership() {
        let (mut project, g) = project_with_geometry();
        let layer = project.add_layer(LayerType::Color, &g, None).unwrap();
        let group = project.add_group(None);
        project.update_layer(&layer, &json!({"groupId": group})).unwrap();
        assert_eq!(project.layer(&layer).unwrap().group_id.as_deref(), Some(group.as_str()));

        project.update_group(&group, &json!({"opacity": 0.5, "visible": false})).unwrap();
        assert_eq!(project.group(&group).unwrap().opacity, 0.5);

        project.delete_group(&group).unwrap();
        assert!(project.group(&group).is_none());
        assert!(project.layer(&layer).unwrap().group_id.is_none());
    }

    #[test]
    fn test_update_global_partial() {
        let mut project = Project::default();
        project.update_global(&json!({"intensity": 1.5})).unwrap();
        assert_eq!(project.global().intensity, 1.0);
        assert_eq!(project.global().tint, Color::WHITE);

        project
            .update_global(&json!({"tint": {"r": 1.0, "g": 0.0, "b": 0.0}, "intensity": 0.25}))
            .unwrap();
        assert_eq!(project.global().tint, Color::rgb(1.0, 0.0, 0.0));
        assert_eq!(project.global().intensity, 0.25);

        assert!(project.update_global(&json!(42)).is_err());
    }

    #[test]
    fn test_timeline_on_video_layers_only() {
        let (mut project, g) = project_with_geometry();
        let video = project.add_layer(LayerType::Video, &g, None).unwrap();
        let color = project.add_layer(LayerType::Color, &g, None).unwrap();

        project.set_video_playing(&video, true).unwrap();
        project.seek_video(&video, 4.5).unwrap();
        match &project.layer(&video).unwrap().kind {
            LayerKind::Video(v) => {
                assert!(v.playing);
                assert_eq!(v.current_time, 4.5);
            }
            other => panic!("expected video, got {:?}", other),
        }

        assert!(project.set_video_playing(&color, true).is_err());
        assert!(project.seek_video("missing", 1.0).is_err());
    }

    #[test]
    fn test_load_replaces_and_cleans() {
        let (mut project, _) = project_with_geometry();
        assert!(project.is_dirty());
        let mut other = Project::new("Loaded");
        other.add_geometry(None);
        project.load(other, Some(PathBuf::from("/tmp/show.json")));
        assert_eq!(project.name, "Loaded");
        assert!(!project.is_dirty());
        assert_eq!(project.path(), Some(&PathBuf::from("/tmp/show.json")));
    }
}
