//! Project files
//!
//! Projects are stored verbatim as pretty-printed JSON. Loading validates the whole
//! structure (including the four-point rule for every geometry) before anything is
//! handed back.

use std::path::Path;

use super::Project;
use crate::error::{ProjectionError, Result};

/// Save a project to a JSON file
pub fn save_project(project: &Project, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(project)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json).map_err(|e| {
        ProjectionError::Persistence(format!("failed to write {}: {}", path.display(), e))
    })?;
    log::info!("Saved project to {:?}", path);
    Ok(())
}

/// Load a project from a JSON file
pub fn load_project(path: &Path) -> Result<Project> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        ProjectionError::Persistence(format!("failed to read {}: {}", path.display(), e))
    })?;
    let project: Project = serde_json::from_str(&json).map_err(|e| {
        ProjectionError::Persistence(format!("invalid project file {}: {}", path.display(), e))
    })?;
    log::info!("Loaded project from {:?}", path);
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::LayerType;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shows").join("main.json");

        let mut project = Project::new("Gallery");
        let geometry = project.add_geometry(Some("Wall"));
        project.add_layer(LayerType::Pattern, &geometry, None).unwrap();

        save_project(&project, &path).unwrap();
        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded.name, "Gallery");
        assert_eq!(loaded.geometries(), project.geometries());
        assert_eq!(loaded.layers(), project.layers());
        assert_eq!(loaded.modified, project.modified);
    }

    #[test]
    fn test_load_rejects_three_point_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{
                "id": "p", "name": "Bad", "version": "0.1.0",
                "created": 0, "modified": 0,
                "geometries": [{
                    "id": "g", "name": "G", "visible": true,
                    "points": [
                        {"id": "a", "position": {"x": 0, "y": 0}},
                        {"id": "b", "position": {"x": 1, "y": 0}},
                        {"id": "c", "position": {"x": 1, "y": 1}}
                    ]
                }],
                "layers": [],
                "global": {"intensity": 1, "tint": {"r": 1, "g": 1, "b": 1}, "outputDisplayId": null}
            }"#,
        )
        .unwrap();

        let err = load_project(&path).unwrap_err();
        assert!(matches!(err, ProjectionError::Persistence(_)));
        assert!(err.to_string().contains("expected 4 points"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_project(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ProjectionError::Persistence(_)));
    }
}
