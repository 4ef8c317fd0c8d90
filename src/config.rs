//! Application configuration
//!
//! A JSON file where every field is optional; command line flags override what the
//! file says.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_PORT;
use crate::error::{ProjectionError, Result};
use crate::output::RawDisplay;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// WebSocket control port
    pub control_port: u16,
    /// Output surface size when no display is selected
    pub output_width: u32,
    pub output_height: u32,
    /// Render loop rate for both surfaces
    pub target_fps: u32,
    /// Display to show the output on, if connected
    pub output_display_id: Option<String>,
    /// Displays reported by the host when there is no windowing system to ask
    pub displays: Vec<RawDisplay>,
    /// Project loaded on startup
    pub project_path: Option<PathBuf>,
    /// Save a dirty project this often; off when unset
    pub autosave_secs: Option<u64>,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_PORT,
            output_width: 1920,
            output_height: 1080,
            target_fps: 60,
            output_display_id: None,
            displays: Vec::new(),
            project_path: None,
            autosave_secs: None,
            log_level: "info".to_string(),
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub project_path: Option<PathBuf>,
    pub control_port: Option<u16>,
    pub target_fps: Option<u32>,
}

impl AppConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ProjectionError::Persistence(format!("failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            ProjectionError::Persistence(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Load from a file if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.project_path {
            self.project_path = Some(path);
        }
        if let Some(port) = overrides.control_port {
            self.control_port = port;
        }
        if let Some(fps) = overrides.target_fps {
            self.target_fps = fps.max(1);
        }
    }
}
