//! Command handlers for WebSocket messages
//!
//! Applies validated commands to the shared project through the same mutation funnel
//! the editor uses.

use crate::error::{ProjectionError, Result};
use crate::project::{load_project, now_millis, save_project, SharedProject};

use super::protocol::{ControlCommand, ControlMessage, ServerMessage};

/// Applies control commands to the shared project
#[derive(Clone)]
pub struct CommandHandler {
    project: SharedProject,
}

impl CommandHandler {
    pub fn new(project: SharedProject) -> Self {
        Self { project }
    }

    /// Handle one text frame and produce the reply for the sending client
    pub async fn handle_text(&self, text: &str) -> ServerMessage {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => return ServerMessage::error(e.to_string()),
        };
        let result = match message.command() {
            Ok(command) => self.apply(command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => ServerMessage::ack(message.kind, now_millis(), id),
            Err(e) => {
                log::debug!("Rejected '{}': {}", message.kind, e);
                ServerMessage::error(e.to_string())
            }
        }
    }

    /// Apply a command. Returns the id of a created object, if any.
    pub async fn apply(&self, command: ControlCommand) -> Result<Option<String>> {
        match command {
            ControlCommand::ProjectLoad { path } => {
                let loaded = load_project(&path)?;
                let mut project = self.project.write().await;
                project.load(loaded, Some(path));
                Ok(None)
            }
            ControlCommand::ProjectSave { path } => {
                let (snapshot, target) = {
                    let project = self.project.read().await;
                    let target = path
                        .or_else(|| project.path().cloned())
                        .ok_or_else(|| {
                            ProjectionError::malformed("project has no path; pass one to project.save")
                        })?;
                    (project.clone(), target)
                };
                save_project(&snapshot, &target)?;
                self.project.write().await.mark_saved(target);
                Ok(None)
            }
            ControlCommand::LayerCreate {
                layer_type,
                geometry_id,
                name,
            } => {
                let mut project = self.project.write().await;
                let id = project.add_layer(layer_type, &geometry_id, name.as_deref())?;
                Ok(Some(id))
            }
            ControlCommand::LayerUpdate { id, updates } => {
                self.project.write().await.update_layer(&id, &updates)?;
                Ok(None)
            }
            ControlCommand::LayerDelete { id } => {
                self.project.write().await.delete_layer(&id)?;
                Ok(None)
            }
            ControlCommand::LayerReorder { layer_ids } => {
                self.project.write().await.reorder_layers(&layer_ids);
                Ok(None)
            }
            ControlCommand::GeometryUpdate { id, updates } => {
                self.project.write().await.update_geometry(&id, &updates)?;
                Ok(None)
            }
            ControlCommand::GlobalUpdate(updates) => {
                self.project.write().await.update_global(&updates)?;
                Ok(None)
            }
            ControlCommand::TimelinePlay { layer_id } => {
                self.project.write().await.set_video_playing(&layer_id, true)?;
                Ok(None)
            }
            ControlCommand::TimelinePause { layer_id } => {
                self.project.write().await.set_video_playing(&layer_id, false)?;
                Ok(None)
            }
            ControlCommand::TimelineSeek { layer_id, time } => {
                self.project.write().await.seek_video(&layer_id, time)?;
                Ok(None)
            }
        }
    }
}
