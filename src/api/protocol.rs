//! WebSocket protocol definitions
//!
//! Every message is a JSON object `{type, payload}`. Inbound messages are commands,
//! outbound ones are the greeting, acknowledgements and errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProjectionError, Result};
use crate::project::{LayerType, PROJECT_VERSION};

/// Greeting sent to every client on connect
pub const WELCOME_MESSAGE: &str = "Connected to Projection Mapper";

/// Command types the server understands, in the order they are advertised
pub const COMMANDS: &[&str] = &[
    "project.load",
    "project.save",
    "layer.create",
    "layer.update",
    "layer.delete",
    "layer.reorder",
    "geometry.update",
    "global.update",
    "timeline.play",
    "timeline.pause",
    "timeline.seek",
];

/// Raw inbound envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Validated command
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlCommand {
    #[serde(rename = "project.load")]
    ProjectLoad { path: PathBuf },
    #[serde(rename = "project.save")]
    ProjectSave {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    #[serde(rename = "layer.create", rename_all = "camelCase")]
    LayerCreate {
        #[serde(rename = "type")]
        layer_type: LayerType,
        geometry_id: String,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "layer.update")]
    LayerUpdate { id: String, updates: Value },
    #[serde(rename = "layer.delete")]
    LayerDelete { id: String },
    #[serde(rename = "layer.reorder", rename_all = "camelCase")]
    LayerReorder { layer_ids: Vec<String> },
    #[serde(rename = "geometry.update")]
    GeometryUpdate { id: String, updates: Value },
    /// Partial global settings, the payload itself
    #[serde(rename = "global.update")]
    GlobalUpdate(Value),
    #[serde(rename = "timeline.play", rename_all = "camelCase")]
    TimelinePlay { layer_id: String },
    #[serde(rename = "timeline.pause", rename_all = "camelCase")]
    TimelinePause { layer_id: String },
    #[serde(rename = "timeline.seek", rename_all = "camelCase")]
    TimelineSeek { layer_id: String, time: f64 },
}

impl ControlMessage {
    /// Parse a text frame into an envelope
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ProjectionError::malformed(format!("invalid message format: {}", e)))
    }

    /// Validate the payload against the command type
    pub fn command(&self) -> Result<ControlCommand> {
        if !COMMANDS.contains(&self.kind.as_str()) {
            return Err(ProjectionError::malformed(format!(
                "unknown message type '{}'",
                self.kind
            )));
        }
        let payload = match &self.payload {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let tagged = serde_json::json!({ "type": self.kind, "payload": payload });
        serde_json::from_value(tagged).map_err(|e| {
            ProjectionError::malformed(format!("invalid payload for '{}': {}", self.kind, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub original_type: String,
    pub timestamp: u64,
    /// Id of the created object, for `layer.create`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected {
        message: String,
        version: String,
        commands: Vec<String>,
    },
    Ack(AckPayload),
    Error { message: String },
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::Connected {
            message: WELCOME_MESSAGE.to_string(),
            version: PROJECT_VERSION.to_string(),
            commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn ack(original_type: impl Into<String>, timestamp: u64, id: Option<String>) -> Self {
        ServerMessage::Ack(AckPayload {
            original_type: original_type.into(),
            timestamp,
            id,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","payload":{"message":"serialization failed"}}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_layer_update() {
        let msg = ControlMessage::parse(
            r#"{"type": "layer.update", "payload": {"id": "L1", "updates": {"opacity": 0.5}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.command().unwrap(),
            ControlCommand::LayerUpdate {
                id: "L1".to_string(),
                updates: json!({"opacity": 0.5}),
            }
        );
    }

    #[test]
    fn test_parse_layer_create_and_timeline() {
        let msg = ControlMessage::parse(
            r#"{"type": "layer.create", "payload": {"type": "video", "geometryId": "G1"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.command().unwrap(),
            ControlCommand::LayerCreate {
                layer_type: LayerType::Video,
                geometry_id: "G1".to_string(),
                name: None,
            }
        );

        let msg = ControlMessage::parse(
            r#"{"type": "timeline.seek", "payload": {"layerId": "L1", "time": 2.5}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.command().unwrap(),
            ControlCommand::TimelineSeek {
                layer_id: "L1".to_string(),
                time: 2.5,
            }
        );
    }

    #[test]
    fn test_save_without_payload() {
        let msg = ControlMessage::parse(r#"{"type": "project.save"}"#).unwrap();
        assert_eq!(
            msg.command().unwrap(),
            ControlCommand::ProjectSave { path: None }
        );
    }

    #[test]
    fn test_global_update_payload_is_patch() {
        let msg = ControlMessage::parse(r#"{"type": "global.update", "payload": {"intensity": 0.3}}"#)
            .unwrap();
        assert_eq!(
            msg.command().unwrap(),
            ControlCommand::GlobalUpdate(json!({"intensity": 0.3}))
        );
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(ControlMessage::parse("{not json").is_err());
        assert!(ControlMessage::parse(r#"{"payload": {}}"#).is_err());

        let unknown = ControlMessage::parse(r#"{"type": "layer.explode", "payload": {}}"#).unwrap();
        let err = unknown.command().unwrap_err();
        assert!(err.to_string().contains("layer.explode"));

        let missing = ControlMessage::parse(r#"{"type": "layer.delete", "payload": {}}"#).unwrap();
        assert!(matches!(
            missing.command(),
            Err(ProjectionError::MalformedControlMessage(_))
        ));
    }

    #[test]
    fn test_server_message_shapes() {
        let value: Value = serde_json::from_str(&ServerMessage::connected().to_json()).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["payload"]["message"], WELCOME_MESSAGE);
        assert_eq!(value["payload"]["commands"].as_array().unwrap().len(), COMMANDS.len());

        let value: Value =
            serde_json::from_str(&ServerMessage::ack("layer.update", 42, None).to_json()).unwrap();
        assert_eq!(
            value,
            json!({"type": "ack", "payload": {"originalType": "layer.update", "timestamp": 42}})
        );

        let value: Value = serde_json::from_str(&ServerMessage::error("nope").to_json()).unwrap();
        assert_eq!(value, json!({"type": "error", "payload": {"message": "nope"}}));
    }
}
