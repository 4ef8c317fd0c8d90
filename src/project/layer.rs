//! Layer model
//!
//! Every layer shares a common base (geometry reference, opacity, blend mode, transform,
//! stacking order) and carries a type-specific payload tagged by `type` on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::geometry::Transform;

/// Blend modes for layer compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Straight alpha over
    #[default]
    Normal,
    /// Additive blending (brightens)
    Add,
    /// Multiply blending (darkens)
    Multiply,
    /// Screen blending (lightens)
    Screen,
}

impl BlendMode {
    /// Get all blend modes
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Add,
            BlendMode::Multiply,
            BlendMode::Screen,
        ]
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Add => "Add",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
        }
    }
}

/// RGBA color with components in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "default_alpha")]
    pub a: f32,
}

fn default_alpha() -> f32 {
    1.0
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(c: [f32; 4]) -> Self {
        Self::rgba(c[0], c[1], c[2], c[3])
    }
}

/// Layer discriminant as it appears in `layer.create`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Image,
    Video,
    Color,
    Shader,
    Pattern,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Image => "image",
            LayerType::Video => "video",
            LayerType::Color => "color",
            LayerType::Shader => "shader",
            LayerType::Pattern => "pattern",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageContent {
    /// File path or `file://` URI
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContent {
    pub source: String,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub playing: bool,
    pub volume: f32,
    /// Playback position in seconds
    pub current_time: f64,
    /// Clip length in seconds, 0 until the decoder reports it
    pub duration: f64,
}

impl Default for VideoContent {
    fn default() -> Self {
        Self {
            source: String::new(),
            looping: true,
            playing: false,
            volume: 1.0,
            current_time: 0.0,
            duration: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorContent {
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderContent {
    pub fragment_shader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_shader: Option<String>,
    #[serde(default)]
    pub uniforms: BTreeMap<String, Value>,
}

/// Parameters for light and test patterns
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternConfig {
    /// `#rrggbb` or `#rrggbbaa`
    pub colors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
    /// `horizontal`, `vertical`, `diagonal` or `radial`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_dash_array: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternContent {
    pub pattern_id: String,
    pub pattern_config: PatternConfig,
    pub is_animated: bool,
    pub is_playing: bool,
}

impl Default for PatternContent {
    fn default() -> Self {
        Self {
            pattern_id: "solid".to_string(),
            pattern_config: PatternConfig {
                colors: vec!["#00ff88".to_string()],
                fill_opacity: Some(1.0),
                border_width: Some(0.0),
                ..Default::default()
            },
            is_animated: false,
            is_playing: true,
        }
    }
}

/// Type-specific layer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerKind {
    Image(ImageContent),
    Video(VideoContent),
    Color(ColorContent),
    Shader(ShaderContent),
    Pattern(PatternContent),
}

impl LayerKind {
    /// Default payload for a freshly created layer
    pub fn new(layer_type: LayerType) -> Self {
        match layer_type {
            LayerType::Image => LayerKind::Image(ImageContent::default()),
            LayerType::Video => LayerKind::Video(VideoContent::default()),
            LayerType::Color => LayerKind::Color(ColorContent::default()),
            LayerType::Shader => LayerKind::Shader(ShaderContent::default()),
            LayerType::Pattern => LayerKind::Pattern(PatternContent::default()),
        }
    }

    pub fn layer_type(&self) -> LayerType {
        match self {
            LayerKind::Image(_) => LayerType::Image,
            LayerKind::Video(_) => LayerType::Video,
            LayerKind::Color(_) => LayerType::Color,
            LayerKind::Shader(_) => LayerType::Shader,
            LayerKind::Pattern(_) => LayerType::Pattern,
        }
    }

    /// Media source for image and video layers
    pub fn media_source(&self) -> Option<&str> {
        match self {
            LayerKind::Image(image) => Some(&image.source),
            LayerKind::Video(video) => Some(&video.source),
            _ => None,
        }
    }
}

/// A layer projected through one geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    /// Weak reference into the project's geometries
    pub geometry_id: String,
    pub visible: bool,
    /// Layer opacity (0.0 to 1.0)
    pub opacity: f32,
    pub blend_mode: BlendMode,
    #[serde(default)]
    pub transform: Transform,
    /// Stacking position, drawn back to front in ascending order
    pub order: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(flatten)]
    pub kind: LayerKind,
}

impl Layer {
    pub fn new(
        name: impl Into<String>,
        geometry_id: impl Into<String>,
        kind: LayerKind,
        order: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            geometry_id: geometry_id.into(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            transform: Transform::default(),
            order,
            group_id: None,
            locked: None,
            kind,
        }
    }

    pub fn layer_type(&self) -> LayerType {
        self.kind.layer_type()
    }
}

/// Group of layers sharing visibility and opacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerGroup {
    pub id: String,
    pub name: String,
    pub expanded: bool,
    pub visible: bool,
    pub locked: bool,
    /// Multiplies the opacity of every member layer
    pub opacity: f32,
    /// Color coding for editors, `#rrggbb`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl LayerGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            expanded: true,
            visible: true,
            locked: false,
            opacity: 1.0,
            color: None,
        }
    }
}
