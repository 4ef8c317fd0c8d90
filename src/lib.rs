//! Projection Mapper Library
//!
//! A projective compositing engine: homography calibration of quads, a software
//! multi-layer compositor, and a sync channel that keeps a live output surface in step
//! with the editing surface.

pub mod api;
pub mod calibration;
pub mod config;
pub mod error;
pub mod output;
pub mod project;
pub mod render;
pub mod sync;
pub mod video;

// Re-export commonly used types
pub use api::{CommandHandler, ControlServer};
pub use calibration::{solve, Homography, HomographySolution};
pub use config::AppConfig;
pub use error::{ProjectionError, Result};
pub use project::{Geometry, GlobalSettings, Layer, LayerKind, LayerType, Project, SharedProject};
pub use render::{Compositor, Scene, Surface};
pub use sync::{sync_channel, EditingEndpoint, OutputSurface, SyncPayload};
pub use video::TextureCache;
