//! Render loop driving the compositor on the editing surface
//!
//! Every tick takes a consistent snapshot of the project under the read lock, brings
//! the texture cache in line with it, renders it and hands the same snapshot to the
//! sync channel when an output is streaming.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::{ProjectionError, Result};
use crate::project::{Layer, SharedProject};
use crate::render::{Compositor, FrameStats, Scene, SharedSurface, Surface};
use crate::sync::{EditingEndpoint, SyncPayload};
use crate::video::TextureCache;

/// Timing for a render loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderLoopConfig {
    pub target_fps: u32,
}

impl Default for RenderLoopConfig {
    fn default() -> Self {
        Self { target_fps: 60 }
    }
}

impl RenderLoopConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// Seconds since a loop started, the time base for animated layers
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start: Instant,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

/// Compositor plus the media it draws from, one per surface
pub struct FrameRenderer {
    compositor: Compositor,
    textures: TextureCache,
    clock: FrameClock,
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRenderer {
    pub fn new() -> Self {
        Self {
            compositor: Compositor::new(),
            textures: TextureCache::new(),
            clock: FrameClock::new(),
        }
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureCache {
        &mut self.textures
    }

    /// Start loads for changed media, apply finished ones, refresh video frames.
    ///
    /// Load failures are logged and returned; they never stop the frame.
    pub fn prepare_media(&mut self, layers: &[Layer]) -> Vec<ProjectionError> {
        let mut errors = self.textures.sync_layers(layers);
        errors.extend(self.textures.poll_completions());
        for error in &errors {
            log::warn!("{}", error);
        }
        errors
    }

    pub fn render(&mut self, surface: &mut Surface, scene: &Scene<'_>) -> Result<FrameStats> {
        let time = self.clock.elapsed();
        self.compositor.render(surface, scene, &self.textures, time)
    }

    /// Drop textures and join decoders
    pub fn shutdown(&mut self) {
        self.textures.shutdown();
    }
}

/// Render the editing surface until `shutdown` flips to true.
///
/// Returns the number of frames rendered, or `SurfaceLost` if the surface went away.
pub async fn run_editing_loop(
    project: SharedProject,
    mut endpoint: EditingEndpoint,
    surface: SharedSurface,
    config: RenderLoopConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64> {
    let mut renderer = FrameRenderer::new();
    let mut ticker = tokio::time::interval(config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = 0u64;

    log::info!("Editing render loop started at {} fps", config.target_fps);

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break Ok(frames);
                }
                continue;
            }
        }

        let payload = {
            let project = project.read().await;
            SyncPayload::from_project(&project)
        };

        renderer.prepare_media(&payload.layers);
        let rendered = {
            let mut target = surface.lock();
            renderer.render(&mut target, &payload.scene())
        };
        if let Err(e) = rendered {
            log::error!("Editing surface stopped: {}", e);
            break Err(e);
        }
        frames += 1;

        if let Err(e) = endpoint.publish(&payload) {
            log::warn!("Failed to publish sync snapshot: {}", e);
        }
    };

    endpoint.stop_streaming();
    renderer.shutdown();
    log::info!("Editing render loop stopped after {} frames", frames);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Color, ColorContent, LayerKind, Project};
    use crate::sync::sync_channel;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_frame_interval() {
        let config = RenderLoopConfig { target_fps: 50 };
        assert_eq!(config.frame_interval(), Duration::from_millis(20));
        // Zero fps is treated as one
        assert_eq!(
            RenderLoopConfig { target_fps: 0 }.frame_interval(),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn test_editing_loop_renders_and_stops() {
        let mut project = Project::default();
        let geometry_id = project.add_geometry(Some("G1"));
        let layer_id = project
            .add_layer(crate::project::LayerType::Color, &geometry_id, None)
            .unwrap();
        project
            .update_layer(
                &layer_id,
                &serde_json::json!({"color": {"r": 1.0, "g": 0.0, "b": 0.0}}),
            )
            .unwrap();
        let shared = project.into_shared();

        let (editing, _output) = sync_channel();
        let surface = Arc::new(Mutex::new(Surface::new(8, 8)));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_editing_loop(
            shared,
            editing,
            surface.clone(),
            RenderLoopConfig { target_fps: 200 },
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        let frames = handle.await.unwrap().unwrap();
        assert!(frames >= 1);
        assert_eq!(surface.lock().pixel(4, 4), Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_editing_loop_reports_lost_surface() {
        let shared = Project::default().into_shared();
        let (editing, _output) = sync_channel();
        let surface = Arc::new(Mutex::new(Surface::new(4, 4)));
        surface.lock().invalidate("window closed");
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = run_editing_loop(
            shared,
            editing,
            surface,
            RenderLoopConfig::default(),
            stop_rx,
        )
        .await;
        assert!(matches!(result, Err(ProjectionError::SurfaceLost(_))));
    }

    #[test]
    fn test_frame_renderer_draws_scene() {
        let geometry = crate::project::Geometry::with_default_corners("G1");
        let layer = Layer::new(
            "Color",
            &geometry.id,
            LayerKind::Color(ColorContent {
                color: Color::rgb(0.0, 1.0, 0.0),
            }),
            0,
        );
        let payload = SyncPayload {
            layers: vec![layer],
            geometries: vec![geometry],
            groups: Vec::new(),
            global: Default::default(),
        };
        let mut renderer = FrameRenderer::new();
        assert!(renderer.prepare_media(&payload.layers).is_empty());
        let mut surface = Surface::new(2, 2);
        let stats = renderer.render(&mut surface, &payload.scene()).unwrap();
        assert_eq!(stats.layers_drawn, 1);
        assert_eq!(surface.pixel(1, 1), Some([0.0, 1.0, 0.0, 1.0]));
        renderer.shutdown();
        assert!(renderer.textures().is_shut_down());
    }
}
