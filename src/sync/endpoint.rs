//! Editing and output ends of the sync channel
//!
//! Snapshots travel through a single-slot `watch` channel: publishing overwrites
//! whatever the output has not read yet, so the output always renders the newest
//! state and never queues. A second `watch` carries the one-time ready handshake back.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::render::{FrameRenderer, FrameStats, SharedSurface, Surface};
use crate::sync::{SyncFrame, SyncPayload};

/// Create a connected editing/output endpoint pair
pub fn sync_channel() -> (EditingEndpoint, OutputEndpoint) {
    let (frame_tx, frame_rx) = watch::channel(None);
    let (ready_tx, ready_rx) = watch::channel(false);
    (
        EditingEndpoint {
            state: EditingState::Idle,
            frames: frame_tx,
            ready: ready_rx,
            seq: 0,
            output_display: None,
        },
        OutputEndpoint {
            frames: frame_rx,
            ready: ready_tx,
            last_taken: None,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditingState {
    Idle,
    Streaming,
}

/// Publishing side, owned by the editing render loop
#[derive(Debug)]
pub struct EditingEndpoint {
    state: EditingState,
    frames: watch::Sender<Option<SyncFrame>>,
    ready: watch::Receiver<bool>,
    seq: u64,
    output_display: Option<String>,
}

impl EditingEndpoint {
    pub fn state(&self) -> EditingState {
        self.state
    }

    pub fn output_display(&self) -> Option<&str> {
        self.output_display.as_deref()
    }

    /// Start streaming to an output, optionally bound to a display
    pub fn designate_output(&mut self, display_id: Option<String>) {
        if self.state == EditingState::Idle {
            log::info!(
                "Streaming to output{}",
                display_id
                    .as_deref()
                    .map(|id| format!(" on display {}", id))
                    .unwrap_or_default()
            );
        }
        self.output_display = display_id;
        self.state = EditingState::Streaming;
    }

    pub fn stop_streaming(&mut self) {
        if self.state == EditingState::Streaming {
            log::info!("Stopped streaming to output");
        }
        self.state = EditingState::Idle;
    }

    /// Serialize and publish a snapshot. Never blocks.
    ///
    /// Returns the sequence number, or `None` while idle.
    pub fn publish(&mut self, payload: &SyncPayload) -> Result<Option<u64>> {
        if self.state != EditingState::Streaming {
            return Ok(None);
        }
        let bytes = payload.to_bytes()?;
        self.seq += 1;
        self.frames.send_replace(Some(SyncFrame {
            seq: self.seq,
            bytes,
        }));
        Ok(Some(self.seq))
    }

    /// Sequence number of the last published snapshot
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    /// Whether the output has sent its ready handshake
    pub fn output_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the ready handshake. Returns false if the output went away first.
    pub async fn wait_output_ready(&mut self) -> bool {
        self.ready.wait_for(|ready| *ready).await.is_ok()
    }
}

/// Receiving side, owned by the output surface
#[derive(Debug)]
pub struct OutputEndpoint {
    frames: watch::Receiver<Option<SyncFrame>>,
    ready: watch::Sender<bool>,
    last_taken: Option<u64>,
}

impl OutputEndpoint {
    /// Newest snapshot not yet taken, if any. The last snapshot stays readable after
    /// the editing side is dropped.
    pub fn take_latest(&mut self) -> Option<SyncFrame> {
        let frame = self.frames.borrow_and_update().clone()?;
        if self.last_taken.is_some_and(|seq| frame.seq <= seq) {
            return None;
        }
        self.last_taken = Some(frame.seq);
        Some(frame)
    }

    /// Wait until a new snapshot is published. Errors once the editing side is gone.
    pub async fn changed(&mut self) -> std::result::Result<(), watch::error::RecvError> {
        self.frames.changed().await
    }

    fn signal_ready(&self) {
        self.ready.send_replace(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Uninitialized,
    Ready,
    Rendering,
}

/// Output side render target with its own media and loop
pub struct OutputSurface {
    state: OutputState,
    endpoint: OutputEndpoint,
    renderer: FrameRenderer,
    surface: Option<SharedSurface>,
    last: Option<SyncPayload>,
    last_seq: Option<u64>,
    snapshots_applied: u64,
    frames_rendered: u64,
}

impl OutputSurface {
    pub fn new(endpoint: OutputEndpoint) -> Self {
        Self {
            state: OutputState::Uninitialized,
            endpoint,
            renderer: FrameRenderer::new(),
            surface: None,
            last: None,
            last_seq: None,
            snapshots_applied: 0,
            frames_rendered: 0,
        }
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Attach the surface frames are drawn into
    pub fn attach(&mut self, surface: SharedSurface) {
        self.surface = Some(surface);
        if self.state == OutputState::Uninitialized {
            self.state = OutputState::Ready;
        }
    }

    pub fn surface(&self) -> Option<&SharedSurface> {
        self.surface.as_ref()
    }

    /// Sequence number of the snapshot currently rendered
    pub fn last_rendered_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Distinct snapshots taken from the channel
    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    /// Take the newest snapshot if there is one, then render the current snapshot.
    ///
    /// Returns `None` when nothing was drawn (no surface yet or no snapshot yet).
    pub fn tick(&mut self) -> Result<Option<FrameStats>> {
        let Some(surface) = self.surface.clone() else {
            return Ok(None);
        };

        if let Some(frame) = self.endpoint.take_latest() {
            match SyncPayload::from_bytes(&frame.bytes) {
                Ok(payload) => {
                    if self.state == OutputState::Ready {
                        self.endpoint.signal_ready();
                        self.state = OutputState::Rendering;
                        log::info!("Output surface received first snapshot");
                    }
                    self.last = Some(payload);
                    self.last_seq = Some(frame.seq);
                    self.snapshots_applied += 1;
                }
                Err(e) => log::warn!("Dropping snapshot {}: {}", frame.seq, e),
            }
        }

        let Some(payload) = self.last.as_ref() else {
            return Ok(None);
        };

        // Also refreshes video frames between snapshots
        self.renderer.prepare_media(&payload.layers);
        let stats = {
            let mut target = surface.lock();
            self.renderer.render(&mut target, &payload.scene())?
        };
        self.frames_rendered += 1;
        Ok(Some(stats))
    }

    /// Render at `fps` until `shutdown` flips to true or the surface is lost.
    /// Tears down media before returning.
    pub async fn run(mut self, fps: u32, mut shutdown: watch::Receiver<bool>) -> Result<u64> {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(self.frames_rendered);
                    }
                    continue;
                }
            }
            if let Err(e) = self.tick() {
                log::error!("Output surface stopped: {}", e);
                break Err(e);
            }
        };

        self.shutdown();
        result
    }

    /// Drop media synchronously; no load completes afterwards
    pub fn shutdown(&mut self) {
        self.renderer.shutdown();
        self.last = None;
    }

    /// Standalone surface of the given size, attached immediately
    pub fn with_surface(endpoint: OutputEndpoint, width: u32, height: u32) -> Self {
        let mut output = Self::new(endpoint);
        output.attach(std::sync::Arc::new(parking_lot::Mutex::new(Surface::new(
            width, height,
        ))));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Color, ColorContent, Geometry, Layer, LayerKind};

    fn payload(color: Color) -> SyncPayload {
        let geometry = Geometry::with_default_corners("G1");
        let layer = Layer::new(
            "Color",
            &geometry.id,
            LayerKind::Color(ColorContent { color }),
            0,
        );
        SyncPayload {
            layers: vec![layer],
            geometries: vec![geometry],
            groups: Vec::new(),
            global: Default::default(),
        }
    }

    #[test]
    fn test_idle_endpoint_does_not_publish() {
        let (mut editing, mut output) = sync_channel();
        assert_eq!(editing.state(), EditingState::Idle);
        assert_eq!(editing.publish(&payload(Color::WHITE)).unwrap(), None);
        assert!(output.take_latest().is_none());

        editing.designate_output(Some("display-2".to_string()));
        assert_eq!(editing.state(), EditingState::Streaming);
        assert_eq!(editing.output_display(), Some("display-2"));
        assert_eq!(editing.publish(&payload(Color::WHITE)).unwrap(), Some(1));

        editing.stop_streaming();
        assert_eq!(editing.state(), EditingState::Idle);
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let (mut editing, endpoint) = sync_channel();
        editing.designate_output(None);
        let mut output = OutputSurface::with_surface(endpoint, 4, 4);

        for i in 0..5 {
            let shade = i as f32 / 4.0;
            editing.publish(&payload(Color::rgb(shade, 0.0, 0.0))).unwrap();
        }

        output.tick().unwrap();
        assert_eq!(output.last_rendered_seq(), Some(5));
        assert_eq!(output.snapshots_applied(), 1);
        let pixel = output.surface().unwrap().lock().pixel(0, 0).unwrap();
        assert_eq!(pixel, [1.0, 0.0, 0.0, 1.0]);

        // Nothing new: re-render the same snapshot
        output.tick().unwrap();
        assert_eq!(output.snapshots_applied(), 1);
        assert_eq!(output.frames_rendered(), 2);
    }

    #[test]
    fn test_ready_handshake_on_first_snapshot() {
        let (mut editing, endpoint) = sync_channel();
        let mut output = OutputSurface::new(endpoint);
        assert_eq!(output.state(), OutputState::Uninitialized);
        assert_eq!(output.tick().unwrap(), None);

        output.attach(std::sync::Arc::new(parking_lot::Mutex::new(Surface::new(2, 2))));
        assert_eq!(output.state(), OutputState::Ready);
        assert!(!editing.output_ready());

        editing.designate_output(None);
        editing.publish(&payload(Color::WHITE)).unwrap();
        assert!(output.tick().unwrap().is_some());
        assert_eq!(output.state(), OutputState::Rendering);
        assert!(editing.output_ready());
    }

    #[test]
    fn test_malformed_snapshot_keeps_previous() {
        let (mut editing, endpoint) = sync_channel();
        editing.designate_output(None);
        let mut output = OutputSurface::with_surface(endpoint, 2, 2);

        editing.publish(&payload(Color::WHITE)).unwrap();
        output.tick().unwrap();
        editing.frames.send_replace(Some(SyncFrame {
            seq: 99,
            bytes: bytes::Bytes::from_static(b"not json"),
        }));
        output.tick().unwrap();
        assert_eq!(output.last_rendered_seq(), Some(1));
    }

    #[test]
    fn test_final_snapshot_survives_editing_teardown() {
        let (mut editing, mut output) = sync_channel();
        editing.designate_output(None);
        editing.publish(&payload(Color::WHITE)).unwrap();
        editing.publish(&payload(Color::BLACK)).unwrap();
        drop(editing);

        let frame = output.take_latest().unwrap();
        assert_eq!(frame.seq, 2);
        assert!(output.take_latest().is_none());
    }

    #[tokio::test]
    async fn test_output_loop_stops_on_shutdown() {
        let (mut editing, endpoint) = sync_channel();
        editing.designate_output(None);
        editing.publish(&payload(Color::WHITE)).unwrap();

        let output = OutputSurface::with_surface(endpoint, 2, 2);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(output.run(120, stop_rx));

        assert!(editing.wait_output_ready().await);
        stop_tx.send(true).unwrap();
        let frames = handle.await.unwrap().unwrap();
        assert!(frames >= 1);
    }
}
