//! Background media decoding
//!
//! A [`MediaHandle`] owns one decoder thread. The thread follows the handle's playback
//! clock and keeps the frame for the current time in a shared slot; the render side
//! picks it up with [`MediaHandle::take_frame`]. Supported sources are animated GIFs
//! and directories of numbered still frames.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};
use parking_lot::Mutex;

use super::texture_cache::{Completion, LoadOutcome};

/// Frame rate assumed for still-frame sequences
pub const DEFAULT_SEQUENCE_FPS: f64 = 30.0;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Decoded video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Increases every time the decoder publishes a different frame
    pub serial: u64,
    pub image: RgbaImage,
}

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Paused,
    Playing,
}

/// Wall-clock driven playback position
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    state: PlaybackState,
    /// Position at `anchor`
    position: f64,
    anchor: Instant,
    duration: f64,
    pub looping: bool,
    pub volume: f32,
    pub speed: f64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            state: PlaybackState::Paused,
            position: 0.0,
            anchor: Instant::now(),
            duration: 0.0,
            looping: true,
            volume: 1.0,
            speed: 1.0,
        }
    }
}

impl PlaybackClock {
    /// Current position in seconds
    pub fn current_time(&self) -> f64 {
        self.time_at(Instant::now())
    }

    fn time_at(&self, now: Instant) -> f64 {
        let mut time = self.position;
        if self.state == PlaybackState::Playing {
            time += now.duration_since(self.anchor).as_secs_f64() * self.speed;
        }
        self.wrap(time)
    }

    fn wrap(&self, time: f64) -> f64 {
        if self.duration <= 0.0 {
            return time.max(0.0);
        }
        if self.looping {
            time.rem_euclid(self.duration)
        } else {
            time.clamp(0.0, self.duration)
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn play(&mut self) {
        if self.state != PlaybackState::Playing {
            self.position = self.current_time();
            self.anchor = Instant::now();
            self.state = PlaybackState::Playing;
        }
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.position = self.current_time();
            self.anchor = Instant::now();
            self.state = PlaybackState::Paused;
        }
    }

    pub fn seek(&mut self, time: f64) {
        self.position = self.wrap(time);
        self.anchor = Instant::now();
    }

    pub fn set_looping(&mut self, looping: bool) {
        if self.looping != looping {
            self.position = self.current_time();
            self.anchor = Instant::now();
            self.looping = looping;
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn set_duration(&mut self, duration: f64) {
        self.position = self.current_time();
        self.anchor = Instant::now();
        self.duration = duration;
        self.position = self.wrap(self.position);
    }
}

/// Frames addressable by time
enum FrameSource {
    /// Fully decoded animation with per-frame start times
    Animation {
        frames: Vec<(f64, RgbaImage)>,
        duration: f64,
    },
    /// Still frames decoded on demand
    Sequence { paths: Vec<PathBuf>, fps: f64 },
}

impl FrameSource {
    fn open(path: &Path) -> Result<Self, String> {
        if path.is_dir() {
            return Self::open_sequence(path);
        }
        let is_gif = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("gif"))
            .unwrap_or(false);
        if is_gif {
            Self::open_gif(path)
        } else {
            Err(format!(
                "unsupported video source {:?} (expected animated GIF or frame directory)",
                path
            ))
        }
    }

    fn open_gif(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| e.to_string())?;
        let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
        let decoded = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| e.to_string())?;
        if decoded.is_empty() {
            return Err("animation has no frames".to_string());
        }

        let mut frames = Vec::with_capacity(decoded.len());
        let mut start = 0.0;
        for frame in decoded {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let mut delay = numer as f64 / denom.max(1) as f64 / 1000.0;
            // Zero-delay frames display for 100 ms
            if delay <= 0.0 {
                delay = 0.1;
            }
            frames.push((start, frame.into_buffer()));
            start += delay;
        }
        Ok(FrameSource::Animation {
            frames,
            duration: start,
        })
    }

    fn open_sequence(dir: &Path) -> Result<Self, String> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| e.to_string())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        if paths.is_empty() {
            return Err(format!("no image frames in {:?}", dir));
        }
        paths.sort();
        Ok(FrameSource::Sequence {
            paths,
            fps: DEFAULT_SEQUENCE_FPS,
        })
    }

    fn duration(&self) -> f64 {
        match self {
            FrameSource::Animation { duration, .. } => *duration,
            FrameSource::Sequence { paths, fps } => paths.len() as f64 / fps,
        }
    }

    fn frame_count(&self) -> usize {
        match self {
            FrameSource::Animation { frames, .. } => frames.len(),
            FrameSource::Sequence { paths, .. } => paths.len(),
        }
    }

    fn index_at(&self, time: f64) -> usize {
        let last = self.frame_count().saturating_sub(1);
        match self {
            FrameSource::Animation { frames, .. } => frames
                .iter()
                .rposition(|(start, _)| *start <= time)
                .unwrap_or(0),
            FrameSource::Sequence { fps, .. } => ((time * fps).floor().max(0.0) as usize).min(last),
        }
    }

    fn frame(&self, index: usize) -> Result<RgbaImage, String> {
        match self {
            FrameSource::Animation { frames, .. } => frames
                .get(index)
                .map(|(_, image)| image.clone())
                .ok_or_else(|| format!("frame {} out of range", index)),
            FrameSource::Sequence { paths, .. } => {
                let path = paths
                    .get(index)
                    .ok_or_else(|| format!("frame {} out of range", index))?;
                image::open(path)
                    .map(|img| img.to_rgba8())
                    .map_err(|e| format!("{:?}: {}", path, e))
            }
        }
    }
}

/// State shared between a handle and its decoder thread
struct Shared {
    clock: Mutex<PlaybackClock>,
    frame: Mutex<Option<VideoFrame>>,
    stop: AtomicBool,
}

/// Identifies the load a decoder reports back for
pub(crate) struct LoadTicket {
    pub layer_id: String,
    pub source: String,
    pub generation: u64,
    pub completions: Sender<Completion>,
}

/// Handle to a background video decoder
pub struct MediaHandle {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("clock", &*self.shared.clock.lock())
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl MediaHandle {
    /// Start decoding `path`; the outcome of opening it is sent through the ticket
    pub(crate) fn spawn(path: PathBuf, ticket: LoadTicket) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            clock: Mutex::new(PlaybackClock::default()),
            frame: Mutex::new(None),
            stop: AtomicBool::new(false),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name(format!("video-{}", ticket.layer_id))
            .spawn(move || decode_loop(path, ticket, thread_shared))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn play(&self) {
        self.shared.clock.lock().play();
    }

    pub fn pause(&self) {
        self.shared.clock.lock().pause();
    }

    pub fn seek(&self, time: f64) {
        self.shared.clock.lock().seek(time);
        self.wake();
    }

    pub fn set_looping(&self, looping: bool) {
        self.shared.clock.lock().set_looping(looping);
    }

    /// Stored for embedders with an audio path; decoding ignores it
    pub fn set_volume(&self, volume: f32) {
        self.shared.clock.lock().volume = volume.clamp(0.0, 1.0);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.clock.lock().is_playing()
    }

    pub fn current_time(&self) -> f64 {
        self.shared.clock.lock().current_time()
    }

    /// Clip length in seconds, 0 until the source is opened
    pub fn duration(&self) -> f64 {
        self.shared.clock.lock().duration()
    }

    pub fn volume(&self) -> f32 {
        self.shared.clock.lock().volume
    }

    /// Latest buffered frame if it is newer than `after_serial`
    pub fn take_frame(&self, after_serial: u64) -> Option<VideoFrame> {
        let frame = self.shared.frame.lock();
        frame
            .as_ref()
            .filter(|f| f.serial > after_serial)
            .cloned()
    }

    pub fn has_frame(&self) -> bool {
        self.shared.frame.lock().is_some()
    }

    fn wake(&self) {
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    /// Stop the decoder thread and wait for it to exit
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("Video decoder thread panicked");
            }
        }
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(path: PathBuf, ticket: LoadTicket, shared: Arc<Shared>) {
    let source = match FrameSource::open(&path) {
        Ok(source) => source,
        Err(message) => {
            log::warn!("Failed to open video {:?}: {}", path, message);
            let _ = ticket.completions.send(Completion {
                layer_id: ticket.layer_id,
                source: ticket.source,
                generation: ticket.generation,
                outcome: LoadOutcome::Failed(message),
            });
            return;
        }
    };

    let duration = source.duration();
    shared.clock.lock().set_duration(duration);
    log::info!(
        "Opened video {:?}: {} frames, {:.2}s",
        path,
        source.frame_count(),
        duration
    );
    let _ = ticket.completions.send(Completion {
        layer_id: ticket.layer_id.clone(),
        source: ticket.source.clone(),
        generation: ticket.generation,
        outcome: LoadOutcome::VideoReady { duration },
    });

    let poll = Duration::from_secs_f64((duration / source.frame_count() as f64 / 2.0).clamp(0.002, 0.02));
    let mut shown: Option<usize> = None;
    let mut serial = 0u64;

    while !shared.stop.load(Ordering::SeqCst) {
        let time = shared.clock.lock().current_time();
        let index = source.index_at(time);
        if shown != Some(index) {
            match source.frame(index) {
                Ok(image) => {
                    serial += 1;
                    *shared.frame.lock() = Some(VideoFrame { serial, image });
                }
                Err(message) => {
                    log::warn!("Failed to decode frame {} of {:?}: {}", index, path, message);
                }
            }
            shown = Some(index);
        }
        std::thread::park_timeout(poll);
    }
    log::debug!("Video decoder for layer {} stopped", ticket.layer_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_paused_holds_position() {
        let mut clock = PlaybackClock::default();
        clock.set_duration(10.0);
        clock.seek(2.5);
        assert_eq!(clock.current_time(), 2.5);
        assert!(!clock.is_playing());
    }

    #[test]
    fn test_clock_loops_and_clamps() {
        let mut clock = PlaybackClock::default();
        clock.set_duration(4.0);
        clock.seek(9.0);
        assert_eq!(clock.current_time(), 1.0);

        clock.set_looping(false);
        clock.seek(9.0);
        assert_eq!(clock.current_time(), 4.0);
        clock.seek(-1.0);
        assert_eq!(clock.current_time(), 0.0);
    }

    #[test]
    fn test_clock_advances_while_playing() {
        let mut clock = PlaybackClock::default();
        clock.set_duration(100.0);
        clock.play();
        let start = clock.anchor;
        let later = start + Duration::from_millis(500);
        assert!((clock.time_at(later) - 0.5).abs() < 1e-9);
        clock.speed = 2.0;
        assert!((clock.time_at(later) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sequence_index_and_duration() {
        let source = FrameSource::Sequence {
            paths: (0..60).map(|i| PathBuf::from(format!("{:03}.png", i))).collect(),
            fps: 30.0,
        };
        assert_eq!(source.duration(), 2.0);
        assert_eq!(source.index_at(0.0), 0);
        assert_eq!(source.index_at(1.0), 30);
        assert_eq!(source.index_at(5.0), 59);
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let err = FrameSource::open(Path::new("/media/clip.mp4")).err().unwrap();
        assert!(err.contains("unsupported"));
    }
}
