//! Layer texture cache
//!
//! One texture per image or video layer, keyed by layer id. Images are decoded once on
//! a worker thread; video layers own a [`MediaHandle`] whose latest frame is copied into
//! the texture by [`TextureCache::update_frame`]. Workers report back over a channel
//! drained by [`TextureCache::poll_completions`]; results for a superseded load are
//! dropped by comparing `(layer id, source, generation)`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::player::{LoadTicket, MediaHandle};
use super::texture::Texture;
use crate::error::{ProjectionError, Result};
use crate::project::{Layer, LayerKind, VideoContent};

/// Result of a background load
#[derive(Debug)]
pub enum LoadOutcome {
    Image(Texture),
    VideoReady { duration: f64 },
    Failed(String),
}

/// Message from a worker back to the cache
#[derive(Debug)]
pub struct Completion {
    pub layer_id: String,
    pub source: String,
    pub generation: u64,
    pub outcome: LoadOutcome,
}

#[derive(Debug)]
struct CacheEntry {
    source: String,
    /// Whether `source` was last requested as a video, even if the request failed
    video: bool,
    generation: u64,
    texture: Option<Texture>,
    media: Option<MediaHandle>,
    /// Serial of the video frame currently in `texture`
    frame_serial: u64,
    /// Layer `current_time` last pushed into the decoder
    applied_time: Option<f64>,
}

/// Textures for every media layer
pub struct TextureCache {
    entries: HashMap<String, CacheEntry>,
    next_generation: u64,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a layer source to a local path. Only plain paths and `file://` URIs are supported.
pub fn resolve_source(uri: &str) -> std::result::Result<PathBuf, String> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err("no source set".to_string());
    }
    if let Some(path) = uri.strip_prefix("file://") {
        // file://localhost/path and file:///path both name /path
        let path = path.strip_prefix("localhost").unwrap_or(path);
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(format!("unsupported URI scheme '{}'", scheme));
    }
    Ok(PathBuf::from(uri))
}

impl TextureCache {
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            entries: HashMap::new(),
            next_generation: 0,
            completion_tx,
            completion_rx,
            workers: Vec::new(),
            shut_down: false,
        }
    }

    fn begin_load(&mut self, layer_id: &str, uri: &str, video: bool) -> Result<u64> {
        if self.shut_down {
            return Err(ProjectionError::asset_load(
                layer_id,
                uri,
                "texture cache is shut down",
            ));
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let entry = self
            .entries
            .entry(layer_id.to_string())
            .or_insert_with(|| CacheEntry {
                source: String::new(),
                video,
                generation,
                texture: None,
                media: None,
                frame_serial: 0,
                applied_time: None,
            });
        entry.source = uri.to_string();
        entry.video = video;
        entry.generation = generation;
        if video {
            // The old decoder belongs to the previous source
            entry.media = None;
            entry.frame_serial = 0;
            entry.applied_time = None;
        }
        Ok(generation)
    }

    /// Decode an image in the background. A previous texture stays in place until the
    /// new one arrives, and stays for good if decoding fails.
    pub fn load_image(&mut self, layer_id: &str, uri: &str) -> Result<()> {
        let generation = self.begin_load(layer_id, uri, false)?;
        if let Some(entry) = self.entries.get_mut(layer_id) {
            // Switching away from video: the decoder has no further use
            entry.media = None;
        }

        let path = resolve_source(uri).map_err(|m| ProjectionError::asset_load(layer_id, uri, m))?;
        let (id, source) = (layer_id.to_string(), uri.to_string());
        let tx = self.completion_tx.clone();

        let worker = std::thread::Builder::new()
            .name(format!("image-{}", layer_id))
            .spawn(move || {
                let outcome = match image::open(&path) {
                    Ok(img) => match Texture::from_image(&img.to_rgba8()) {
                        Some(texture) => LoadOutcome::Image(texture),
                        None => LoadOutcome::Failed("image has no pixels".to_string()),
                    },
                    Err(e) => LoadOutcome::Failed(e.to_string()),
                };
                let _ = tx.send(Completion {
                    layer_id: id,
                    source,
                    generation,
                    outcome,
                });
            })
            .map_err(|e| ProjectionError::asset_load(layer_id, uri, e.to_string()))?;
        self.workers.push(worker);
        log::debug!("Loading image '{}' for layer {}", uri, layer_id);
        Ok(())
    }

    /// Attach a background decoder; the texture appears once a frame is buffered
    pub fn load_video(&mut self, layer_id: &str, uri: &str) -> Result<()> {
        let generation = self.begin_load(layer_id, uri, true)?;
        let path = resolve_source(uri).map_err(|m| ProjectionError::asset_load(layer_id, uri, m))?;

        let ticket = LoadTicket {
            layer_id: layer_id.to_string(),
            source: uri.to_string(),
            generation,
            completions: self.completion_tx.clone(),
        };
        let media = MediaHandle::spawn(path, ticket)
            .map_err(|e| ProjectionError::asset_load(layer_id, uri, e.to_string()))?;

        if let Some(entry) = self.entries.get_mut(layer_id) {
            entry.media = Some(media);
        }
        log::debug!("Loading video '{}' for layer {}", uri, layer_id);
        Ok(())
    }

    /// Apply finished loads. Returns the failures; stale results are discarded.
    pub fn poll_completions(&mut self) -> Vec<ProjectionError> {
        let mut errors = Vec::new();
        if self.shut_down {
            return errors;
        }

        while let Ok(completion) = self.completion_rx.try_recv() {
            let Some(entry) = self.entries.get_mut(&completion.layer_id) else {
                log::debug!("Discarding completion for evicted layer {}", completion.layer_id);
                continue;
            };
            if entry.generation != completion.generation || entry.source != completion.source {
                log::debug!(
                    "Discarding stale load of '{}' for layer {}",
                    completion.source,
                    completion.layer_id
                );
                continue;
            }

            match completion.outcome {
                LoadOutcome::Image(texture) => {
                    log::info!(
                        "Loaded '{}' ({}x{}) for layer {}",
                        completion.source,
                        texture.width(),
                        texture.height(),
                        completion.layer_id
                    );
                    entry.texture = Some(texture);
                }
                LoadOutcome::VideoReady { duration } => {
                    log::info!(
                        "Video '{}' ready for layer {} ({:.2}s)",
                        completion.source,
                        completion.layer_id,
                        duration
                    );
                }
                LoadOutcome::Failed(message) => {
                    log::warn!(
                        "Failed to load '{}' for layer {}: {}",
                        completion.source,
                        completion.layer_id,
                        message
                    );
                    errors.push(ProjectionError::asset_load(
                        completion.layer_id,
                        completion.source,
                        message,
                    ));
                }
            }
        }

        self.workers.retain(|w| !w.is_finished());
        errors
    }

    /// Copy the newest decoded frame into the layer's texture. No-op until a frame exists.
    pub fn update_frame(&mut self, layer_id: &str) {
        let Some(entry) = self.entries.get_mut(layer_id) else {
            return;
        };
        let Some(media) = &entry.media else {
            return;
        };
        if let Some(frame) = media.take_frame(entry.frame_serial) {
            if let Some(texture) = Texture::from_image(&frame.image) {
                entry.texture = Some(texture);
                entry.frame_serial = frame.serial;
            }
        }
    }

    /// Push a video layer's transport state into its decoder.
    ///
    /// `current_time` moves the decoder only when it differs from the value applied
    /// last; otherwise the decoder keeps its own clock, and pausing freezes it there.
    pub fn apply_video_state(&mut self, layer_id: &str, video: &VideoContent) {
        let Some(entry) = self.entries.get_mut(layer_id) else {
            return;
        };
        let Some(media) = entry.media.as_ref() else {
            return;
        };
        media.set_looping(video.looping);
        media.set_volume(video.volume);
        if entry.applied_time != Some(video.current_time) {
            media.seek(video.current_time);
            entry.applied_time = Some(video.current_time);
        }
        if video.playing {
            media.play();
        } else {
            media.pause();
        }
    }

    /// Seek a video decoder
    pub fn seek(&mut self, layer_id: &str, time: f64) {
        if let Some(media) = self.entries.get(layer_id).and_then(|e| e.media.as_ref()) {
            media.seek(time);
        }
    }

    /// Bring the cache in line with a layer list: load media whose source changed,
    /// evict layers that are gone, and refresh every video texture.
    ///
    /// Returns load requests that could not even be started.
    pub fn sync_layers(&mut self, layers: &[Layer]) -> Vec<ProjectionError> {
        let mut errors = Vec::new();

        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|id| {
                !layers
                    .iter()
                    .any(|l| &l.id == *id && l.kind.media_source().is_some())
            })
            .cloned()
            .collect();
        for id in stale {
            self.evict(&id);
        }

        for layer in layers {
            let (source, is_video) = match &layer.kind {
                LayerKind::Image(image) => (&image.source, false),
                LayerKind::Video(video) => (&video.source, true),
                _ => continue,
            };
            let current = self.entries.get(&layer.id).map(|e| e.source.as_str());
            if source.is_empty() {
                if current.map_or(false, |s| !s.is_empty()) {
                    self.evict(&layer.id);
                }
                continue;
            }

            // A failed start is remembered as the entry's source, so it is not retried
            // until the source changes
            let was_video = self.entries.get(&layer.id).map(|e| e.video);
            if current != Some(source.as_str()) || was_video != Some(is_video) {
                let result = if is_video {
                    self.load_video(&layer.id, source)
                } else {
                    self.load_image(&layer.id, source)
                };
                if let Err(e) = result {
                    errors.push(e);
                }
            }

            if let LayerKind::Video(video) = &layer.kind {
                self.apply_video_state(&layer.id, video);
                self.update_frame(&layer.id);
            }
        }
        errors
    }

    /// Release a layer's texture and stop its decoder
    pub fn evict(&mut self, layer_id: &str) {
        if let Some(mut entry) = self.entries.remove(layer_id) {
            if let Some(media) = entry.media.as_mut() {
                media.stop();
            }
            log::debug!("Evicted texture for layer {}", layer_id);
        }
    }

    /// Install a ready texture directly, bypassing decoding
    pub fn insert_texture(&mut self, layer_id: &str, texture: Texture) {
        self.next_generation += 1;
        self.entries.insert(
            layer_id.to_string(),
            CacheEntry {
                source: String::new(),
                video: false,
                generation: self.next_generation,
                texture: Some(texture),
                media: None,
                frame_serial: 0,
                applied_time: None,
            },
        );
    }

    pub fn texture(&self, layer_id: &str) -> Option<&Texture> {
        self.entries.get(layer_id).and_then(|e| e.texture.as_ref())
    }

    pub fn media(&self, layer_id: &str) -> Option<&MediaHandle> {
        self.entries.get(layer_id).and_then(|e| e.media.as_ref())
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.entries.contains_key(layer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every texture, stop and join all decoders and workers. Nothing loaded
    /// before this call is ever applied afterwards.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for (_, mut entry) in self.entries.drain() {
            if let Some(media) = entry.media.as_mut() {
                media.stop();
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Image worker panicked");
            }
        }
        while self.completion_rx.try_recv().is_ok() {}
        log::info!("Texture cache shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for TextureCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
