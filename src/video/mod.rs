//! Video module for layer media
//!
//! Image decoding, background video decoding and the per-layer texture cache.

mod player;
mod texture;
mod texture_cache;

pub use player::{MediaHandle, PlaybackClock, PlaybackState, VideoFrame, DEFAULT_SEQUENCE_FPS};
pub use texture::{AddressMode, Texture};
pub use texture_cache::{resolve_source, Completion, LoadOutcome, TextureCache};
