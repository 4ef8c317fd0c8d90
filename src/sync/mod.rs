//! Sync channel between the editing surface and the output surface
//!
//! The editing side publishes a serialized snapshot every tick; the output side renders
//! the newest one on its own schedule and answers once with a ready handshake.

mod endpoint;
mod payload;

pub use endpoint::{sync_channel, EditingEndpoint, EditingState, OutputEndpoint, OutputState, OutputSurface};
pub use payload::{SyncFrame, SyncPayload};
