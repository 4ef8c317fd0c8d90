//! API module for remote control
//!
//! WebSocket protocol, command handling and the control server.

mod handlers;
mod protocol;
mod server;

pub use handlers::CommandHandler;
pub use protocol::{AckPayload, ControlCommand, ControlMessage, ServerMessage, COMMANDS, WELCOME_MESSAGE};
pub use server::{ControlServer, DEFAULT_PORT};
