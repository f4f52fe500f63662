//! Spectator streaming: wire protocol, per-match hub and WebSocket handler

pub mod handler;
pub mod hub;
pub mod protocol;

pub use hub::{Broadcaster, Hub};
pub use protocol::ServerMsg;
