//! WebSocket transport: wire protocol and socket handlers

pub mod handler;
pub mod protocol;
