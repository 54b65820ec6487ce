//! WebSocket transport for connected participants

pub mod handler;
pub mod protocol;
