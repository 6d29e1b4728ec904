//! WebSocket transport layer

pub mod handler;
pub mod outbox;
pub mod protocol;
