//! Connection outbox - routes engine messages to live WebSocket sessions
//!
//! The game engine only ever sees logical [`ServerMsg`] values; socket
//! framing stays in the handler. Each connection registers an unbounded
//! channel here, and the session's writer task drains it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Instruction for a session's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Deliver a message
    Msg(ServerMsg),
    /// Close the socket; any reason message was queued before this
    Close,
}

/// Registry of live connections
#[derive(Clone, Default)]
pub struct Outbox {
    conns: Arc<DashMap<Uuid, mpsc::UnboundedSender<Outbound>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back its outbound receiver
    pub fn register(&self, player_id: Uuid) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.insert(player_id, tx);
        rx
    }

    /// Drop a connection's channel (called on socket close)
    pub fn unregister(&self, player_id: &Uuid) {
        self.conns.remove(player_id);
    }

    /// Send to one connection; silently dropped if it is gone
    pub fn send(&self, player_id: &Uuid, msg: ServerMsg) {
        if let Some(tx) = self.conns.get(player_id) {
            let _ = tx.send(Outbound::Msg(msg));
        }
    }

    /// Send the same message to every listed connection
    pub fn send_to_all(&self, player_ids: &[Uuid], msg: &ServerMsg) {
        for id in player_ids {
            self.send(id, msg.clone());
        }
    }

    /// Force-close a connection. Messages queued before this call (the
    /// `Ejected` reason) are still delivered by the writer task.
    pub fn disconnect(&self, player_id: &Uuid) {
        if let Some((_, tx)) = self.conns.remove(player_id) {
            let _ = tx.send(Outbound::Close);
            debug!(player_id = %player_id, "Forced disconnect queued");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }
}
