//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomService;
use crate::ws::outbox::Outbox;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: RoomService,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // The outbox is the engine's only view of the transport layer
        let outbox = Outbox::new();
        let service = RoomService::new(outbox);

        Self { config, service }
    }
}
