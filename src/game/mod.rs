//! Room state machine and tick simulation engine

pub mod error;
pub mod registry;
pub mod roles;
pub mod room;
pub mod service;
pub mod tick;
pub mod votes;

pub use error::{GameError, GameResult};
pub use registry::{Player, PlayerRegistry, RoomRegistry};
pub use room::{Room, RoomPhase};
pub use service::RoomService;

use std::time::Duration;

/// Opaque connection identifier; stable for the connection's lifetime
pub type PlayerId = uuid::Uuid;
/// Short room code, e.g. "K3XP9"
pub type RoomId = String;

/// Fixed game parameters
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 10;
pub const SECRET_BUTTON_USES: u8 = 3;
pub const TOTAL_DISTANCE: f64 = 100.0;
pub const GAME_DURATION_SECS: i64 = 15 * 60;
pub const EVENT_LOG_CAP: usize = 10;
pub const BROADCAST_EVENT_COUNT: usize = 5;

/// One simulation step per second while a room is active
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Delay before a finished room resets back to the lobby
pub const ROOM_RESET_DELAY: Duration = Duration::from_secs(30);
