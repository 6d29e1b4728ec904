//! Player and room registries
//!
//! Exclusive-ownership maps keyed by identifier. Player records live here;
//! rooms reference members by id only. Both maps are safe under concurrent
//! access from connection handlers and cleanup paths.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::game::error::{GameError, GameResult};
use crate::game::room::Room;
use crate::game::{PlayerId, RoomId, SECRET_BUTTON_USES};
use crate::ws::protocol::Role;

/// A connected player, owned exclusively by the registry
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub room_id: RoomId,
    pub role: Option<Role>,
    /// Role objective text, cached at assignment time
    pub objective: Option<String>,
    pub secret_uses: u8,
    pub has_voted: bool,
    pub objective_completed: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: Option<String>, room_id: RoomId) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&id));
        Self {
            id,
            name,
            room_id,
            role: None,
            objective: None,
            secret_uses: SECRET_BUTTON_USES,
            has_voted: false,
            objective_completed: false,
        }
    }

    /// Clear all per-game state (room reset)
    pub fn reset_for_new_game(&mut self) {
        self.role = None;
        self.objective = None;
        self.secret_uses = SECRET_BUTTON_USES;
        self.has_voted = false;
        self.objective_completed = false;
    }
}

fn default_name(id: &PlayerId) -> String {
    format!("Crew_{}", &id.to_string()[..8])
}

/// Registry of all connected players currently in a room
#[derive(Default)]
pub struct PlayerRegistry {
    players: DashMap<PlayerId, Player>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, player: Player) {
        self.players.insert(player.id, player);
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    /// Fetch a copy of a player record
    pub fn get(&self, id: &PlayerId) -> GameResult<Player> {
        self.players
            .get(id)
            .map(|p| p.value().clone())
            .ok_or_else(|| GameError::NotFound("Player not found".to_string()))
    }

    /// Apply a mutation to a player record
    pub fn update<R>(&self, id: &PlayerId, f: impl FnOnce(&mut Player) -> R) -> GameResult<R> {
        self.players
            .get_mut(id)
            .map(|mut p| f(p.value_mut()))
            .ok_or_else(|| GameError::NotFound("Player not found".to_string()))
    }

    pub fn remove(&self, id: &PlayerId) -> Option<Player> {
        self.players.remove(id).map(|(_, p)| p)
    }

    pub fn count(&self) -> usize {
        self.players.len()
    }
}

/// Registry of all live rooms; each room carries its own lock
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room under a fresh unique short code
    pub fn create(&self, seed: u64) -> (RoomId, Arc<Mutex<Room>>) {
        loop {
            let id = generate_room_id(&mut rand::thread_rng());
            if self.rooms.contains_key(&id) {
                continue;
            }
            let room = Arc::new(Mutex::new(Room::new(id.clone(), seed)));
            self.rooms.insert(id.clone(), room.clone());
            debug!(room_id = %id, "Room created");
            return (id, room);
        }
    }

    pub fn get(&self, id: &RoomId) -> GameResult<Arc<Mutex<Room>>> {
        self.rooms
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| GameError::NotFound("Room not found".to_string()))
    }

    pub fn remove(&self, id: &RoomId) -> Option<Arc<Mutex<Room>>> {
        self.rooms.remove(id).map(|(_, r)| r)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }
}

/// 5-character uppercase alphanumeric room code
fn generate_room_id<R: Rng>(rng: &mut R) -> RoomId {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..5)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
