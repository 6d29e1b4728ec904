//! Room state: one isolated game session with its own simulated ship

use std::collections::{BTreeMap, HashMap};

use rand_chacha::ChaCha8Rng;
use rand::SeedableRng;
use tokio::task::JoinHandle;

use crate::game::{
    PlayerId, RoomId, BROADCAST_EVENT_COUNT, EVENT_LOG_CAP, GAME_DURATION_SECS, TOTAL_DISTANCE,
};
use crate::ws::protocol::{ShipEvent, SystemKind};

/// Room lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Created, waiting for a game to start
    Lobby,
    /// Tick task running
    Active,
    /// End-game broadcast sent; auto-reset pending
    Ending,
}

/// Authoritative room state, guarded by one mutex per room
pub struct Room {
    pub id: RoomId,
    /// Insertion order = join order; role assignment indexes into this
    pub member_ids: Vec<PlayerId>,
    pub phase: RoomPhase,
    pub systems: BTreeMap<SystemKind, u8>,
    /// floor(mean of system healths), recomputed each tick
    pub overall_health: u8,
    /// Raw distance; clamped to `total_distance` at emit time only
    pub distance: f64,
    pub total_distance: f64,
    pub time_left: i64,
    /// Appends stop once the log holds `EVENT_LOG_CAP` entries
    pub events: Vec<ShipEvent>,
    /// voter -> target, cleared after each resolution
    pub votes: HashMap<PlayerId, PlayerId>,
    /// Present only while Active; at most one per room
    pub tick_handle: Option<JoinHandle<()>>,
    pub rng: ChaCha8Rng,
}

impl Room {
    pub fn new(id: RoomId, seed: u64) -> Self {
        Self {
            id,
            member_ids: Vec::new(),
            phase: RoomPhase::Lobby,
            systems: full_systems(),
            overall_health: 100,
            distance: 0.0,
            total_distance: TOTAL_DISTANCE,
            time_left: GAME_DURATION_SECS,
            events: Vec::new(),
            votes: HashMap::new(),
            tick_handle: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn started(&self) -> bool {
        self.phase == RoomPhase::Active
    }

    /// Add a member, preserving join order; no-op on duplicates
    pub fn add_member(&mut self, id: PlayerId) {
        if !self.member_ids.contains(&id) {
            self.member_ids.push(id);
        }
    }

    /// Remove a member; returns whether it was present
    pub fn remove_member(&mut self, id: &PlayerId) -> bool {
        let before = self.member_ids.len();
        self.member_ids.retain(|m| m != id);
        self.member_ids.len() != before
    }

    pub fn is_member(&self, id: &PlayerId) -> bool {
        self.member_ids.contains(id)
    }

    pub fn system_health(&self, kind: SystemKind) -> u8 {
        self.systems.get(&kind).copied().unwrap_or(0)
    }

    /// Reduce a system's health, flooring at 0
    pub fn damage_system(&mut self, kind: SystemKind, amount: u8) {
        if let Some(health) = self.systems.get_mut(&kind) {
            *health = health.saturating_sub(amount);
        }
    }

    /// Raise a system's health, capped at 100
    pub fn repair_system(&mut self, kind: SystemKind, amount: u8) -> u8 {
        let health = self.systems.entry(kind).or_insert(0);
        *health = (*health + amount).min(100);
        *health
    }

    /// floor(mean of system healths)
    pub fn recompute_overall(&mut self) -> u8 {
        let total: u32 = self.systems.values().map(|&h| h as u32).sum();
        self.overall_health = (total / self.systems.len() as u32) as u8;
        self.overall_health
    }

    /// Append an event unless the per-game cap was reached
    pub fn push_event(&mut self, event: ShipEvent) -> bool {
        if self.events.len() >= EVENT_LOG_CAP {
            return false;
        }
        self.events.push(event);
        true
    }

    /// The trailing slice of the log that gets broadcast
    pub fn recent_events(&self) -> Vec<ShipEvent> {
        let skip = self.events.len().saturating_sub(BROADCAST_EVENT_COUNT);
        self.events[skip..].to_vec()
    }

    /// Distance as shown to clients
    pub fn clamped_distance(&self) -> f64 {
        self.distance.min(self.total_distance)
    }

    /// Cancel the periodic tick task, if one is running
    pub fn stop_tick(&mut self) {
        if let Some(handle) = self.tick_handle.take() {
            handle.abort();
        }
    }

    /// Restore all mutable per-game fields to initial values
    pub fn reset_for_new_game(&mut self) {
        self.phase = RoomPhase::Lobby;
        self.systems = full_systems();
        self.overall_health = 100;
        self.distance = 0.0;
        self.time_left = GAME_DURATION_SECS;
        self.events.clear();
        self.votes.clear();
    }
}

fn full_systems() -> BTreeMap<SystemKind, u8> {
    SystemKind::ALL.iter().map(|&k| (k, 100)).collect()
}
