//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hidden crew roles, dealt at game start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Captain,
    Technician,
    Spy,
    #[serde(rename = "AI")]
    Ai,
    Saboteur,
}

impl Role {
    /// Full role set, in deal order (first two are mandatory)
    pub const ALL: [Role; 5] = [
        Role::Captain,
        Role::Technician,
        Role::Spy,
        Role::Ai,
        Role::Saboteur,
    ];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Captain => "Captain",
            Role::Technician => "Technician",
            Role::Spy => "Spy",
            Role::Ai => "AI",
            Role::Saboteur => "Saboteur",
        };
        f.write_str(name)
    }
}

/// Ship subsystems tracked by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemKind {
    Engine,
    Oxygen,
    Navigation,
    Shield,
    Communication,
}

impl SystemKind {
    pub const ALL: [SystemKind; 5] = [
        SystemKind::Engine,
        SystemKind::Oxygen,
        SystemKind::Navigation,
        SystemKind::Shield,
        SystemKind::Communication,
    ];
}

impl std::fmt::Display for SystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SystemKind::Engine => "Engine",
            SystemKind::Oxygen => "Oxygen",
            SystemKind::Navigation => "Navigation",
            SystemKind::Shield => "Shield",
            SystemKind::Communication => "Communication",
        };
        f.write_str(name)
    }
}

/// Secret-button actions; unrecognized action names decode as `Lights`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretAction {
    Engine,
    Door,
    Hack,
    #[serde(other)]
    Lights,
}

/// Random hazard categories the tick loop can roll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Meteor,
    Radiation,
    Alien,
    SystemFailure,
    SecretAction,
}

/// An entry in a room's event log, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipEvent {
    pub kind: EventKind,
    pub message: String,
    /// Unix milliseconds
    pub timestamp: u64,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Create a new room and join it as the first member
    CreateRoom {
        /// Display name; defaults from the connection id
        name: Option<String>,
    },

    /// Join an existing room by its short code
    JoinRoom {
        room_id: String,
        name: Option<String>,
    },

    /// Start the game in the caller's room
    StartGame,

    /// Spend one secret-button use
    UseSecretButton {
        action: SecretAction,
        /// Reserved for targeted actions; currently cosmetic
        target: Option<Uuid>,
    },

    /// Repair one ship system
    RepairSystem { system: SystemKind },

    /// Vote to eject a room member
    CastVote { target_player_id: Uuid },

    /// Room-wide chat
    SendChat { message: String },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { player_id: Uuid, server_time: u64 },

    /// Confirmation of room creation (sent to the creator)
    RoomCreated {
        room_id: String,
        player: String,
        room: RoomView,
    },

    /// Confirmation of room join (sent to the joiner)
    JoinedRoom {
        room_id: String,
        player: String,
        room: RoomView,
    },

    /// Membership or lobby state changed
    RoomUpdated {
        room_id: String,
        players: Vec<PlayerInfo>,
        game_started: bool,
    },

    /// Secret role deal (delivered to the individual player only)
    RoleAssigned {
        role: Role,
        objective: String,
        secret_uses: u8,
    },

    /// Game has started
    GameStarted { room: RoomView },

    /// Someone pressed the secret button
    SecretButtonUsed {
        player: String,
        action: SecretAction,
        message: String,
        remaining_uses: u8,
    },

    /// A system was repaired
    SystemRepaired {
        system: SystemKind,
        new_health: u8,
        repaired_by: String,
        is_technician: bool,
    },

    /// A vote was recorded
    VoteCasted {
        voter: String,
        target: String,
        votes: usize,
        total_players: usize,
    },

    /// Vote resolution ejected a player
    PlayerEjected { player: String, votes: usize },

    /// Sent to the ejected player, immediately before forced disconnect
    Ejected { reason: String },

    /// A random hazard fired this tick
    RandomEvent {
        kind: EventKind,
        message: String,
        timestamp: u64,
    },

    /// Per-tick simulation snapshot
    GameUpdate {
        time_left: i64,
        /// Clamped to `total_distance`
        distance: f64,
        total_distance: f64,
        systems: BTreeMap<SystemKind, u8>,
        ship_health: u8,
        /// Last 5 log entries
        events: Vec<ShipEvent>,
    },

    /// Game over
    GameEnded {
        message: String,
        winners: Vec<String>,
        final_stats: FinalStats,
    },

    /// Room-wide chat relay
    ChatMessage {
        sender: String,
        message: String,
        /// RFC 3339
        timestamp: String,
        /// Sender's role, included only while a game is running
        role: Option<Role>,
    },

    /// Error message (individual, never closes the connection)
    Error { code: String, message: String },
}

/// Player info for lobby/room payloads (never includes the role)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub name: String,
}

/// Room state as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: String,
    pub players: Vec<PlayerInfo>,
    pub game_started: bool,
    pub systems: BTreeMap<SystemKind, u8>,
    pub distance: f64,
    pub total_distance: f64,
    pub time_left: i64,
}

/// Final ship readout attached to `GameEnded`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStats {
    pub ship_health: u8,
    pub distance: f64,
    pub systems: BTreeMap<SystemKind, u8>,
    pub time_left: i64,
}
