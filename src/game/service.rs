//! Room lifecycle controller
//!
//! The orchestrating surface of the engine: handles create/join/start/
//! leave and all in-game actions, and is the only component that talks to
//! the outbox. Lock order is room mutex first, then player entries.

use std::sync::Arc;

use tracing::{info, warn};

use crate::game::registry::{Player, PlayerRegistry, RoomRegistry};
use crate::game::room::{Room, RoomPhase};
use crate::game::tick::{self, EndReason, TickOutcome};
use crate::game::{
    roles, votes, GameError, GameResult, PlayerId, RoomId, MAX_PLAYERS, MIN_PLAYERS,
    ROOM_RESET_DELAY,
};
use crate::util::time::{rfc3339_now, unix_millis};
use crate::ws::outbox::Outbox;
use crate::ws::protocol::{
    ClientMsg, EventKind, FinalStats, PlayerInfo, Role, RoomView, SecretAction, ServerMsg,
    ShipEvent, SystemKind,
};

/// Fixed effect of a secret-button action
struct SecretEffect {
    damage: Option<(SystemKind, u8)>,
    message: &'static str,
}

fn secret_effect(action: SecretAction) -> SecretEffect {
    match action {
        SecretAction::Lights => SecretEffect {
            damage: None,
            message: "Lights go out for 30 seconds!",
        },
        SecretAction::Engine => SecretEffect {
            damage: Some((SystemKind::Engine, 20)),
            message: "The engine is malfunctioning!",
        },
        SecretAction::Door => SecretEffect {
            damage: Some((SystemKind::Oxygen, 15)),
            message: "An emergency door blew open!",
        },
        SecretAction::Hack => SecretEffect {
            damage: Some((SystemKind::Navigation, 25)),
            message: "The navigation system has been hacked!",
        },
    }
}

/// Repair amounts; the Technician is better at it
fn repair_amount(role: Option<Role>) -> u8 {
    if role == Some(Role::Technician) {
        35
    } else {
        15
    }
}

/// The room lifecycle controller
#[derive(Clone)]
pub struct RoomService {
    players: Arc<PlayerRegistry>,
    rooms: Arc<RoomRegistry>,
    outbox: Outbox,
}

impl RoomService {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            players: Arc::new(PlayerRegistry::new()),
            rooms: Arc::new(RoomRegistry::new()),
            outbox,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.active_rooms()
    }

    pub fn player_count(&self) -> usize {
        self.players.count()
    }

    /// Dispatch an inbound message; any rejection goes back to the sender
    /// as an `error` message and never tears down the connection.
    pub fn handle(&self, player_id: PlayerId, msg: ClientMsg) {
        let result = match msg {
            ClientMsg::CreateRoom { name } => self.create_room(player_id, name),
            ClientMsg::JoinRoom { room_id, name } => self.join_room(player_id, &room_id, name),
            ClientMsg::StartGame => self.start_game(player_id),
            ClientMsg::UseSecretButton { action, .. } => self.use_secret_button(player_id, action),
            ClientMsg::RepairSystem { system } => self.repair_system(player_id, system),
            ClientMsg::CastVote { target_player_id } => {
                self.cast_vote(player_id, target_player_id)
            }
            ClientMsg::SendChat { message } => self.send_chat(player_id, message),
        };

        if let Err(e) = result {
            warn!(player_id = %player_id, error = %e, "Rejected client action");
            self.outbox.send(
                &player_id,
                ServerMsg::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            );
        }
    }

    fn create_room(&self, player_id: PlayerId, name: Option<String>) -> GameResult<()> {
        if self.players.contains(&player_id) {
            return Err(GameError::InvalidState("Already in a room".to_string()));
        }

        let (room_id, room_arc) = self.rooms.create(rand::random());
        let player = Player::new(player_id, name, room_id.clone());
        let player_name = player.name.clone();
        self.players.insert(player);

        let mut room = room_arc.lock();
        room.add_member(player_id);

        self.outbox.send(
            &player_id,
            ServerMsg::RoomCreated {
                room_id: room_id.clone(),
                player: player_name,
                room: self.room_view(&room),
            },
        );
        self.outbox
            .send_to_all(&room.member_ids, &self.room_update_msg(&room));
        self.system_chat(
            &room,
            format!("Room {} created! Share this code with your friends.", room_id),
        );

        info!(room_id = %room_id, player_id = %player_id, "Room created");
        Ok(())
    }

    fn join_room(
        &self,
        player_id: PlayerId,
        room_id: &str,
        name: Option<String>,
    ) -> GameResult<()> {
        if self.players.contains(&player_id) {
            return Err(GameError::InvalidState("Already in a room".to_string()));
        }

        let room_id: RoomId = room_id.trim().to_uppercase();
        let room_arc = self.rooms.get(&room_id)?;
        let mut room = room_arc.lock();

        if room.started() {
            return Err(GameError::InvalidState("Game already started".to_string()));
        }
        if room.member_ids.len() >= MAX_PLAYERS {
            return Err(GameError::Capacity(format!(
                "Room is full (max {} players)",
                MAX_PLAYERS
            )));
        }

        let player = Player::new(player_id, name, room_id.clone());
        let player_name = player.name.clone();
        self.players.insert(player);
        room.add_member(player_id);

        self.outbox.send(
            &player_id,
            ServerMsg::JoinedRoom {
                room_id: room_id.clone(),
                player: player_name.clone(),
                room: self.room_view(&room),
            },
        );
        self.outbox
            .send_to_all(&room.member_ids, &self.room_update_msg(&room));
        self.system_chat(&room, format!("{} joined the game!", player_name));

        info!(
            room_id = %room_id,
            player_id = %player_id,
            members = room.member_ids.len(),
            "Player joined room"
        );
        Ok(())
    }

    fn start_game(&self, player_id: PlayerId) -> GameResult<()> {
        let player = self.players.get(&player_id)?;
        let room_arc = self.rooms.get(&player.room_id)?;
        let mut room = room_arc.lock();

        match room.phase {
            RoomPhase::Active => {
                return Err(GameError::InvalidState("Game already started".to_string()))
            }
            RoomPhase::Ending => {
                return Err(GameError::InvalidState(
                    "Game is ending, wait for the room to reset".to_string(),
                ))
            }
            RoomPhase::Lobby => {}
        }
        if room.member_ids.len() < MIN_PLAYERS {
            return Err(GameError::InvalidState(format!(
                "At least {} players are required to start",
                MIN_PLAYERS
            )));
        }

        let members = room.member_ids.clone();
        let roles = roles::assign_roles(members.len(), &mut room.rng);
        for (member, role) in members.iter().zip(roles) {
            let deal = self.players.update(member, |p| {
                p.role = Some(role);
                p.objective = Some(roles::objective_text(role).to_string());
                ServerMsg::RoleAssigned {
                    role,
                    objective: p.objective.clone().unwrap_or_default(),
                    secret_uses: p.secret_uses,
                }
            })?;
            // Roles go to individual players only, never room-wide
            self.outbox.send(member, deal);
        }

        room.phase = RoomPhase::Active;
        room.stop_tick();
        room.tick_handle = Some(tick::spawn(self.clone(), room.id.clone()));

        let view = self.room_view(&room);
        self.outbox
            .send_to_all(&room.member_ids, &ServerMsg::GameStarted { room: view });
        self.system_chat(
            &room,
            "GAME STARTED! Secret roles have been dealt. Check your objective!".to_string(),
        );

        info!(room_id = %room.id, members = room.member_ids.len(), "Game started");
        Ok(())
    }

    fn use_secret_button(&self, player_id: PlayerId, action: SecretAction) -> GameResult<()> {
        let player = self.players.get(&player_id)?;
        let room_arc = self.rooms.get(&player.room_id)?;
        let mut room = room_arc.lock();

        if !room.started() {
            return Err(GameError::InvalidState("Game not started".to_string()));
        }
        if player.secret_uses == 0 {
            return Err(GameError::InvalidState(
                "No secret button uses left!".to_string(),
            ));
        }

        let remaining = self.players.update(&player_id, |p| {
            p.secret_uses = p.secret_uses.saturating_sub(1);
            p.secret_uses
        })?;

        let effect = secret_effect(action);
        if let Some((system, damage)) = effect.damage {
            room.damage_system(system, damage);
        }
        room.push_event(ShipEvent {
            kind: EventKind::SecretAction,
            message: effect.message.to_string(),
            timestamp: unix_millis(),
        });

        self.outbox.send_to_all(
            &room.member_ids,
            &ServerMsg::SecretButtonUsed {
                player: player.name.clone(),
                action,
                message: effect.message.to_string(),
                remaining_uses: remaining,
            },
        );
        self.system_chat(
            &room,
            format!("{} used the secret button! {}", player.name, effect.message),
        );
        Ok(())
    }

    fn repair_system(&self, player_id: PlayerId, system: SystemKind) -> GameResult<()> {
        let player = self.players.get(&player_id)?;
        let room_arc = self.rooms.get(&player.room_id)?;
        let mut room = room_arc.lock();

        if !room.started() {
            return Err(GameError::InvalidState("Game not started".to_string()));
        }

        let is_technician = player.role == Some(Role::Technician);
        let new_health = room.repair_system(system, repair_amount(player.role));

        self.outbox.send_to_all(
            &room.member_ids,
            &ServerMsg::SystemRepaired {
                system,
                new_health,
                repaired_by: player.name.clone(),
                is_technician,
            },
        );
        self.system_chat(
            &room,
            format!(
                "{} repaired the {} system to {}%",
                player.name, system, new_health
            ),
        );
        Ok(())
    }

    fn cast_vote(&self, voter_id: PlayerId, target_id: PlayerId) -> GameResult<()> {
        let voter = self.players.get(&voter_id)?;
        if voter.has_voted {
            return Err(GameError::InvalidState(
                "Already voted this round".to_string(),
            ));
        }

        let room_arc = self.rooms.get(&voter.room_id)?;
        let mut room = room_arc.lock();
        if !room.started() {
            return Err(GameError::InvalidState("Game not started".to_string()));
        }

        let target = self
            .players
            .get(&target_id)
            .ok()
            .filter(|t| t.room_id == room.id && room.is_member(&target_id))
            .ok_or_else(|| {
                GameError::NotFound("Target player is not in this room".to_string())
            })?;

        self.players.update(&voter_id, |p| p.has_voted = true)?;
        room.votes.insert(voter_id, target_id);

        self.outbox.send_to_all(
            &room.member_ids,
            &ServerMsg::VoteCasted {
                voter: voter.name.clone(),
                target: target.name.clone(),
                votes: room.votes.len(),
                total_players: room.member_ids.len(),
            },
        );

        if room.votes.len() == room.member_ids.len() {
            self.resolve_votes(&mut room);
        }
        Ok(())
    }

    /// Complete a voting round: clear the ledger and flags, then eject
    /// the chosen target if one exists.
    fn resolve_votes(&self, room: &mut Room) {
        let decision = votes::resolve_round(room);

        for member in room.member_ids.clone() {
            let _ = self.players.update(&member, |p| p.has_voted = false);
        }

        if let Some((target_id, count)) = decision {
            let name = self
                .players
                .get(&target_id)
                .map(|p| p.name)
                .unwrap_or_else(|_| "Unknown".to_string());

            room.remove_member(&target_id);
            self.outbox.send_to_all(
                &room.member_ids,
                &ServerMsg::PlayerEjected {
                    player: name.clone(),
                    votes: count,
                },
            );
            self.system_chat(room, format!("{} was thrown off the ship!", name));

            // Reason first, then forced disconnect, then registry cleanup
            self.outbox.send(
                &target_id,
                ServerMsg::Ejected {
                    reason: "Ejected by vote".to_string(),
                },
            );
            self.outbox.disconnect(&target_id);
            self.players.remove(&target_id);

            info!(room_id = %room.id, player_id = %target_id, votes = count, "Player ejected");
        }
    }

    fn send_chat(&self, player_id: PlayerId, message: String) -> GameResult<()> {
        let player = self.players.get(&player_id)?;
        let room_arc = self.rooms.get(&player.room_id)?;
        let room = room_arc.lock();

        let role = if room.started() { player.role } else { None };
        self.outbox.send_to_all(
            &room.member_ids,
            &ServerMsg::ChatMessage {
                sender: player.name.clone(),
                message,
                timestamp: rfc3339_now(),
                role,
            },
        );
        Ok(())
    }

    /// Connection closed. Idempotent: repeated signals for the same id and
    /// closes after ejection are no-ops.
    pub fn handle_disconnect(&self, player_id: PlayerId) {
        let Some(player) = self.players.remove(&player_id) else {
            return;
        };
        info!(player_id = %player_id, room_id = %player.room_id, "Player disconnected");

        let Ok(room_arc) = self.rooms.get(&player.room_id) else {
            return;
        };
        let mut room = room_arc.lock();
        if !room.remove_member(&player_id) {
            return;
        }

        if room.member_ids.is_empty() {
            room.stop_tick();
            let room_id = room.id.clone();
            drop(room);
            self.rooms.remove(&room_id);
            info!(room_id = %room_id, "Empty room destroyed");
            return;
        }

        self.outbox
            .send_to_all(&room.member_ids, &self.room_update_msg(&room));
        self.system_chat(&room, format!("{} left the game", player.name));

        // Drop the leaver's ballot; everyone left may already have voted,
        // in which case the round completes now instead of stalling.
        room.votes.remove(&player_id);
        if room.started() && !room.votes.is_empty() && room.votes.len() == room.member_ids.len() {
            self.resolve_votes(&mut room);
        }

        if room.started() && room.member_ids.len() < MIN_PLAYERS {
            self.finish_game(&mut room, EndReason::TooFewPlayers);
        }
    }

    /// One simulation step for the tick task. Existence and phase are
    /// re-checked under the lock, so a stale timer can never advance a
    /// destroyed or reset room.
    pub(crate) fn step_room(&self, room_id: &RoomId) -> TickOutcome {
        let Ok(room_arc) = self.rooms.get(room_id) else {
            return TickOutcome::Stopped;
        };
        let mut room = room_arc.lock();
        if !room.started() {
            return TickOutcome::Stopped;
        }

        let (event, end) = tick::advance(&mut room);

        if let Some(ShipEvent {
            kind,
            message,
            timestamp,
        }) = event
        {
            self.outbox.send_to_all(
                &room.member_ids,
                &ServerMsg::RandomEvent {
                    kind,
                    message,
                    timestamp,
                },
            );
        }

        let update = ServerMsg::GameUpdate {
            time_left: room.time_left,
            distance: room.clamped_distance(),
            total_distance: room.total_distance,
            systems: room.systems.clone(),
            ship_health: room.overall_health,
            events: room.recent_events(),
        };
        self.outbox.send_to_all(&room.member_ids, &update);

        match end {
            Some(reason) => TickOutcome::Ended(reason),
            None => TickOutcome::Continue,
        }
    }

    /// End a room's game from outside the room lock (tick task path)
    pub(crate) fn end_game(&self, room_id: &RoomId, reason: EndReason) {
        let Ok(room_arc) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = room_arc.lock();
        self.finish_game(&mut room, reason);
    }

    /// Active -> Ending: cancel the tick task, evaluate objectives,
    /// announce results, and schedule the lobby reset.
    fn finish_game(&self, room: &mut Room, reason: EndReason) {
        if room.phase != RoomPhase::Active {
            return;
        }
        // When the tick task itself triggers the ending, the abort lands
        // at its next await; the synchronous work below still completes.
        room.stop_tick();
        room.phase = RoomPhase::Ending;

        let final_stats = FinalStats {
            ship_health: room.overall_health,
            distance: room.clamped_distance(),
            systems: room.systems.clone(),
            time_left: room.time_left,
        };

        let mut winners = Vec::new();
        for member in room.member_ids.clone() {
            let Ok(player) = self.players.get(&member) else {
                continue;
            };
            let Some(role) = player.role else {
                continue;
            };
            if roles::objective_met(role, &final_stats, &mut room.rng) {
                let _ = self.players.update(&member, |p| p.objective_completed = true);
                winners.push(player.name);
            }
        }

        self.outbox.send_to_all(
            &room.member_ids,
            &ServerMsg::GameEnded {
                message: reason.message().to_string(),
                winners: winners.clone(),
                final_stats,
            },
        );
        let winner_list = if winners.is_empty() {
            "None".to_string()
        } else {
            winners.join(", ")
        };
        self.system_chat(
            room,
            format!("GAME OVER! {} Winners: {}", reason.message(), winner_list),
        );
        info!(room_id = %room.id, reason = ?reason, winners = winners.len(), "Game ended");

        let service = self.clone();
        let room_id = room.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ROOM_RESET_DELAY).await;
            service.reset_room(&room_id);
        });
    }

    /// Ending -> Lobby, 30 seconds after the end-game broadcast
    fn reset_room(&self, room_id: &RoomId) {
        let Ok(room_arc) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = room_arc.lock();
        if room.phase != RoomPhase::Ending {
            return;
        }

        room.reset_for_new_game();
        for member in room.member_ids.clone() {
            let _ = self.players.update(&member, |p| p.reset_for_new_game());
        }

        self.outbox
            .send_to_all(&room.member_ids, &self.room_update_msg(&room));
        self.system_chat(
            &room,
            "The ship is ready for a new voyage. Start when ready!".to_string(),
        );
        info!(room_id = %room.id, "Room reset to lobby");
    }

    fn member_infos(&self, room: &Room) -> Vec<PlayerInfo> {
        room.member_ids
            .iter()
            .filter_map(|id| self.players.get(id).ok())
            .map(|p| PlayerInfo {
                player_id: p.id,
                name: p.name,
            })
            .collect()
    }

    fn room_update_msg(&self, room: &Room) -> ServerMsg {
        ServerMsg::RoomUpdated {
            room_id: room.id.clone(),
            players: self.member_infos(room),
            game_started: room.started(),
        }
    }

    fn room_view(&self, room: &Room) -> RoomView {
        RoomView {
            room_id: room.id.clone(),
            players: self.member_infos(room),
            game_started: room.started(),
            systems: room.systems.clone(),
            distance: room.clamped_distance(),
            total_distance: room.total_distance,
            time_left: room.time_left,
        }
    }

    fn system_chat(&self, room: &Room, message: String) {
        self.outbox.send_to_all(
            &room.member_ids,
            &ServerMsg::ChatMessage {
                sender: "System".to_string(),
                message,
                timestamp: rfc3339_now(),
                role: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    use crate::game::tick::EndReason;
    use crate::ws::outbox::Outbound;

    fn connect(service: &RoomService) -> (PlayerId, UnboundedReceiver<Outbound>) {
        let id = Uuid::new_v4();
        let rx = service.outbox().register(id);
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(out) = rx.try_recv() {
            if let Outbound::Msg(m) = out {
                msgs.push(m);
            }
        }
        msgs
    }

    fn created_room_id(msgs: &[ServerMsg]) -> RoomId {
        msgs.iter()
            .find_map(|m| match m {
                ServerMsg::RoomCreated { room_id, .. } => Some(room_id.clone()),
                _ => None,
            })
            .expect("no roomCreated message")
    }

    fn assigned_role(msgs: &[ServerMsg]) -> Role {
        msgs.iter()
            .find_map(|m| match m {
                ServerMsg::RoleAssigned { role, .. } => Some(*role),
                _ => None,
            })
            .expect("no roleAssigned message")
    }

    fn has_error(msgs: &[ServerMsg], expected_code: &str) -> bool {
        msgs.iter().any(|m| match m {
            ServerMsg::Error { code, .. } => code == expected_code,
            _ => false,
        })
    }

    /// Create a started 2-player room; returns (room_id, a, rx_a, b, rx_b)
    fn started_pair(
        service: &RoomService,
    ) -> (
        RoomId,
        PlayerId,
        UnboundedReceiver<Outbound>,
        PlayerId,
        UnboundedReceiver<Outbound>,
    ) {
        let (a, mut rx_a) = connect(service);
        let (b, rx_b) = connect(service);
        service.handle(
            a,
            ClientMsg::CreateRoom {
                name: Some("Ada".to_string()),
            },
        );
        let room_id = created_room_id(&drain(&mut rx_a));
        service.handle(
            b,
            ClientMsg::JoinRoom {
                room_id: room_id.clone(),
                name: Some("Ben".to_string()),
            },
        );
        service.handle(a, ClientMsg::StartGame);
        (room_id, a, rx_a, b, rx_b)
    }

    #[tokio::test]
    async fn create_join_start_deals_distinct_roles() {
        let service = RoomService::new(Outbox::new());
        let (_, _, mut rx_a, _, mut rx_b) = started_pair(&service);

        let role_a = assigned_role(&drain(&mut rx_a));
        let role_b = assigned_role(&drain(&mut rx_b));

        assert_ne!(role_a, role_b);
        for role in [role_a, role_b] {
            assert!(role == Role::Captain || role == Role::Technician);
        }
    }

    #[tokio::test]
    async fn start_rejects_single_player_room() {
        let service = RoomService::new(Outbox::new());
        let (a, mut rx_a) = connect(&service);
        service.handle(a, ClientMsg::CreateRoom { name: None });
        drain(&mut rx_a);

        service.handle(a, ClientMsg::StartGame);
        assert!(has_error(&drain(&mut rx_a), "invalid_state"));
    }

    #[tokio::test]
    async fn join_is_rejected_after_start_and_at_capacity() {
        let service = RoomService::new(Outbox::new());
        let (room_id, _, _rx_a, _, _rx_b) = started_pair(&service);

        let (late, mut rx_late) = connect(&service);
        service.handle(
            late,
            ClientMsg::JoinRoom {
                room_id,
                name: None,
            },
        );
        assert!(has_error(&drain(&mut rx_late), "invalid_state"));

        // Capacity check on a fresh lobby
        let (host, mut rx_host) = connect(&service);
        service.handle(host, ClientMsg::CreateRoom { name: None });
        let lobby_id = created_room_id(&drain(&mut rx_host));
        for _ in 0..(MAX_PLAYERS - 1) {
            let (p, _rx) = connect(&service);
            service.handle(
                p,
                ClientMsg::JoinRoom {
                    room_id: lobby_id.clone(),
                    name: None,
                },
            );
        }
        let (overflow, mut rx_overflow) = connect(&service);
        service.handle(
            overflow,
            ClientMsg::JoinRoom {
                room_id: lobby_id,
                name: None,
            },
        );
        assert!(has_error(&drain(&mut rx_overflow), "capacity"));
    }

    #[tokio::test]
    async fn arrival_ending_marks_captain_as_winner() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, b, mut rx_b) = started_pair(&service);

        let role_a = assigned_role(&drain(&mut rx_a));
        drain(&mut rx_b);
        let (captain_id, mut captain_rx) = if role_a == Role::Captain {
            (a, rx_a)
        } else {
            (b, rx_b)
        };
        let captain_name = service.players.get(&captain_id).unwrap().name;

        // Put the ship within one step of arrival at full health
        service
            .rooms
            .get(&room_id)
            .unwrap()
            .lock()
            .distance = 99.9;

        match service.step_room(&room_id) {
            TickOutcome::Ended(reason) => {
                assert_eq!(reason, EndReason::Arrived);
                service.end_game(&room_id, reason);
            }
            other => panic!("expected arrival ending, got {:?}", other),
        }

        let msgs = drain(&mut captain_rx);
        let winners = msgs
            .iter()
            .find_map(|m| match m {
                ServerMsg::GameEnded {
                    winners, message, ..
                } => {
                    assert_eq!(message, EndReason::Arrived.message());
                    Some(winners.clone())
                }
                _ => None,
            })
            .expect("no gameEnded message");
        assert!(winners.contains(&captain_name));
        assert!(service.players.get(&captain_id).unwrap().objective_completed);
    }

    #[tokio::test]
    async fn vote_for_unknown_target_leaves_ledger_unchanged() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, _, _rx_b) = started_pair(&service);
        drain(&mut rx_a);

        service.handle(
            a,
            ClientMsg::CastVote {
                target_player_id: Uuid::new_v4(),
            },
        );

        assert!(has_error(&drain(&mut rx_a), "not_found"));
        let room_arc = service.rooms.get(&room_id).unwrap();
        assert!(room_arc.lock().votes.is_empty());
        assert!(!service.players.get(&a).unwrap().has_voted);
    }

    #[tokio::test]
    async fn double_vote_is_rejected_after_the_first() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, b, _rx_b) = started_pair(&service);
        drain(&mut rx_a);

        service.handle(a, ClientMsg::CastVote { target_player_id: b });
        service.handle(a, ClientMsg::CastVote { target_player_id: b });

        assert!(has_error(&drain(&mut rx_a), "invalid_state"));
        let room_arc = service.rooms.get(&room_id).unwrap();
        assert_eq!(room_arc.lock().votes.len(), 1);
    }

    #[tokio::test]
    async fn split_round_clears_ledger_without_ejection() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, b, mut rx_b) = started_pair(&service);
        drain(&mut rx_a);
        drain(&mut rx_b);

        service.handle(a, ClientMsg::CastVote { target_player_id: b });
        service.handle(b, ClientMsg::CastVote { target_player_id: a });

        let room_arc = service.rooms.get(&room_id).unwrap();
        {
            let room = room_arc.lock();
            assert!(room.votes.is_empty());
            assert_eq!(room.member_ids.len(), 2);
        }
        assert!(!service.players.get(&a).unwrap().has_voted);
        assert!(!service.players.get(&b).unwrap().has_voted);

        let ejected = drain(&mut rx_a)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerEjected { .. }));
        assert!(!ejected);
    }

    #[tokio::test]
    async fn majority_vote_ejects_and_disconnects_target() {
        let service = RoomService::new(Outbox::new());
        let (a, mut rx_a) = connect(&service);
        let (b, _rx_b) = connect(&service);
        let (c, mut rx_c) = connect(&service);

        service.handle(a, ClientMsg::CreateRoom { name: Some("Ada".into()) });
        let room_id = created_room_id(&drain(&mut rx_a));
        for p in [b, c] {
            service.handle(
                p,
                ClientMsg::JoinRoom {
                    room_id: room_id.clone(),
                    name: None,
                },
            );
        }
        service.handle(a, ClientMsg::StartGame);
        drain(&mut rx_c);

        service.handle(a, ClientMsg::CastVote { target_player_id: c });
        service.handle(b, ClientMsg::CastVote { target_player_id: c });
        service.handle(c, ClientMsg::CastVote { target_player_id: a });

        // Target record is gone, membership shrank
        assert!(service.players.get(&c).is_err());
        let room_arc = service.rooms.get(&room_id).unwrap();
        assert_eq!(room_arc.lock().member_ids, vec![a, b]);

        // Reason message precedes the forced close
        let mut saw_ejected = false;
        let mut saw_close = false;
        while let Ok(out) = rx_c.try_recv() {
            match out {
                Outbound::Msg(ServerMsg::Ejected { .. }) => {
                    assert!(!saw_close);
                    saw_ejected = true;
                }
                Outbound::Close => saw_close = true,
                _ => {}
            }
        }
        assert!(saw_ejected && saw_close);
    }

    #[tokio::test]
    async fn room_is_destroyed_when_last_member_leaves_mid_game() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, _rx_a, b, _rx_b) = started_pair(&service);

        service.handle_disconnect(a);
        service.handle_disconnect(b);
        // Repeat signals are no-ops
        service.handle_disconnect(b);

        assert!(service.rooms.get(&room_id).is_err());
        assert!(matches!(service.step_room(&room_id), TickOutcome::Stopped));
    }

    #[tokio::test]
    async fn losing_a_player_mid_game_ends_with_too_few_players() {
        let service = RoomService::new(Outbox::new());
        let (room_id, _a, mut rx_a, b, _rx_b) = started_pair(&service);
        drain(&mut rx_a);

        service.handle_disconnect(b);

        let ended = drain(&mut rx_a)
            .iter()
            .find_map(|m| match m {
                ServerMsg::GameEnded { message, .. } => Some(message.clone()),
                _ => None,
            })
            .expect("no gameEnded message");
        assert_eq!(ended, EndReason::TooFewPlayers.message());

        let room_arc = service.rooms.get(&room_id).unwrap();
        assert_eq!(room_arc.lock().phase, RoomPhase::Ending);
        assert!(matches!(service.step_room(&room_id), TickOutcome::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_room_resets_to_lobby_after_delay() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, _b, _rx_b) = started_pair(&service);
        drain(&mut rx_a);

        service.end_game(&room_id, EndReason::TimedOut);
        let room_arc = service.rooms.get(&room_id).unwrap();
        assert_eq!(room_arc.lock().phase, RoomPhase::Ending);

        tokio::time::sleep(ROOM_RESET_DELAY + std::time::Duration::from_millis(10)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        {
            let room = room_arc.lock();
            assert_eq!(room.phase, RoomPhase::Lobby);
            assert!(room.systems.values().all(|&h| h == 100));
            assert!(room.events.is_empty());
        }
        let player = service.players.get(&a).unwrap();
        assert_eq!(player.role, None);
        assert_eq!(player.secret_uses, crate::game::SECRET_BUTTON_USES);

        let reset_announced = drain(&mut rx_a).iter().any(|m| {
            matches!(
                m,
                ServerMsg::RoomUpdated {
                    game_started: false,
                    ..
                }
            )
        });
        assert!(reset_announced);
    }

    #[tokio::test]
    async fn secret_button_damages_systems_and_runs_out() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, _, _rx_b) = started_pair(&service);
        drain(&mut rx_a);

        for _ in 0..3 {
            service.handle(
                a,
                ClientMsg::UseSecretButton {
                    action: SecretAction::Engine,
                    target: None,
                },
            );
        }
        let room_arc = service.rooms.get(&room_id).unwrap();
        assert_eq!(room_arc.lock().system_health(SystemKind::Engine), 40);
        assert!(!has_error(&drain(&mut rx_a), "invalid_state"));

        service.handle(
            a,
            ClientMsg::UseSecretButton {
                action: SecretAction::Engine,
                target: None,
            },
        );
        assert!(has_error(&drain(&mut rx_a), "invalid_state"));
        assert_eq!(room_arc.lock().system_health(SystemKind::Engine), 40);
    }

    #[tokio::test]
    async fn technician_repairs_more_than_others() {
        let service = RoomService::new(Outbox::new());
        let (room_id, a, mut rx_a, b, mut rx_b) = started_pair(&service);

        let role_a = assigned_role(&drain(&mut rx_a));
        drain(&mut rx_b);
        let (technician, other) = if role_a == Role::Technician {
            (a, b)
        } else {
            (b, a)
        };

        let room_arc = service.rooms.get(&room_id).unwrap();
        room_arc.lock().damage_system(SystemKind::Shield, 100);

        service.handle(
            other,
            ClientMsg::RepairSystem {
                system: SystemKind::Shield,
            },
        );
        assert_eq!(room_arc.lock().system_health(SystemKind::Shield), 15);

        service.handle(
            technician,
            ClientMsg::RepairSystem {
                system: SystemKind::Shield,
            },
        );
        assert_eq!(room_arc.lock().system_health(SystemKind::Shield), 50);
    }

    #[tokio::test]
    async fn chat_includes_role_only_while_game_runs() {
        let service = RoomService::new(Outbox::new());
        let (a, mut rx_a) = connect(&service);
        let (b, mut rx_b) = connect(&service);
        service.handle(a, ClientMsg::CreateRoom { name: Some("Ada".into()) });
        let room_id = created_room_id(&drain(&mut rx_a));
        service.handle(
            b,
            ClientMsg::JoinRoom {
                room_id,
                name: Some("Ben".into()),
            },
        );

        service.handle(
            a,
            ClientMsg::SendChat {
                message: "hello".to_string(),
            },
        );
        let lobby_chat = drain(&mut rx_b)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::ChatMessage { sender, role, .. } if sender == "Ada" => Some(role),
                _ => None,
            })
            .next_back()
            .expect("no chat relay");
        assert_eq!(lobby_chat, None);

        service.handle(a, ClientMsg::StartGame);
        drain(&mut rx_b);
        service.handle(
            a,
            ClientMsg::SendChat {
                message: "suspicious".to_string(),
            },
        );
        let game_chat = drain(&mut rx_b)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::ChatMessage { sender, role, .. } if sender == "Ada" => Some(role),
                _ => None,
            })
            .next_back()
            .expect("no chat relay");
        assert!(game_chat.is_some());
    }

    #[tokio::test]
    async fn room_updates_never_leak_roles() {
        let service = RoomService::new(Outbox::new());
        let (_, _, mut rx_a, _, _rx_b) = started_pair(&service);

        for msg in drain(&mut rx_a) {
            if let ServerMsg::RoomUpdated { players, .. } = msg {
                let json = serde_json::to_string(&players).unwrap();
                assert!(!json.contains("role"));
            }
        }
    }
}
