//! Periodic ship simulation
//!
//! One cancellable task per active room, firing once per second. Each step
//! re-checks room existence and phase under the room lock, so a cancelled
//! or reset room can never be advanced.

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::game::room::Room;
use crate::game::service::RoomService;
use crate::game::{RoomId, EVENT_LOG_CAP, TICK_INTERVAL};
use crate::util::time::unix_millis;
use crate::ws::protocol::{EventKind, ShipEvent, SystemKind};

/// Why a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// `time_left` hit zero before arrival
    TimedOut,
    /// `distance` reached `total_distance`
    Arrived,
    /// Overall health collapsed to zero
    Destroyed,
    /// Active membership dropped below the minimum
    TooFewPlayers,
}

impl EndReason {
    pub fn message(&self) -> &'static str {
        match self {
            EndReason::TimedOut => "Time's up! The ship never reached its destination.",
            EndReason::Arrived => "THE SHIP REACHED ITS DESTINATION!",
            EndReason::Destroyed => "THE SHIP WAS DESTROYED! All systems failed.",
            EndReason::TooFewPlayers => "Game over: too few players.",
        }
    }
}

/// Result of advancing a room by one step
#[derive(Debug)]
pub enum TickOutcome {
    Continue,
    Ended(EndReason),
    /// Room destroyed or no longer active; stop the task
    Stopped,
}

/// Spawn the 1 Hz tick task for a room
pub fn spawn(service: RoomService, room_id: RoomId) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first interval fires immediately; consume it so the first
        // simulation step lands one full period after game start.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match service.step_room(&room_id) {
                TickOutcome::Continue => {}
                TickOutcome::Ended(reason) => {
                    service.end_game(&room_id, reason);
                    break;
                }
                TickOutcome::Stopped => {
                    info!(room_id = %room_id, "Tick task stopping");
                    break;
                }
            }
        }
    })
}

/// Advance the simulation by one step.
///
/// Returns any random event that fired (for individual broadcast) and the
/// terminal condition, checked in priority order: timeout, then arrival,
/// then destruction.
pub fn advance(room: &mut Room) -> (Option<ShipEvent>, Option<EndReason>) {
    room.time_left -= 1;

    let engine = room.system_health(SystemKind::Engine) as f64;
    room.distance += 0.5 * engine / 100.0;

    for system in SystemKind::ALL {
        if room.rng.gen_bool(0.02) {
            room.damage_system(system, 2);
        }
    }

    let mut fired = None;
    if room.events.len() < EVENT_LOG_CAP && room.rng.gen_bool(0.05) {
        let (kind, message) = roll_event(&mut room.rng);
        if kind == EventKind::Meteor {
            let target = SystemKind::ALL[room.rng.gen_range(0..SystemKind::ALL.len())];
            room.damage_system(target, 25);
        }
        let event = ShipEvent {
            kind,
            message: message.to_string(),
            timestamp: unix_millis(),
        };
        room.push_event(event.clone());
        fired = Some(event);
    }

    room.recompute_overall();

    let end = if room.time_left <= 0 {
        Some(EndReason::TimedOut)
    } else if room.distance >= room.total_distance {
        Some(EndReason::Arrived)
    } else if room.overall_health == 0 {
        Some(EndReason::Destroyed)
    } else {
        None
    };

    (fired, end)
}

/// Fixed hazard catalog
fn roll_event<R: Rng>(rng: &mut R) -> (EventKind, &'static str) {
    match rng.gen_range(0..4) {
        0 => (EventKind::Meteor, "Meteor strike! Systems damaged."),
        1 => (EventKind::Radiation, "Radiation wave! Repair the shields."),
        2 => (EventKind::Alien, "Alien signal detected."),
        _ => (EventKind::SystemFailure, "System failure! Check all panels."),
    }
}
