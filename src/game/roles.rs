//! Role assignment and objective evaluation

use rand::seq::SliceRandom;
use rand::Rng;

use crate::ws::protocol::{FinalStats, Role};

/// Deal one role per member index.
///
/// Captain and Technician are always present; Spy, AI and Saboteur join at
/// 3, 4 and 5 players. Filler draws reject duplicates only until all five
/// distinct roles are in play, so rooms larger than the role set get
/// repeats instead of stalling the deal. The result is shuffled so role
/// never correlates with join order.
pub fn assign_roles<R: Rng>(player_count: usize, rng: &mut R) -> Vec<Role> {
    debug_assert!(player_count >= 2, "caller must reject rooms below 2 players");

    let mut assigned = vec![Role::Captain, Role::Technician];
    if player_count >= 3 {
        assigned.push(Role::Spy);
    }
    if player_count >= 4 {
        assigned.push(Role::Ai);
    }
    if player_count >= 5 {
        assigned.push(Role::Saboteur);
    }

    while assigned.len() < player_count {
        let draw = Role::ALL[rng.gen_range(0..Role::ALL.len())];
        if assigned.len() >= Role::ALL.len() || !assigned.contains(&draw) {
            assigned.push(draw);
        }
    }

    assigned.shuffle(rng);
    assigned
}

/// Hidden win condition text shown to the player at role assignment
pub fn objective_text(role: Role) -> &'static str {
    match role {
        Role::Captain => "Bring the ship to its destination with overall health at 60% or above",
        Role::Technician => "Keep every system above 70%",
        Role::Spy => "Collect 3 pieces of secret data without being caught",
        Role::Ai => "Follow the Captain's orders but keep the Oxygen system below 50%",
        Role::Saboteur => "Prevent the ship from reaching its destination without being caught",
    }
}

/// Evaluate a role's objective against the final ship readout.
///
/// Spy and AI resolve as a coin flip: their real objective mechanic (a
/// secret-data counter) was never wired up, so the placeholder odds stand.
pub fn objective_met<R: Rng>(role: Role, ship: &FinalStats, rng: &mut R) -> bool {
    match role {
        Role::Captain => ship.distance >= crate::game::TOTAL_DISTANCE && ship.ship_health >= 60,
        Role::Technician => ship.systems.values().all(|&h| h >= 70),
        Role::Saboteur => ship.distance < crate::game::TOTAL_DISTANCE || ship.ship_health == 0,
        Role::Spy | Role::Ai => rng.gen_bool(0.5),
    }
}
