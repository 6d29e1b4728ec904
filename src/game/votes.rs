//! Vote tallying and ejection resolution

use std::collections::HashMap;

use crate::game::room::Room;
use crate::game::PlayerId;

/// Resolve a completed voting round.
///
/// Tallies target frequencies across the ledger, then walks `member_ids`
/// in join order keeping the first strictly-highest count — ties on the
/// maximum therefore break toward the lowest member index. The ledger is
/// cleared unconditionally. Returns the ejection target and its vote
/// count only when that count is strictly greater than 1; a lone vote
/// with no consensus never ejects.
pub fn resolve_round(room: &mut Room) -> Option<(PlayerId, usize)> {
    let mut counts: HashMap<PlayerId, usize> = HashMap::new();
    for target in room.votes.values() {
        *counts.entry(*target).or_default() += 1;
    }
    room.votes.clear();

    let mut best: Option<(PlayerId, usize)> = None;
    for member in &room.member_ids {
        if let Some(&count) = counts.get(member) {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((*member, count));
            }
        }
    }

    best.filter(|&(_, count)| count > 1)
}
