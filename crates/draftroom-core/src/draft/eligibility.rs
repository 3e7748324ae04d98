// Eligibility filter: which pool players may be picked right now.
//
// Pure functions over a draft state and a pool slice. Nothing here is cached;
// every call re-derives the answer from the state it is given.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::pick::PickType;
use super::player::Player;
use super::schedule::SlotType;
use super::state::DraftState;
use crate::error::IneligibleReason;

/// Default cap on listing size.
pub const DEFAULT_ELIGIBLE_LIMIT: usize = 200;

/// Caller-supplied options for an eligibility listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityQuery {
    /// Show returning players regardless of the open tier.
    #[serde(default)]
    pub include_returning: bool,
    /// Restrict the returning-player exemption to players returning to this
    /// team. `None` exempts every returning player (spectator view).
    #[serde(default)]
    pub for_team: Option<String>,
    /// Case-insensitive substring filter on the player's full name.
    #[serde(default)]
    pub search: Option<String>,
    /// Maximum number of results. `None` uses [`DEFAULT_ELIGIBLE_LIMIT`].
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Whether the skill gate is enforced for the slot on the clock.
fn gate_applies(state: &DraftState) -> bool {
    state
        .current_slot()
        .is_some_and(|s| s.slot_type == SlotType::Standard)
}

fn within_gate(state: &DraftState, player: &Player) -> bool {
    player.skill_rank <= state.draft.current_skill_rank
}

/// Listing order: returning players first, then best rank, then name.
fn listing_order(a: &Player, b: &Player) -> Ordering {
    b.is_returning()
        .cmp(&a.is_returning())
        .then(a.skill_rank.cmp(&b.skill_rank))
        .then_with(|| a.last_name.cmp(&b.last_name))
        .then_with(|| a.first_name.cmp(&b.first_name))
        .then(a.player_id.cmp(&b.player_id))
}

/// The players the caller may see as pickable for the draft's current state,
/// ordered and capped.
pub fn eligible(state: &DraftState, pool: &[Player], query: &EligibilityQuery) -> Vec<Player> {
    if state.current_slot().is_none() {
        return Vec::new();
    }
    let gated = gate_applies(state);
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut players: Vec<Player> = pool
        .iter()
        .filter(|p| p.division == state.draft.division)
        .filter(|p| !state.is_picked(p.player_id))
        .filter(|p| {
            if !gated || within_gate(state, p) {
                return true;
            }
            query.include_returning
                && match &query.for_team {
                    Some(team) => p.returns_to(team),
                    None => p.is_returning(),
                }
        })
        .filter(|p| match &needle {
            Some(needle) => p.full_name().to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .cloned()
        .collect();

    players.sort_by(listing_order);
    players.truncate(query.limit.unwrap_or(DEFAULT_ELIGIBLE_LIMIT));
    players
}

/// Check a single player against the slot on the clock for `acting_team`.
///
/// Agrees with [`eligible`] for `include_returning = true` and
/// `for_team = acting_team`. On success returns how the pick is classified.
pub fn check_pick(
    state: &DraftState,
    player: &Player,
    acting_team: &str,
) -> Result<PickType, IneligibleReason> {
    if player.division != state.draft.division {
        return Err(IneligibleReason::WrongDivision);
    }
    if state.is_picked(player.player_id) {
        return Err(IneligibleReason::AlreadyPicked);
    }

    if !gate_applies(state) {
        return Ok(PickType::Bonus);
    }
    if player.returns_to(acting_team) {
        return Ok(PickType::Returning);
    }
    if within_gate(state, player) {
        return Ok(PickType::Standard);
    }

    Err(IneligibleReason::AboveSkillGate {
        skill_rank: player.skill_rank,
        current_skill_rank: state.draft.current_skill_rank,
    })
}
