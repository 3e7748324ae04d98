// Draft state: lifecycle, pointer, skill gate, slots and committed picks.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pick::Pick;
use super::player::{Division, Player};
use super::schedule::{BonusRound, Slot, SlotType};

/// Lifecycle of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Scheduled,
    Active,
    Closed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Scheduled => "scheduled",
            DraftStatus::Active => "active",
            DraftStatus::Closed => "closed",
        }
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(DraftStatus::Scheduled),
            "active" => Some(DraftStatus::Active),
            "closed" => Some(DraftStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A team participating in a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    pub team_name: String,
}

/// The mutable draft record. Only the engine changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub draft_id: String,
    pub name: String,
    pub division: Division,
    pub status: DraftStatus,
    /// Smallest unfilled pick index, or one past the last slot when complete.
    pub current_pick_index: u32,
    /// Players ranked at or above this number may be picked in standard slots.
    pub current_skill_rank: u32,
    /// Threshold restored by a reset.
    pub initial_skill_rank: u32,
    /// Standard picks per team.
    pub base_roster_limit: u32,
    /// Bumped on every committed transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to create a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDraft {
    pub draft_id: String,
    pub name: String,
    pub division: Division,
    pub initial_skill_rank: u32,
    pub base_roster_limit: u32,
    /// Teams in round-1 pick order.
    pub teams: Vec<Team>,
    pub bonus_rounds: Vec<BonusRound>,
}

/// A consistent view of one draft: record, teams, schedule and picks.
#[derive(Debug, Clone)]
pub struct DraftState {
    pub draft: Draft,
    /// Teams in round-1 pick order.
    pub teams: Vec<Team>,
    /// Fixed for the draft's lifetime.
    pub slots: Arc<Vec<Slot>>,
    /// Committed picks ordered by pick index.
    pub picks: Vec<Pick>,
    picked_players: HashSet<i64>,
}

impl DraftState {
    pub fn new(draft: Draft, teams: Vec<Team>, slots: Vec<Slot>, mut picks: Vec<Pick>) -> Self {
        picks.sort_by_key(|p| p.pick_index);
        let picked_players = picks.iter().map(|p| p.player_id).collect();
        DraftState {
            draft,
            teams,
            slots: Arc::new(slots),
            picks,
            picked_players,
        }
    }

    /// The slot on the clock, or `None` once the schedule is exhausted.
    pub fn current_slot(&self) -> Option<&Slot> {
        self.slot(self.draft.current_pick_index)
    }

    pub fn slot(&self, pick_index: u32) -> Option<&Slot> {
        let idx = pick_index.checked_sub(1)? as usize;
        self.slots.get(idx)
    }

    pub fn pick_at(&self, pick_index: u32) -> Option<&Pick> {
        self.picks.iter().find(|p| p.pick_index == pick_index)
    }

    pub fn is_picked(&self, player_id: i64) -> bool {
        self.picked_players.contains(&player_id)
    }

    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.team_id == team_id)
    }

    /// The pick index one past the last slot.
    pub fn end_index(&self) -> u32 {
        self.slots.len() as u32 + 1
    }

    /// Smallest pick index without a pick, or `end_index()` when every slot
    /// is filled.
    pub fn next_unfilled_index(&self) -> u32 {
        self.slots
            .iter()
            .map(|s| s.pick_index)
            .find(|idx| self.pick_at(*idx).is_none())
            .unwrap_or_else(|| self.end_index())
    }

    /// Record a pick, advance the pointer and close the draft if the schedule
    /// is exhausted. The caller has already validated the pick.
    pub fn apply_pick(&mut self, pick: Pick) {
        self.picked_players.insert(pick.player_id);
        let pos = self
            .picks
            .partition_point(|p| p.pick_index < pick.pick_index);
        self.picks.insert(pos, pick);

        self.draft.current_pick_index = self.next_unfilled_index();
        if self.draft.current_pick_index >= self.end_index() {
            self.draft.status = DraftStatus::Closed;
        }
    }

    /// Loosen the skill gate when the standard slot on the clock has no
    /// pickable player in the open tier.
    ///
    /// The threshold jumps to the best rank among unpicked in-division
    /// players, so it only ever moves toward admitting more players. Returns
    /// the previous and new threshold when it changed.
    pub fn relax_threshold(&mut self, pool: &[Player]) -> Option<(u32, u32)> {
        if self.draft.status != DraftStatus::Active {
            return None;
        }
        if self.current_slot()?.slot_type != SlotType::Standard {
            return None;
        }

        let best_remaining = pool
            .iter()
            .filter(|p| p.division == self.draft.division && !self.is_picked(p.player_id))
            .map(|p| p.skill_rank)
            .min()?;

        let previous = self.draft.current_skill_rank;
        if best_remaining > previous {
            self.draft.current_skill_rank = best_remaining;
            Some((previous, best_remaining))
        } else {
            None
        }
    }

    /// Clear every pick and restore the initial pointer and threshold. The
    /// schedule is kept.
    pub fn reset(&mut self) {
        self.picks.clear();
        self.picked_players.clear();
        self.draft.current_pick_index = 1;
        self.draft.current_skill_rank = self.draft.initial_skill_rank;
        self.draft.status = DraftStatus::Active;
    }

    /// Number of standard-slot picks a team has made.
    pub fn standard_picks_for(&self, team_id: &str) -> usize {
        self.picks
            .iter()
            .filter(|p| p.team_id == team_id)
            .filter(|p| {
                self.slot(p.pick_index)
                    .is_some_and(|s| s.slot_type == SlotType::Standard)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::pick::PickType;
    use crate::draft::player::Program;
    use crate::draft::schedule::{generate_schedule, ScheduleConfig};

    fn division() -> Division {
        Division::new(4, Program::Flag)
    }

    fn test_state(bonus_rounds: Vec<BonusRound>) -> DraftState {
        let teams = vec![
            Team {
                team_id: "hawks".into(),
                team_name: "Hawks".into(),
            },
            Team {
                team_id: "owls".into(),
                team_name: "Owls".into(),
            },
        ];
        let slots = generate_schedule(&ScheduleConfig {
            teams: teams.iter().map(|t| t.team_id.clone()).collect(),
            base_roster_limit: 2,
            bonus_rounds,
        })
        .unwrap();
        let draft = Draft {
            draft_id: "d1".into(),
            name: "Grade 4 Flag".into(),
            division: division(),
            status: DraftStatus::Active,
            current_pick_index: 1,
            current_skill_rank: 5,
            initial_skill_rank: 5,
            base_roster_limit: 2,
            version: 0,
            created_at: Utc::now(),
        };
        DraftState::new(draft, teams, slots, vec![])
    }

    fn player(player_id: i64, skill_rank: u32) -> Player {
        Player {
            player_id,
            first_name: "P".into(),
            last_name: format!("{player_id}"),
            division: division(),
            skill_rank,
            returning_team: None,
        }
    }

    fn pick(pick_index: u32, team_id: &str, player_id: i64) -> Pick {
        Pick {
            draft_id: "d1".into(),
            pick_index,
            team_id: team_id.into(),
            player_id,
            pick_type: PickType::Standard,
            picked_at: Utc::now(),
        }
    }

    #[test]
    fn current_slot_follows_pointer() {
        let state = test_state(vec![]);
        assert_eq!(state.current_slot().unwrap().team_id, "hawks");
        assert!(state.slot(0).is_none());
        assert_eq!(state.slot(4).unwrap().team_id, "hawks");
        assert!(state.slot(5).is_none());
    }

    #[test]
    fn apply_pick_advances_pointer() {
        let mut state = test_state(vec![]);
        state.apply_pick(pick(1, "hawks", 10));

        assert_eq!(state.draft.current_pick_index, 2);
        assert!(state.is_picked(10));
        assert_eq!(state.current_slot().unwrap().team_id, "owls");
        assert_eq!(state.draft.status, DraftStatus::Active);
    }

    #[test]
    fn filling_every_slot_closes_the_draft() {
        let mut state = test_state(vec![]);
        state.apply_pick(pick(1, "hawks", 10));
        state.apply_pick(pick(2, "owls", 11));
        state.apply_pick(pick(3, "owls", 12));
        state.apply_pick(pick(4, "hawks", 13));

        assert_eq!(state.draft.current_pick_index, 5);
        assert_eq!(state.draft.current_pick_index, state.end_index());
        assert_eq!(state.draft.status, DraftStatus::Closed);
        assert!(state.current_slot().is_none());
    }

    #[test]
    fn new_state_sorts_picks() {
        let base = test_state(vec![]);
        let state = DraftState::new(
            base.draft.clone(),
            base.teams.clone(),
            base.slots.to_vec(),
            vec![pick(2, "owls", 11), pick(1, "hawks", 10)],
        );
        assert_eq!(state.picks[0].pick_index, 1);
        assert_eq!(state.picks[1].pick_index, 2);
        assert_eq!(state.next_unfilled_index(), 3);
    }

    #[test]
    fn relax_jumps_to_best_remaining_rank() {
        let mut state = test_state(vec![]);
        let pool = vec![player(1, 9), player(2, 12)];

        assert_eq!(state.relax_threshold(&pool), Some((5, 9)));
        assert_eq!(state.draft.current_skill_rank, 9);
        // Already admits player 1: no further change.
        assert_eq!(state.relax_threshold(&pool), None);
    }

    #[test]
    fn relax_is_a_no_op_when_tier_has_players() {
        let mut state = test_state(vec![]);
        let pool = vec![player(1, 4), player(2, 12)];
        assert_eq!(state.relax_threshold(&pool), None);
        assert_eq!(state.draft.current_skill_rank, 5);
    }

    #[test]
    fn relax_ignores_picked_and_other_division_players() {
        let mut state = test_state(vec![]);
        state.apply_pick(pick(1, "hawks", 1));
        let mut other_division = player(3, 2);
        other_division.division = Division::new(4, Program::Tackle);
        let pool = vec![player(1, 2), other_division, player(2, 8)];

        assert_eq!(state.relax_threshold(&pool), Some((5, 8)));
    }

    #[test]
    fn relax_leaves_threshold_when_pool_exhausted() {
        let mut state = test_state(vec![]);
        assert_eq!(state.relax_threshold(&[]), None);
        assert_eq!(state.draft.current_skill_rank, 5);
    }

    #[test]
    fn relax_skips_bonus_slots() {
        let mut state = test_state(vec![BonusRound {
            round: 1,
            order: None,
        }]);
        assert_eq!(state.current_slot().unwrap().slot_type, SlotType::Bonus);
        assert_eq!(state.relax_threshold(&[player(1, 20)]), None);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut state = test_state(vec![]);
        state.apply_pick(pick(1, "hawks", 10));
        state.draft.current_skill_rank = 11;
        state.draft.status = DraftStatus::Closed;

        state.reset();

        assert!(state.picks.is_empty());
        assert!(!state.is_picked(10));
        assert_eq!(state.draft.current_pick_index, 1);
        assert_eq!(state.draft.current_skill_rank, 5);
        assert_eq!(state.draft.status, DraftStatus::Active);
        assert_eq!(state.slots.len(), 4);
    }

    #[test]
    fn standard_picks_exclude_bonus_slots() {
        let mut state = test_state(vec![BonusRound {
            round: 1,
            order: None,
        }]);
        state.apply_pick(Pick {
            pick_type: PickType::Bonus,
            ..pick(1, "hawks", 10)
        });
        state.apply_pick(pick(2, "owls", 11));
        state.apply_pick(pick(3, "owls", 12));

        assert_eq!(state.standard_picks_for("hawks"), 0);
        assert_eq!(state.standard_picks_for("owls"), 1);
    }

    #[test]
    fn status_string_round_trip() {
        for status in [DraftStatus::Scheduled, DraftStatus::Active, DraftStatus::Closed] {
            assert_eq!(DraftStatus::from_str_status(status.as_str()), Some(status));
        }
        assert_eq!(DraftStatus::from_str_status("paused"), None);
    }
}
