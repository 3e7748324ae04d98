// Pick slots and snake-order schedule generation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Whether a slot counts toward a team's standard roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Standard,
    Bonus,
}

impl SlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotType::Standard => "standard",
            SlotType::Bonus => "bonus",
        }
    }

    pub fn from_str_slot(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(SlotType::Standard),
            "bonus" => Some(SlotType::Bonus),
            _ => None,
        }
    }
}

/// One position in the fixed pick order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// 1-based, unique and contiguous within a draft.
    pub pick_index: u32,
    /// 1-based overall round, bonus rounds included.
    pub round: u32,
    pub slot_type: SlotType,
    /// Team that owns this slot.
    pub team_id: String,
}

/// A bonus round inserted into the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusRound {
    /// Position of the round in the overall round sequence (1-based).
    pub round: u32,
    /// Explicit slot ownership for this round. `None` follows the snake.
    #[serde(default)]
    pub order: Option<Vec<String>>,
}

/// Largest schedule a single draft may have.
pub const MAX_SLOTS: u32 = 10_000;

/// Inputs to schedule generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Team ids in round-1 pick order.
    pub teams: Vec<String>,
    /// Number of standard rounds (max standard picks per team).
    pub base_roster_limit: u32,
    pub bonus_rounds: Vec<BonusRound>,
}

impl ScheduleConfig {
    /// Standard plus bonus rounds, or `None` if the sum does not fit a `u32`.
    pub fn total_rounds(&self) -> Option<u32> {
        let bonus = u32::try_from(self.bonus_rounds.len()).ok()?;
        self.base_roster_limit.checked_add(bonus)
    }

    /// Number of slots the schedule will hold, counted without building it.
    fn slot_count(&self) -> u64 {
        let teams = self.teams.len() as u64;
        let bonus_slots: u64 = self
            .bonus_rounds
            .iter()
            .map(|b| b.order.as_ref().map_or(teams, |o| o.len() as u64))
            .sum();
        u64::from(self.base_roster_limit) * teams + bonus_slots
    }

    /// Check the config and return the total number of rounds.
    fn validate(&self) -> EngineResult<u32> {
        if self.teams.is_empty() {
            return Err(EngineError::Configuration(
                "a draft needs at least one team".into(),
            ));
        }
        if self.base_roster_limit == 0 {
            return Err(EngineError::Configuration(
                "base_roster_limit must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for team in &self.teams {
            if !seen.insert(team.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "team `{team}` is listed more than once"
                )));
            }
        }

        let total = self.total_rounds().ok_or_else(|| {
            EngineError::Configuration(format!(
                "base_roster_limit {} plus {} bonus rounds is too many rounds",
                self.base_roster_limit,
                self.bonus_rounds.len()
            ))
        })?;
        let mut bonus_seen = HashSet::new();
        for bonus in &self.bonus_rounds {
            if bonus.round == 0 || bonus.round > total {
                return Err(EngineError::Configuration(format!(
                    "bonus round {} is outside rounds 1..={total}",
                    bonus.round
                )));
            }
            if !bonus_seen.insert(bonus.round) {
                return Err(EngineError::Configuration(format!(
                    "bonus round {} is configured more than once",
                    bonus.round
                )));
            }
            if let Some(order) = &bonus.order {
                if order.is_empty() {
                    return Err(EngineError::Configuration(format!(
                        "bonus round {} has an empty order",
                        bonus.round
                    )));
                }
                if let Some(unknown) = order.iter().find(|t| !seen.contains(t.as_str())) {
                    return Err(EngineError::Configuration(format!(
                        "bonus round {} names unknown team `{unknown}`",
                        bonus.round
                    )));
                }
            }
        }

        let slots = self.slot_count();
        if slots > u64::from(MAX_SLOTS) {
            return Err(EngineError::Configuration(format!(
                "schedule would have {slots} slots; at most {MAX_SLOTS} are allowed"
            )));
        }

        Ok(total)
    }
}

/// Generate the full slot schedule for a draft.
///
/// Rounds alternate direction on the overall round number: odd rounds run in
/// `teams` order, even rounds in reverse. A bonus round with an explicit
/// `order` uses that order instead. Pick indexes start at 1 and are
/// contiguous across all rounds.
pub fn generate_schedule(config: &ScheduleConfig) -> EngineResult<Vec<Slot>> {
    let total_rounds = config.validate()?;

    let mut slots = Vec::with_capacity(config.slot_count() as usize);
    let mut pick_index = 1;

    for round in 1..=total_rounds {
        let bonus = config.bonus_rounds.iter().find(|b| b.round == round);
        let slot_type = if bonus.is_some() {
            SlotType::Bonus
        } else {
            SlotType::Standard
        };

        let owners: Vec<&String> = match bonus.and_then(|b| b.order.as_ref()) {
            Some(order) => order.iter().collect(),
            None if round % 2 == 1 => config.teams.iter().collect(),
            None => config.teams.iter().rev().collect(),
        };

        for team_id in owners {
            slots.push(Slot {
                pick_index,
                round,
                slot_type,
                team_id: team_id.clone(),
            });
            pick_index += 1;
        }
    }

    Ok(slots)
}
