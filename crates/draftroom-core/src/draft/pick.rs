// Committed pick records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a pick was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickType {
    /// A standard slot filled from the open tier.
    Standard,
    /// A bonus slot.
    Bonus,
    /// A standard slot used to claim back a player returning to the team.
    Returning,
}

impl PickType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickType::Standard => "standard",
            PickType::Bonus => "bonus",
            PickType::Returning => "returning",
        }
    }

    pub fn from_str_pick(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(PickType::Standard),
            "bonus" => Some(PickType::Bonus),
            "returning" => Some(PickType::Returning),
            _ => None,
        }
    }
}

impl fmt::Display for PickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player assigned to a slot. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pick {
    pub draft_id: String,
    /// The slot this pick fills.
    pub pick_index: u32,
    pub team_id: String,
    pub player_id: i64,
    pub pick_type: PickType,
    pub picked_at: DateTime<Utc>,
}

/// A request to pick a player into the slot on the clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickRequest {
    pub draft_id: String,
    pub player_id: i64,
    /// Team resolved from the authenticated identity.
    pub acting_team: String,
    /// The pick the client believes is on the clock. A stale value fails with
    /// `SlotAlreadyFilled` instead of landing on a later slot.
    #[serde(default)]
    pub expected_pick_index: Option<u32>,
}
