// Typed errors returned by the allocation engine.

use std::fmt;

use thiserror::Error;

use crate::draft::state::DraftStatus;

/// Why a player cannot be picked right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    /// No such player in the pool.
    NotInPool,
    /// The player's grade/program differs from the draft's.
    WrongDivision,
    /// The player already has a pick in this draft.
    AlreadyPicked,
    /// The player is ranked below the open tier.
    AboveSkillGate {
        skill_rank: u32,
        current_skill_rank: u32,
    },
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::NotInPool => write!(f, "not in the player pool"),
            IneligibleReason::WrongDivision => write!(f, "not in this draft's division"),
            IneligibleReason::AlreadyPicked => write!(f, "already picked"),
            IneligibleReason::AboveSkillGate {
                skill_rank,
                current_skill_rank,
            } => write!(
                f,
                "skill rank {skill_rank} is outside the open tier (<= {current_skill_rank})"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("team `{acting_team}` is not on the clock (pick {pick_index} belongs to `{on_clock}`)")]
    NotOnClock {
        pick_index: u32,
        on_clock: String,
        acting_team: String,
    },

    #[error("player {player_id} is ineligible: {reason}")]
    PlayerIneligible {
        player_id: i64,
        reason: IneligibleReason,
    },

    #[error("draft `{draft_id}` is not active (status: {status})")]
    DraftNotActive {
        draft_id: String,
        status: DraftStatus,
    },

    #[error("pick {pick_index} has already been made")]
    SlotAlreadyFilled { pick_index: u32 },

    #[error("draft `{draft_id}` is busy; retry")]
    Contention { draft_id: String },

    #[error("invalid draft configuration: {0}")]
    Configuration(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("draft `{0}` not found")]
    DraftNotFound(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Contention { .. })
    }

    /// Stable machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotOnClock { .. } => "not_on_clock",
            EngineError::PlayerIneligible { .. } => "player_ineligible",
            EngineError::DraftNotActive { .. } => "draft_not_active",
            EngineError::SlotAlreadyFilled { .. } => "slot_already_filled",
            EngineError::Contention { .. } => "contention",
            EngineError::Configuration(_) => "configuration_error",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::DraftNotFound(_) => "draft_not_found",
            EngineError::Storage(_) => "storage",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
