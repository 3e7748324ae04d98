// JSON-lines command protocol.
//
// Each input line is one request:
//   {"caller": "coach-hawks", "id": 7, "command": {"type": "submit_pick", "draft_id": "g5-flag", "player_id": 12, "expected_pick_index": 4}}
// Each request gets exactly one response line, tagged `ok` or `error` and
// echoing `id`. Change events are written as `{"type": "event", ...}` lines.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use draftroom_core::draft::eligibility::EligibilityQuery;
use draftroom_core::draft::pick::Pick;
use draftroom_core::draft::schedule::Slot;
use draftroom_core::draft::state::{Draft, DraftState, Team};
use draftroom_core::error::EngineError;
use draftroom_core::events::ChangeEvent;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    /// Authenticated identity the request is made on behalf of.
    pub caller: String,
    /// Opaque correlation id echoed in the response.
    #[serde(default)]
    pub id: Option<Value>,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    ListDrafts,
    Snapshot {
        draft_id: String,
    },
    Board {
        draft_id: String,
    },
    Eligible {
        draft_id: String,
        #[serde(default)]
        query: EligibilityQuery,
    },
    SubmitPick {
        draft_id: String,
        player_id: i64,
        /// The pick the client saw on the clock. Once that slot is filled
        /// the request fails instead of landing on the next slot.
        expected_pick_index: u32,
    },
    Open {
        draft_id: String,
    },
    Reset {
        draft_id: String,
        #[serde(default)]
        confirmed: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ListDrafts => "list_drafts",
            Command::Snapshot { .. } => "snapshot",
            Command::Board { .. } => "board",
            Command::Eligible { .. } => "eligible",
            Command::SubmitPick { .. } => "submit_pick",
            Command::Open { .. } => "open",
            Command::Reset { .. } => "reset",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        id: Option<Value>,
        payload: Value,
    },
    Error {
        id: Option<Value>,
        kind: String,
        message: String,
        retryable: bool,
    },
}

impl Response {
    pub fn ok(id: Option<Value>, payload: Value) -> Self {
        Response::Ok { id, payload }
    }

    pub fn from_error(id: Option<Value>, err: &EngineError) -> Self {
        Response::Error {
            id,
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// A request that could not be parsed.
    pub fn bad_request(message: String) -> Self {
        Response::Error {
            id: None,
            kind: "bad_request".into(),
            message,
            retryable: false,
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","id":null,"kind":"internal","message":"{e}","retryable":false}}"#)
        })
    }
}

/// A change event as written to the output stream.
#[derive(Debug, Serialize)]
pub struct EventLine<'a> {
    #[serde(rename = "type")]
    line_type: &'static str,
    #[serde(flatten)]
    event: &'a ChangeEvent,
}

impl<'a> EventLine<'a> {
    pub fn new(event: &'a ChangeEvent) -> Self {
        EventLine {
            line_type: "event",
            event,
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Serializable view of a draft snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotView {
    pub draft: Draft,
    pub teams: Vec<Team>,
    pub current_slot: Option<Slot>,
    pub total_slots: usize,
    pub picks: Vec<Pick>,
    /// Per-team pick counts in round-1 order.
    pub rosters: Vec<RosterCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterCount {
    pub team_id: String,
    /// Picks made in standard slots.
    pub standard: usize,
    /// All picks, bonus slots included.
    pub total: usize,
}

impl From<&DraftState> for SnapshotView {
    fn from(state: &DraftState) -> Self {
        SnapshotView {
            draft: state.draft.clone(),
            teams: state.teams.clone(),
            current_slot: state.current_slot().cloned(),
            total_slots: state.slots.len(),
            picks: state.picks.clone(),
            rosters: state
                .teams
                .iter()
                .map(|team| RosterCount {
                    team_id: team.team_id.clone(),
                    standard: state.standard_picks_for(&team.team_id),
                    total: state.picks.iter().filter(|p| p.team_id == team.team_id).count(),
                })
                .collect(),
        }
    }
}
