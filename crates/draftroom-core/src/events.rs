// Change events emitted after every committed transition.
//
// The engine hands events to an `EventSink` and moves on. Delivery is the
// relay's business; a slow or missing relay never blocks a commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::draft::pick::Pick;
use crate::draft::state::{DraftState, DraftStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Pick,
    Reset,
    Opened,
}

/// What viewers need to know to re-query the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub draft_id: String,
    pub kind: ChangeKind,
    pub new_pointer: u32,
    pub new_threshold: u32,
    pub status: DraftStatus,
    pub version: u64,
    /// The committed pick, for `ChangeKind::Pick`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick: Option<Pick>,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn from_state(state: &DraftState, kind: ChangeKind, pick: Option<Pick>) -> Self {
        ChangeEvent {
            draft_id: state.draft.draft_id.clone(),
            kind,
            new_pointer: state.draft.current_pick_index,
            new_threshold: state.draft.current_skill_rank,
            status: state.draft.status,
            version: state.draft.version,
            pick,
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget destination for change events. Must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

impl EventSink for mpsc::Sender<ChangeEvent> {
    fn publish(&self, event: ChangeEvent) {
        if let Err(e) = self.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(ev) => ("relay channel full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("relay channel closed", ev),
            };
            warn!(
                "Dropped {:?} event for draft {} (v{}): {}",
                event.kind, event.draft_id, event.version, reason
            );
        }
    }
}
