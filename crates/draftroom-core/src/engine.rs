// Allocation engine: the per-draft state machine.
//
// Every write (pick, open, reset) runs under the draft's writer lock, inside a
// blocking task that owns the guard. Once a write has started it runs to
// completion even if the caller goes away. Reads come from a watch channel
// holding the last committed state and never touch the writer lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::admin::AdminGrant;
use crate::db::{CommitOutcome, Database};
use crate::draft::eligibility::{self, EligibilityQuery, DEFAULT_ELIGIBLE_LIMIT};
use crate::draft::pick::{Pick, PickRequest, PickType};
use crate::draft::player::{Division, Player};
use crate::draft::schedule::{generate_schedule, ScheduleConfig, SlotType};
use crate::draft::state::{Draft, DraftState, DraftStatus, NewDraft};
use crate::error::{EngineError, EngineResult, IneligibleReason};
use crate::events::{ChangeEvent, ChangeKind, EventSink};

/// Default bounded wait for a draft's writer lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a writer waits for the draft lock before giving up with
    /// `Contention`.
    pub lock_timeout: Duration,
    /// Listing cap used when a query does not set its own limit.
    pub eligible_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            eligible_limit: DEFAULT_ELIGIBLE_LIMIT,
        }
    }
}

/// One row of the draft board: a slot and whatever fills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRow {
    pub pick_index: u32,
    pub round: u32,
    pub slot_type: SlotType,
    pub team_id: String,
    pub team_name: String,
    pub is_current: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick: Option<BoardPick>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPick {
    pub player_id: i64,
    pub player_name: String,
    pub pick_type: PickType,
    pub picked_at: DateTime<Utc>,
}

/// Writer lock plus the published snapshot for one draft.
struct DraftHandle {
    writer: Arc<Mutex<DraftState>>,
    snapshot: watch::Sender<Arc<DraftState>>,
}

impl DraftHandle {
    fn new(state: DraftState) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(state.clone()));
        DraftHandle {
            writer: Arc::new(Mutex::new(state)),
            snapshot,
        }
    }

    /// Install `next` as the committed state and publish it to readers.
    fn install(&self, guard: &mut OwnedMutexGuard<DraftState>, next: DraftState) -> Arc<DraftState> {
        **guard = next;
        let published = Arc::new(guard.clone());
        self.snapshot.send_replace(Arc::clone(&published));
        published
    }
}

pub struct AllocationEngine {
    db: Arc<Database>,
    events: Arc<dyn EventSink>,
    settings: EngineSettings,
    drafts: RwLock<HashMap<String, Arc<DraftHandle>>>,
}

impl AllocationEngine {
    pub fn new(db: Arc<Database>, events: Arc<dyn EventSink>, settings: EngineSettings) -> Self {
        AllocationEngine {
            db,
            events,
            settings,
            drafts: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Draft lifecycle
    // ------------------------------------------------------------------

    /// Validate a new draft, generate its schedule and persist it in the
    /// `scheduled` state.
    pub fn create_draft(&self, new: NewDraft) -> EngineResult<Arc<DraftState>> {
        if new.draft_id.trim().is_empty() {
            return Err(EngineError::Configuration("draft id must not be empty".into()));
        }
        if new.initial_skill_rank == 0 {
            return Err(EngineError::Configuration(
                "initial skill rank must be at least 1".into(),
            ));
        }
        if self.db.draft_exists(&new.draft_id)? {
            return Err(EngineError::Configuration(format!(
                "draft `{}` already exists",
                new.draft_id
            )));
        }

        let slots = generate_schedule(&ScheduleConfig {
            teams: new.teams.iter().map(|t| t.team_id.clone()).collect(),
            base_roster_limit: new.base_roster_limit,
            bonus_rounds: new.bonus_rounds,
        })?;

        let draft = Draft {
            draft_id: new.draft_id,
            name: new.name,
            division: new.division,
            status: DraftStatus::Scheduled,
            current_pick_index: 1,
            current_skill_rank: new.initial_skill_rank,
            initial_skill_rank: new.initial_skill_rank,
            base_roster_limit: new.base_roster_limit,
            version: 0,
            created_at: Utc::now(),
        };
        let state = DraftState::new(draft, new.teams, slots, Vec::new());
        self.db.create_draft(&state)?;

        info!(
            "Created draft {} ({}, {} teams, {} slots)",
            state.draft.draft_id,
            state.draft.division,
            state.teams.len(),
            state.slots.len()
        );

        let published = Arc::new(state.clone());
        let handle = Arc::new(DraftHandle::new(state));
        self.drafts
            .write()
            .expect("draft registry poisoned")
            .insert(published.draft.draft_id.clone(), handle);
        Ok(published)
    }

    /// Move a draft from `scheduled` to `active`. Opening an active draft is
    /// a no-op.
    pub async fn open_draft(&self, grant: &AdminGrant, draft_id: &str) -> EngineResult<Arc<DraftState>> {
        grant.check(draft_id)?;
        let handle = self.handle(draft_id)?;
        let guard = self.lock(&handle, draft_id).await?;

        let db = Arc::clone(&self.db);
        let events = Arc::clone(&self.events);
        let actor = grant.actor().to_string();
        tokio::task::spawn_blocking(move || commit_open(guard, &handle, &db, events.as_ref(), &actor))
            .await
            .map_err(|e| EngineError::Storage(anyhow::anyhow!("open task failed: {e}")))?
    }

    /// Clear every pick and restore the initial pointer and threshold. The
    /// draft returns to `active` whatever its prior status.
    pub async fn reset(&self, grant: &AdminGrant, draft_id: &str) -> EngineResult<Arc<DraftState>> {
        grant.check(draft_id)?;
        let handle = self.handle(draft_id)?;
        let guard = self.lock(&handle, draft_id).await?;

        let db = Arc::clone(&self.db);
        let events = Arc::clone(&self.events);
        let actor = grant.actor().to_string();
        tokio::task::spawn_blocking(move || commit_reset(guard, &handle, &db, events.as_ref(), &actor))
            .await
            .map_err(|e| EngineError::Storage(anyhow::anyhow!("reset task failed: {e}")))?
    }

    /// Pick a player into the slot on the clock.
    ///
    /// Validation runs against the state held under the lock, not the state
    /// the caller last saw. On failure nothing changes.
    pub async fn submit_pick(&self, request: PickRequest) -> EngineResult<Pick> {
        let handle = self.handle(&request.draft_id)?;
        let guard = self.lock(&handle, &request.draft_id).await?;

        let db = Arc::clone(&self.db);
        let events = Arc::clone(&self.events);
        tokio::task::spawn_blocking(move || commit_pick(guard, &handle, &db, events.as_ref(), request))
            .await
            .map_err(|e| EngineError::Storage(anyhow::anyhow!("pick task failed: {e}")))?
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The last committed state of a draft.
    pub fn snapshot(&self, draft_id: &str) -> EngineResult<Arc<DraftState>> {
        let handle = self.handle(draft_id)?;
        let state = handle.snapshot.borrow().clone();
        Ok(state)
    }

    /// Watch a draft's committed state.
    pub fn subscribe(&self, draft_id: &str) -> EngineResult<watch::Receiver<Arc<DraftState>>> {
        Ok(self.handle(draft_id)?.snapshot.subscribe())
    }

    /// Every slot in pick order joined with its team, pick and player.
    pub async fn board(&self, draft_id: &str) -> EngineResult<Vec<BoardRow>> {
        let state = self.snapshot(draft_id)?;
        let pool = self.load_pool(state.draft.division).await?;
        let names: HashMap<i64, String> = pool
            .iter()
            .map(|p| (p.player_id, p.full_name()))
            .collect();

        let rows = state
            .slots
            .iter()
            .map(|slot| BoardRow {
                pick_index: slot.pick_index,
                round: slot.round,
                slot_type: slot.slot_type,
                team_id: slot.team_id.clone(),
                team_name: state
                    .team(&slot.team_id)
                    .map(|t| t.team_name.clone())
                    .unwrap_or_else(|| slot.team_id.clone()),
                is_current: state.draft.status == DraftStatus::Active
                    && slot.pick_index == state.draft.current_pick_index,
                pick: state.pick_at(slot.pick_index).map(|pick| BoardPick {
                    player_id: pick.player_id,
                    player_name: names
                        .get(&pick.player_id)
                        .cloned()
                        .unwrap_or_else(|| format!("player #{}", pick.player_id)),
                    pick_type: pick.pick_type,
                    picked_at: pick.picked_at,
                }),
            })
            .collect();
        Ok(rows)
    }

    /// Players pickable right now, as `submit_pick` would judge them.
    ///
    /// A stalled threshold (the pool changed since the last commit) is
    /// previewed here the same way the next submission will relax it.
    pub async fn eligible_players(
        &self,
        draft_id: &str,
        query: &EligibilityQuery,
    ) -> EngineResult<Vec<Player>> {
        let snapshot = self.snapshot(draft_id)?;
        let pool = self.load_pool(snapshot.draft.division).await?;

        let mut preview = (*snapshot).clone();
        preview.relax_threshold(&pool);

        let mut query = query.clone();
        query.limit.get_or_insert(self.settings.eligible_limit);
        Ok(eligibility::eligible(&preview, &pool, &query))
    }

    pub async fn list_drafts(&self) -> EngineResult<Vec<Draft>> {
        let db = Arc::clone(&self.db);
        let drafts = tokio::task::spawn_blocking(move || db.list_drafts())
            .await
            .map_err(|e| EngineError::Storage(anyhow::anyhow!("draft list task failed: {e}")))??;
        Ok(drafts)
    }

    /// Pool reads share the connection with commits, so they wait on the
    /// blocking pool rather than on a runtime worker.
    async fn load_pool(&self, division: Division) -> EngineResult<Vec<Player>> {
        let db = Arc::clone(&self.db);
        let pool = tokio::task::spawn_blocking(move || db.load_pool(division))
            .await
            .map_err(|e| EngineError::Storage(anyhow::anyhow!("pool read task failed: {e}")))??;
        Ok(pool)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Look up a draft's handle, loading it from storage on first use.
    fn handle(&self, draft_id: &str) -> EngineResult<Arc<DraftHandle>> {
        if let Some(handle) = self
            .drafts
            .read()
            .expect("draft registry poisoned")
            .get(draft_id)
        {
            return Ok(Arc::clone(handle));
        }

        let state = self
            .db
            .load_draft(draft_id)?
            .ok_or_else(|| EngineError::DraftNotFound(draft_id.to_string()))?;
        debug!(
            "Loaded draft {} from storage at pick {} (v{})",
            draft_id, state.draft.current_pick_index, state.draft.version
        );

        let mut drafts = self.drafts.write().expect("draft registry poisoned");
        let handle = drafts
            .entry(draft_id.to_string())
            .or_insert_with(|| Arc::new(DraftHandle::new(state)));
        Ok(Arc::clone(handle))
    }

    async fn lock(&self, handle: &Arc<DraftHandle>, draft_id: &str) -> EngineResult<OwnedMutexGuard<DraftState>> {
        let acquire = Arc::clone(&handle.writer).lock_owned();
        match tokio::time::timeout(self.settings.lock_timeout, acquire).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(
                    "Timed out after {:?} waiting for draft {} lock",
                    self.settings.lock_timeout, draft_id
                );
                Err(EngineError::Contention {
                    draft_id: draft_id.to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Critical sections (run on the blocking pool with the writer lock held)
// ---------------------------------------------------------------------------

fn commit_pick(
    mut guard: OwnedMutexGuard<DraftState>,
    handle: &DraftHandle,
    db: &Database,
    events: &dyn EventSink,
    request: PickRequest,
) -> EngineResult<Pick> {
    let result = validate_pick(&guard, db, &request);
    let (next, pick) = match result {
        Ok(validated) => validated,
        Err(e) => {
            warn!(
                "Rejected pick of player {} by {} in draft {}: {}",
                request.player_id, request.acting_team, request.draft_id, e
            );
            return Err(e);
        }
    };

    match db.commit_pick(&pick, &next.draft, guard.draft.version)? {
        CommitOutcome::Committed => {}
        CommitOutcome::Conflict => {
            warn!(
                "Storage conflict on pick {} of draft {}; resyncing",
                pick.pick_index, pick.draft_id
            );
            resync(&mut guard, handle, db)?;
            return Err(EngineError::SlotAlreadyFilled {
                pick_index: pick.pick_index,
            });
        }
    }

    let published = handle.install(&mut guard, next);
    info!(
        "Pick {} in draft {}: {} took player {} ({}); now at pick {}, threshold {}, {}",
        pick.pick_index,
        pick.draft_id,
        pick.team_id,
        pick.player_id,
        pick.pick_type,
        published.draft.current_pick_index,
        published.draft.current_skill_rank,
        published.draft.status
    );
    events.publish(ChangeEvent::from_state(&published, ChangeKind::Pick, Some(pick.clone())));
    Ok(pick)
}

/// Build the post-pick state without touching the committed one.
fn validate_pick(
    current: &DraftState,
    db: &Database,
    request: &PickRequest,
) -> EngineResult<(DraftState, Pick)> {
    if current.draft.status != DraftStatus::Active {
        return Err(EngineError::DraftNotActive {
            draft_id: request.draft_id.clone(),
            status: current.draft.status,
        });
    }

    let mut next = current.clone();
    let pool = db.load_pool(next.draft.division)?;
    if let Some((from, to)) = next.relax_threshold(&pool) {
        debug!(
            "Draft {} stalled at threshold {}; relaxed to {} before validation",
            request.draft_id, from, to
        );
    }

    let slot = next
        .current_slot()
        .cloned()
        .ok_or_else(|| EngineError::DraftNotActive {
            draft_id: request.draft_id.clone(),
            status: DraftStatus::Closed,
        })?;

    if let Some(expected) = request.expected_pick_index {
        if expected != slot.pick_index {
            return Err(EngineError::SlotAlreadyFilled {
                pick_index: expected,
            });
        }
    }

    if slot.team_id != request.acting_team {
        return Err(EngineError::NotOnClock {
            pick_index: slot.pick_index,
            on_clock: slot.team_id.clone(),
            acting_team: request.acting_team.clone(),
        });
    }

    let player = pool
        .iter()
        .find(|p| p.player_id == request.player_id)
        .ok_or(EngineError::PlayerIneligible {
            player_id: request.player_id,
            reason: IneligibleReason::NotInPool,
        })?;

    let pick_type = eligibility::check_pick(&next, player, &request.acting_team).map_err(|reason| {
        EngineError::PlayerIneligible {
            player_id: request.player_id,
            reason,
        }
    })?;

    let pick = Pick {
        draft_id: request.draft_id.clone(),
        pick_index: slot.pick_index,
        team_id: request.acting_team.clone(),
        player_id: player.player_id,
        pick_type,
        picked_at: Utc::now(),
    };

    next.apply_pick(pick.clone());
    if let Some((from, to)) = next.relax_threshold(&pool) {
        debug!(
            "Draft {} relaxed threshold {} -> {} after pick {}",
            request.draft_id, from, to, pick.pick_index
        );
    }
    next.draft.version += 1;

    Ok((next, pick))
}

fn commit_open(
    mut guard: OwnedMutexGuard<DraftState>,
    handle: &DraftHandle,
    db: &Database,
    events: &dyn EventSink,
    actor: &str,
) -> EngineResult<Arc<DraftState>> {
    match guard.draft.status {
        DraftStatus::Active => return Ok(handle.snapshot.borrow().clone()),
        DraftStatus::Closed => {
            return Err(EngineError::DraftNotActive {
                draft_id: guard.draft.draft_id.clone(),
                status: DraftStatus::Closed,
            })
        }
        DraftStatus::Scheduled => {}
    }

    let mut next = guard.clone();
    next.draft.status = DraftStatus::Active;
    let pool = db.load_pool(next.draft.division)?;
    next.relax_threshold(&pool);
    next.draft.version += 1;

    if db.commit_transition(&next.draft, guard.draft.version)? == CommitOutcome::Conflict {
        let draft_id = guard.draft.draft_id.clone();
        resync(&mut guard, handle, db)?;
        return Err(EngineError::Contention { draft_id });
    }

    let published = handle.install(&mut guard, next);
    info!(
        "Draft {} opened by {} at threshold {}",
        published.draft.draft_id, actor, published.draft.current_skill_rank
    );
    events.publish(ChangeEvent::from_state(&published, ChangeKind::Opened, None));
    Ok(published)
}

fn commit_reset(
    mut guard: OwnedMutexGuard<DraftState>,
    handle: &DraftHandle,
    db: &Database,
    events: &dyn EventSink,
    actor: &str,
) -> EngineResult<Arc<DraftState>> {
    let cleared = guard.picks.len();
    let mut next = guard.clone();
    next.reset();
    next.draft.version += 1;

    if db.reset_draft(&next.draft, guard.draft.version, actor)? == CommitOutcome::Conflict {
        let draft_id = guard.draft.draft_id.clone();
        resync(&mut guard, handle, db)?;
        return Err(EngineError::Contention { draft_id });
    }

    let published = handle.install(&mut guard, next);
    warn!(
        "Draft {} reset by {}: {} picks cleared, threshold back to {}",
        published.draft.draft_id, actor, cleared, published.draft.current_skill_rank
    );
    events.publish(ChangeEvent::from_state(&published, ChangeKind::Reset, None));
    Ok(published)
}

/// Replace the cached state with what storage holds. Used after another
/// writer moved the stored version.
fn resync(guard: &mut OwnedMutexGuard<DraftState>, handle: &DraftHandle, db: &Database) -> EngineResult<()> {
    let draft_id = guard.draft.draft_id.clone();
    let fresh = db
        .load_draft(&draft_id)?
        .ok_or_else(|| EngineError::DraftNotFound(draft_id))?;
    handle.install(guard, fresh);
    Ok(())
}
