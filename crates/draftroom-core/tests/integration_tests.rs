// Integration tests for the draft allocation engine.
//
// These drive the engine through its public API only: drafts are created,
// opened and reset through the admin controller, picks go through
// `submit_pick`, and state is observed through snapshots, the board and the
// stored rows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::mpsc;

use draftroom_core::admin::{AdminController, Authorizer, Caller, ResetRequest};
use draftroom_core::db::Database;
use draftroom_core::draft::eligibility::EligibilityQuery;
use draftroom_core::draft::pick::{Pick, PickRequest, PickType};
use draftroom_core::draft::player::{Division, NewPlayer, Program};
use draftroom_core::draft::schedule::{BonusRound, SlotType};
use draftroom_core::draft::state::{DraftState, DraftStatus, NewDraft, Team};
use draftroom_core::engine::{AllocationEngine, EngineSettings};
use draftroom_core::error::{EngineError, IneligibleReason};
use draftroom_core::events::{ChangeEvent, ChangeKind};

// ===========================================================================
// Test helpers
// ===========================================================================

const ADMIN: &str = "commissioner";

struct AdminList;

#[async_trait]
impl Authorizer for AdminList {
    async fn is_draft_admin(&self, caller: &Caller, _draft_id: &str) -> anyhow::Result<bool> {
        Ok(caller.identity == ADMIN)
    }
}

struct Harness {
    db: Arc<Database>,
    engine: Arc<AllocationEngine>,
    admin: AdminController,
    events: mpsc::Receiver<ChangeEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::over(Arc::new(Database::open(":memory:").unwrap()))
    }

    /// A fresh engine over an existing database, as after a restart.
    fn over(db: Arc<Database>) -> Self {
        let (tx, events) = mpsc::channel(256);
        let engine = Arc::new(AllocationEngine::new(
            Arc::clone(&db),
            Arc::new(tx),
            EngineSettings::default(),
        ));
        let admin = AdminController::new(Arc::clone(&engine), Arc::new(AdminList));
        Harness {
            db,
            engine,
            admin,
            events,
        }
    }

    fn player(&self, last: &str, rank: u32, returning: Option<&str>) -> i64 {
        self.db
            .upsert_player(&NewPlayer {
                first_name: "Kid".into(),
                last_name: last.into(),
                division: division(),
                skill_rank: rank,
                returning_team: returning.map(str::to_string),
            })
            .unwrap()
    }

    async fn create_and_open(&self, draft: NewDraft) {
        let draft_id = draft.draft_id.clone();
        self.engine.create_draft(draft).unwrap();
        self.admin.open_draft(&admin(), &draft_id).await.unwrap();
    }

    async fn pick(&self, player_id: i64, team: &str) -> Result<Pick, EngineError> {
        self.engine.submit_pick(request("d1", player_id, team)).await
    }

    fn state(&self) -> Arc<DraftState> {
        self.engine.snapshot("d1").unwrap()
    }

    fn drain_events(&mut self) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn division() -> Division {
    Division::new(7, Program::Tackle)
}

fn admin() -> Caller {
    Caller {
        identity: ADMIN.into(),
        team_id: None,
    }
}

fn teams(ids: &[&str]) -> Vec<Team> {
    ids.iter()
        .map(|id| Team {
            team_id: id.to_string(),
            team_name: id.to_uppercase(),
        })
        .collect()
}

/// Two teams, two standard rounds, threshold 5.
fn two_team_draft() -> NewDraft {
    NewDraft {
        draft_id: "d1".into(),
        name: "Grade 7 Tackle".into(),
        division: division(),
        initial_skill_rank: 5,
        base_roster_limit: 2,
        teams: teams(&["hawks", "owls"]),
        bonus_rounds: vec![],
    }
}

fn request(draft_id: &str, player_id: i64, team: &str) -> PickRequest {
    PickRequest {
        draft_id: draft_id.into(),
        player_id,
        acting_team: team.into(),
        expected_pick_index: None,
    }
}

fn confirmed_reset() -> ResetRequest {
    ResetRequest {
        draft_id: "d1".into(),
        confirmed: true,
    }
}

fn assert_pointer_invariant(state: &DraftState) {
    assert_eq!(state.draft.current_pick_index, state.next_unfilled_index());
    let filled: HashSet<u32> = state.picks.iter().map(|p| p.pick_index).collect();
    assert_eq!(filled.len(), state.picks.len(), "two picks share a slot");
    let players: HashSet<i64> = state.picks.iter().map(|p| p.player_id).collect();
    assert_eq!(players.len(), state.picks.len(), "a player was picked twice");
    if state.draft.status == DraftStatus::Closed {
        assert_eq!(state.draft.current_pick_index, state.end_index());
    }
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn scenario_a_skill_gate_then_pointer_advances() {
    let h = Harness::new();
    let three = h.player("Three", 3, None);
    let seven = h.player("Seven", 7, None);
    h.create_and_open(two_team_draft()).await;

    let err = h.pick(seven, "hawks").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::PlayerIneligible {
            reason: IneligibleReason::AboveSkillGate {
                skill_rank: 7,
                current_skill_rank: 5
            },
            ..
        }
    ));
    assert_eq!(h.state().draft.current_pick_index, 1);

    let pick = h.pick(three, "hawks").await.unwrap();
    assert_eq!(pick.pick_index, 1);
    assert_eq!(h.state().draft.current_pick_index, 2);
}

#[tokio::test]
async fn scenario_b_threshold_relaxes_when_tier_runs_dry() {
    let h = Harness::new();
    let three = h.player("Three", 3, None);
    let five = h.player("Five", 5, None);
    let nine = h.player("Nine", 9, None);
    h.create_and_open(two_team_draft()).await;

    h.pick(three, "hawks").await.unwrap();
    // Rank 5 is still available, so the tier stays put.
    assert_eq!(h.state().draft.current_skill_rank, 5);

    let err = h.pick(nine, "owls").await.unwrap_err();
    assert!(matches!(err, EngineError::PlayerIneligible { player_id, .. } if player_id == nine));
    assert_eq!(h.state().draft.current_skill_rank, 5);

    // The last in-tier player is withdrawn from the pool.
    assert!(h.db.remove_player(five).unwrap());

    let pick = h.pick(nine, "owls").await.unwrap();
    assert_eq!(pick.pick_index, 2);
    assert_eq!(pick.pick_type, PickType::Standard);
    let state = h.state();
    assert_eq!(state.draft.current_skill_rank, 9);
    assert_eq!(state.draft.current_pick_index, 3);
}

#[tokio::test]
async fn threshold_relaxes_after_commit_when_next_slot_stalls() {
    let h = Harness::new();
    let three = h.player("Three", 3, None);
    h.player("Eight", 8, None);
    h.player("Twelve", 12, None);
    h.create_and_open(two_team_draft()).await;

    h.pick(three, "hawks").await.unwrap();
    let state = h.state();
    assert_eq!(state.draft.current_skill_rank, 8);

    let ranks: Vec<u32> = h
        .engine
        .eligible_players("d1", &EligibilityQuery::default())
        .await
        .unwrap()
        .iter()
        .map(|p| p.skill_rank)
        .collect();
    assert_eq!(ranks, vec![8]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_c_concurrent_picks_for_one_slot() {
    for round in 0..10 {
        let h = Harness::new();
        let players: Vec<i64> = (0..8)
            .map(|i| h.player(&format!("Racer{round}_{i}"), 1, None))
            .collect();
        h.create_and_open(two_team_draft()).await;

        let handles = players.iter().map(|&pid| {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move {
                let mut req = request("d1", pid, "hawks");
                req.expected_pick_index = Some(1);
                engine.submit_pick(req).await
            })
        });
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one racer commits");
        for result in &results {
            if let Err(e) = result {
                assert!(
                    matches!(
                        e,
                        EngineError::SlotAlreadyFilled { .. } | EngineError::Contention { .. }
                    ),
                    "unexpected loser error: {e}"
                );
            }
        }

        let stored = h.db.load_draft("d1").unwrap().unwrap();
        assert_eq!(stored.picks.len(), 1);
        assert_eq!(stored.picks[0].pick_index, 1);
        assert_eq!(stored.draft.current_pick_index, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_picks_of_a_taken_player_all_fail() {
    let h = Harness::new();
    let star = h.player("Star", 1, None);
    h.player("Other", 2, None);
    h.create_and_open(two_team_draft()).await;
    h.pick(star, "hawks").await.unwrap();

    // Both requests target the same already-taken player.
    let a = h.engine.submit_pick(request("d1", star, "owls"));
    let b = h.engine.submit_pick(request("d1", star, "owls"));
    let (a, b) = tokio::join!(a, b);
    for result in [a, b] {
        assert!(matches!(
            result.unwrap_err(),
            EngineError::PlayerIneligible {
                reason: IneligibleReason::AlreadyPicked,
                ..
            }
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_picks_at_a_snake_turn_commit_once() {
    for round in 0..10 {
        let h = Harness::new();
        let first = h.player(&format!("First{round}"), 1, None);
        let a = h.player(&format!("TurnA{round}"), 2, None);
        let b = h.player(&format!("TurnB{round}"), 2, None);
        h.create_and_open(two_team_draft()).await;
        h.pick(first, "hawks").await.unwrap();

        // Picks 2 and 3 both belong to the owls; both requests saw pick 2.
        let handles = [a, b].map(|pid| {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move {
                let mut req = request("d1", pid, "owls");
                req.expected_pick_index = Some(2);
                engine.submit_pick(req).await
            })
        });
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners: Vec<&Pick> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "exactly one request commits");
        assert_eq!(winners[0].pick_index, 2);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(
            matches!(
                loser,
                EngineError::SlotAlreadyFilled { pick_index: 2, .. } | EngineError::Contention { .. }
            ),
            "unexpected loser error: {loser}"
        );

        let stored = h.db.load_draft("d1").unwrap().unwrap();
        assert_eq!(stored.picks.len(), 2);
        assert!(stored.pick_at(3).is_none(), "the loser must not land on pick 3");
        assert_eq!(stored.draft.current_pick_index, 3);
    }
}

#[tokio::test]
async fn scenario_d_reset_restores_initial_state() {
    let mut h = Harness::new();
    let ids: Vec<i64> = (1..=4).map(|i| h.player(&format!("P{i}"), i, None)).collect();
    h.create_and_open(two_team_draft()).await;
    h.pick(ids[0], "hawks").await.unwrap();
    h.pick(ids[1], "owls").await.unwrap();
    h.pick(ids[2], "owls").await.unwrap();
    assert_eq!(h.state().picks.len(), 3);
    h.drain_events();

    let state = h.admin.reset(&admin(), &confirmed_reset()).await.unwrap();
    assert!(state.picks.is_empty());
    assert_eq!(state.draft.current_pick_index, 1);
    assert_eq!(state.draft.current_skill_rank, 5);
    assert_eq!(state.draft.status, DraftStatus::Active);
    assert_eq!(state.slots.len(), 4);

    let stored = h.db.load_draft("d1").unwrap().unwrap();
    assert!(stored.picks.is_empty());
    assert_eq!(h.db.load_reset_audit("d1").unwrap()[0].picks_cleared, 3);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Reset);
    assert_eq!(events[0].new_pointer, 1);
    assert_eq!(events[0].new_threshold, 5);
}

#[tokio::test]
async fn reset_twice_equals_reset_once() {
    let h = Harness::new();
    let a = h.player("Able", 1, None);
    h.player("Baker", 2, None);
    h.create_and_open(two_team_draft()).await;
    h.pick(a, "hawks").await.unwrap();

    let once = h.admin.reset(&admin(), &confirmed_reset()).await.unwrap();
    let twice = h.admin.reset(&admin(), &confirmed_reset()).await.unwrap();

    assert_eq!(once.picks, twice.picks);
    assert_eq!(once.draft.current_pick_index, twice.draft.current_pick_index);
    assert_eq!(once.draft.current_skill_rank, twice.draft.current_skill_rank);
    assert_eq!(once.draft.status, twice.draft.status);
    assert_eq!(h.db.load_reset_audit("d1").unwrap().len(), 2);
}

#[tokio::test]
async fn scenario_e_returning_players_need_the_toggle() {
    let h = Harness::new();
    h.player("Able", 2, None);
    let returning = h.player("Back", 40, Some("owls"));
    h.create_and_open(two_team_draft()).await;

    let hidden = h
        .engine
        .eligible_players("d1", &EligibilityQuery::default())
        .await
        .unwrap();
    assert!(hidden.iter().all(|p| p.player_id != returning));

    let shown = h
        .engine
        .eligible_players(
            "d1",
            &EligibilityQuery {
                include_returning: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(shown[0].player_id, returning);
}

// ===========================================================================
// Pick classification
// ===========================================================================

#[tokio::test]
async fn returning_player_claimed_by_their_team() {
    let h = Harness::new();
    h.player("Able", 1, None);
    h.player("Baker", 2, None);
    let back = h.player("Back", 40, Some("owls"));
    h.create_and_open(two_team_draft()).await;

    // Hawks cannot take an out-of-tier player returning to someone else.
    let err = h.pick(back, "hawks").await.unwrap_err();
    assert!(matches!(err, EngineError::PlayerIneligible { .. }));

    let able = h.db.load_pool(division()).unwrap()[0].player_id;
    h.pick(able, "hawks").await.unwrap();
    let pick = h.pick(back, "owls").await.unwrap();
    assert_eq!(pick.pick_type, PickType::Returning);
    assert_eq!(h.state().standard_picks_for("owls"), 1);
}

#[tokio::test]
async fn bonus_slots_lift_the_gate_and_follow_explicit_order() {
    let h = Harness::new();
    let ids: Vec<i64> = (1..=4).map(|i| h.player(&format!("P{i}"), i, None)).collect();
    let deep = h.player("Deep", 30, None);
    h.create_and_open(NewDraft {
        bonus_rounds: vec![BonusRound {
            round: 3,
            order: Some(vec!["owls".into()]),
        }],
        ..two_team_draft()
    })
    .await;

    let board = h.engine.board("d1").await.unwrap();
    assert_eq!(board.len(), 5);
    assert_eq!(board[4].slot_type, SlotType::Bonus);
    assert_eq!(board[4].team_id, "owls");

    h.pick(ids[0], "hawks").await.unwrap();
    h.pick(ids[1], "owls").await.unwrap();
    h.pick(ids[2], "owls").await.unwrap();

    // Pick 4 is a standard slot and rank 4 is still in the tier.
    let err = h.pick(deep, "hawks").await.unwrap_err();
    assert!(matches!(err, EngineError::PlayerIneligible { .. }));
    h.pick(ids[3], "hawks").await.unwrap();

    // Pick 5 is the owls' bonus slot: no gate, no relaxation.
    assert_eq!(h.state().draft.current_skill_rank, 5);
    let pick = h.pick(deep, "owls").await.unwrap();
    assert_eq!(pick.pick_index, 5);
    assert_eq!(pick.pick_type, PickType::Bonus);

    let state = h.state();
    assert_eq!(state.draft.status, DraftStatus::Closed);
    assert_eq!(state.standard_picks_for("owls"), 2);
}

// ===========================================================================
// Lifecycle and recovery
// ===========================================================================

#[tokio::test]
async fn full_draft_closes_and_rejects_further_picks() {
    let mut h = Harness::new();
    let ids: Vec<i64> = (1..=5).map(|i| h.player(&format!("P{i}"), i, None)).collect();
    h.create_and_open(two_team_draft()).await;
    for (pid, team) in ids.iter().zip(["hawks", "owls", "owls", "hawks"]) {
        h.pick(*pid, team).await.unwrap();
    }

    let state = h.state();
    assert_eq!(state.draft.status, DraftStatus::Closed);
    assert_eq!(state.draft.current_pick_index, 5);
    assert_pointer_invariant(&state);

    let err = h.pick(ids[4], "hawks").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::DraftNotActive {
            status: DraftStatus::Closed,
            ..
        }
    ));

    let err = h.admin.open_draft(&admin(), "d1").await.unwrap_err();
    assert!(matches!(err, EngineError::DraftNotActive { .. }));

    let last = h.drain_events().pop().unwrap();
    assert_eq!(last.status, DraftStatus::Closed);
}

#[tokio::test]
async fn restart_recovers_committed_state() {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let (first_pick, second_pick) = {
        let h = Harness::over(Arc::clone(&db));
        let a = h.player("Able", 1, None);
        let b = h.player("Baker", 2, None);
        h.player("Cole", 3, None);
        h.create_and_open(two_team_draft()).await;
        h.pick(a, "hawks").await.unwrap();
        (a, b)
    };

    let h = Harness::over(db);
    let state = h.state();
    assert_eq!(state.draft.status, DraftStatus::Active);
    assert_eq!(state.draft.current_pick_index, 2);
    assert!(state.is_picked(first_pick));

    let pick = h.pick(second_pick, "owls").await.unwrap();
    assert_eq!(pick.pick_index, 2);
    assert_eq!(h.engine.list_drafts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unrelated_drafts_do_not_block_each_other() {
    let h = Harness::new();
    let a = h.player("Able", 1, None);
    let b = h.player("Baker", 2, None);
    h.create_and_open(two_team_draft()).await;
    h.create_and_open(NewDraft {
        draft_id: "d2".into(),
        ..two_team_draft()
    })
    .await;

    // The same player may be drafted once per draft.
    let (one, two) = tokio::join!(
        h.engine.submit_pick(request("d1", a, "hawks")),
        h.engine.submit_pick(request("d2", a, "hawks")),
    );
    assert!(one.is_ok());
    assert!(two.is_ok());
    assert_eq!(h.engine.snapshot("d2").unwrap().draft.current_pick_index, 2);
    assert!(!h.engine.snapshot("d1").unwrap().is_picked(b));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pointer_invariant_holds_for_every_observed_state() {
    let h = Harness::new();
    for i in 1..=12 {
        h.player(&format!("P{i:02}"), i, None);
    }
    h.create_and_open(NewDraft {
        base_roster_limit: 4,
        teams: teams(&["hawks", "owls", "crows"]),
        initial_skill_rank: 3,
        ..two_team_draft()
    })
    .await;

    let mut watcher = h.engine.subscribe("d1").unwrap();
    let observer = tokio::spawn(async move {
        let mut seen = 0;
        loop {
            {
                let state = watcher.borrow_and_update();
                assert_pointer_invariant(&state);
                seen += 1;
                if state.draft.status == DraftStatus::Closed {
                    return seen;
                }
            }
            if watcher.changed().await.is_err() {
                return seen;
            }
        }
    });

    // Each team keeps grabbing its best option until the draft closes.
    let drivers = ["hawks", "owls", "crows"].map(|team| {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move {
            for _ in 0..5_000 {
                let state = engine.snapshot("d1").unwrap();
                if state.draft.status == DraftStatus::Closed {
                    return;
                }
                let choices = engine
                    .eligible_players(
                        "d1",
                        &EligibilityQuery {
                            include_returning: true,
                            for_team: Some(team.to_string()),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
                if let Some(best) = choices.first() {
                    let _ = engine.submit_pick(request("d1", best.player_id, team)).await;
                }
                tokio::task::yield_now().await;
            }
        })
    });
    for driver in join_all(drivers).await {
        driver.unwrap();
    }

    let seen = tokio::time::timeout(Duration::from_secs(5), observer)
        .await
        .unwrap()
        .unwrap();
    assert!(seen >= 1);

    let stored = h.db.load_draft("d1").unwrap().unwrap();
    assert_eq!(stored.draft.status, DraftStatus::Closed);
    assert_eq!(stored.picks.len(), 12);
    assert_pointer_invariant(&stored);
}
