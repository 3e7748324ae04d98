// Application loop: reads protocol requests, dispatches them to the engine
// and the admin controller, and relays change events to the output stream.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use draftroom_core::admin::{AdminController, Caller, ResetRequest};
use draftroom_core::draft::pick::PickRequest;
use draftroom_core::engine::AllocationEngine;
use draftroom_core::error::{EngineError, EngineResult};
use draftroom_core::events::ChangeEvent;

use crate::auth::ConfigAuthorizer;
use crate::config::Config;
use crate::protocol::{Command, Envelope, EventLine, Response, SnapshotView};

/// Everything a request handler needs. Shared across in-flight requests.
pub struct AppState {
    pub engine: Arc<AllocationEngine>,
    pub admin: AdminController,
    pub auth: Arc<ConfigAuthorizer>,
}

impl AppState {
    pub fn new(engine: Arc<AllocationEngine>, auth: Arc<ConfigAuthorizer>) -> Self {
        let admin = AdminController::new(Arc::clone(&engine), auth.clone());
        AppState {
            engine,
            admin,
            auth,
        }
    }
}

/// Create every configured draft that storage does not have yet. Existing
/// drafts are left untouched. Returns the ids created.
pub fn ensure_configured_drafts(engine: &AllocationEngine, config: &Config) -> anyhow::Result<Vec<String>> {
    let mut created = Vec::new();
    for draft in &config.drafts {
        match engine.snapshot(&draft.id) {
            Ok(existing) => {
                debug!(
                    "Draft {} already exists ({}, pick {})",
                    draft.id, existing.draft.status, existing.draft.current_pick_index
                );
            }
            Err(EngineError::DraftNotFound(_)) => {
                engine.create_draft(draft.to_new_draft()?)?;
                created.push(draft.id.clone());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

fn to_payload<T: Serialize>(value: &T) -> EngineResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Storage(anyhow::anyhow!("failed to serialize response: {e}")))
}

/// Execute one command on behalf of `caller`.
pub async fn handle_command(state: &AppState, caller: &Caller, command: Command) -> EngineResult<Value> {
    match command {
        Command::ListDrafts => to_payload(&state.engine.list_drafts().await?),
        Command::Snapshot { draft_id } => {
            let snapshot = state.engine.snapshot(&draft_id)?;
            to_payload(&SnapshotView::from(snapshot.as_ref()))
        }
        Command::Board { draft_id } => to_payload(&state.engine.board(&draft_id).await?),
        Command::Eligible { draft_id, query } => {
            to_payload(&state.engine.eligible_players(&draft_id, &query).await?)
        }
        Command::SubmitPick {
            draft_id,
            player_id,
            expected_pick_index,
        } => {
            let acting_team = caller.team_id.clone().ok_or_else(|| {
                EngineError::Unauthorized(format!(
                    "`{}` does not act for a team in any draft",
                    caller.identity
                ))
            })?;
            let pick = state
                .engine
                .submit_pick(PickRequest {
                    draft_id,
                    player_id,
                    acting_team,
                    expected_pick_index: Some(expected_pick_index),
                })
                .await?;
            to_payload(&pick)
        }
        Command::Open { draft_id } => {
            let opened = state.admin.open_draft(caller, &draft_id).await?;
            to_payload(&SnapshotView::from(opened.as_ref()))
        }
        Command::Reset {
            draft_id,
            confirmed,
        } => {
            let reset = state
                .admin
                .reset(caller, &ResetRequest { draft_id, confirmed })
                .await?;
            to_payload(&SnapshotView::from(reset.as_ref()))
        }
    }
}

/// Parse one request line, run it and render the response line.
pub async fn handle_line(state: &AppState, line: &str) -> String {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(env) => env,
        Err(e) => {
            warn!("Unparseable request: {}", e);
            return Response::bad_request(format!("invalid request: {e}")).to_line();
        }
    };

    let caller = state.auth.resolve(&envelope.caller);
    let name = envelope.command.name();
    debug!("{} from {}", name, caller.identity);

    let response = match handle_command(state, &caller, envelope.command).await {
        Ok(payload) => Response::ok(envelope.id, payload),
        Err(e) => {
            if matches!(e, EngineError::Storage(_)) {
                warn!("{} from {} failed: {}", name, caller.identity, e);
            }
            Response::from_error(envelope.id, &e)
        }
    };
    response.to_line()
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> anyhow::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

async fn write_event<W: AsyncWrite + Unpin>(output: &mut W, event: &ChangeEvent) -> anyhow::Result<()> {
    match EventLine::new(event).to_line() {
        Ok(line) => write_line(output, &line).await,
        Err(e) => {
            warn!("Failed to serialize event for draft {}: {}", event.draft_id, e);
            Ok(())
        }
    }
}

/// Run the protocol loop until the input closes.
///
/// Each request runs in its own task so that a pick waiting on one draft's
/// lock does not hold up requests for other drafts. Responses and change
/// events share the output stream, one JSON object per line.
pub async fn run<R, W>(
    input: R,
    mut output: W,
    mut events: mpsc::Receiver<ChangeEvent>,
    state: Arc<AppState>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Application event loop started");

    let mut lines = input.lines();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let mut in_flight = JoinSet::new();
    let mut input_open = true;
    let mut events_open = true;

    loop {
        tokio::select! {
            // --- Requests ---
            line = lines.next_line(), if input_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let state = Arc::clone(&state);
                        let out_tx = out_tx.clone();
                        in_flight.spawn(async move {
                            let response = handle_line(&state, &line).await;
                            let _ = out_tx.send(response).await;
                        });
                    }
                    None => {
                        info!("Input closed; finishing {} in-flight requests", in_flight.len());
                        input_open = false;
                    }
                }
            }

            // --- Responses from request tasks ---
            Some(response) = out_rx.recv() => {
                write_line(&mut output, &response).await?;
            }

            // --- Change event relay ---
            event = events.recv(), if events_open => {
                match event {
                    Some(event) => write_event(&mut output, &event).await?,
                    None => {
                        info!("Event channel closed");
                        events_open = false;
                    }
                }
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    warn!("Request task failed: {}", e);
                }
            }
        }

        if !input_open && in_flight.is_empty() {
            break;
        }
    }

    // Flush whatever the last requests produced.
    while let Ok(response) = out_rx.try_recv() {
        write_line(&mut output, &response).await?;
    }
    while let Ok(event) = events.try_recv() {
        write_event(&mut output, &event).await?;
    }

    info!("Application event loop finished");
    Ok(())
}
