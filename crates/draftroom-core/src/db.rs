// SQLite persistence layer for drafts, schedules, picks and the player pool.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, Row, Transaction};

use crate::draft::pick::{Pick, PickType};
use crate::draft::player::{Division, NewPlayer, Player, Program};
use crate::draft::schedule::{Slot, SlotType};
use crate::draft::state::{Draft, DraftState, DraftStatus, Team};

/// Result of a version-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The stored version moved on, or a uniqueness constraint fired.
    /// Nothing was written.
    Conflict,
}

/// One audited reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAudit {
    pub draft_id: String,
    pub actor: String,
    pub picks_cleared: usize,
    pub reset_at: DateTime<Utc>,
}

/// SQLite-backed persistence for drafts and the player pool.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS players (
                player_id      INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name     TEXT NOT NULL,
                last_name      TEXT NOT NULL,
                grade          INTEGER NOT NULL,
                program        TEXT NOT NULL,
                skill_rank     INTEGER NOT NULL,
                returning_team TEXT,
                UNIQUE(first_name, last_name, grade, program)
            );

            CREATE TABLE IF NOT EXISTS drafts (
                draft_id           TEXT PRIMARY KEY,
                name               TEXT NOT NULL,
                grade              INTEGER NOT NULL,
                program            TEXT NOT NULL,
                status             TEXT NOT NULL,
                current_pick_index INTEGER NOT NULL,
                current_skill_rank INTEGER NOT NULL,
                initial_skill_rank INTEGER NOT NULL,
                base_roster_limit  INTEGER NOT NULL,
                version            INTEGER NOT NULL DEFAULT 0,
                created_at         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS draft_teams (
                draft_id  TEXT NOT NULL REFERENCES drafts(draft_id),
                team_id   TEXT NOT NULL,
                team_name TEXT NOT NULL,
                position  INTEGER NOT NULL,
                PRIMARY KEY (draft_id, team_id)
            );

            CREATE TABLE IF NOT EXISTS pick_slots (
                draft_id   TEXT NOT NULL REFERENCES drafts(draft_id),
                pick_index INTEGER NOT NULL,
                round      INTEGER NOT NULL,
                slot_type  TEXT NOT NULL,
                team_id    TEXT NOT NULL,
                PRIMARY KEY (draft_id, pick_index),
                FOREIGN KEY (draft_id, team_id) REFERENCES draft_teams(draft_id, team_id)
            );

            CREATE TABLE IF NOT EXISTS picks (
                draft_id   TEXT NOT NULL,
                pick_index INTEGER NOT NULL,
                team_id    TEXT NOT NULL,
                player_id  INTEGER NOT NULL REFERENCES players(player_id),
                pick_type  TEXT NOT NULL,
                picked_at  TEXT NOT NULL,
                PRIMARY KEY (draft_id, pick_index),
                UNIQUE (draft_id, player_id),
                FOREIGN KEY (draft_id, pick_index) REFERENCES pick_slots(draft_id, pick_index)
            );

            CREATE TABLE IF NOT EXISTS reset_audit (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                draft_id      TEXT NOT NULL REFERENCES drafts(draft_id),
                actor         TEXT NOT NULL,
                picks_cleared INTEGER NOT NULL,
                reset_at      TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_players_division ON players(grade, program);",
        )
        .context("failed to create players division index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Drafts
    // ------------------------------------------------------------------

    /// Persist a freshly created draft with its teams and slot schedule in a
    /// single transaction.
    pub fn create_draft(&self, state: &DraftState) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let d = &state.draft;

        tx.execute(
            "INSERT INTO drafts
                (draft_id, name, grade, program, status, current_pick_index,
                 current_skill_rank, initial_skill_rank, base_roster_limit, version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                d.draft_id,
                d.name,
                d.division.grade,
                d.division.program.as_str(),
                d.status.as_str(),
                d.current_pick_index,
                d.current_skill_rank,
                d.initial_skill_rank,
                d.base_roster_limit,
                d.version as i64,
                d.created_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("failed to insert draft {}", d.draft_id))?;

        for (position, team) in state.teams.iter().enumerate() {
            tx.execute(
                "INSERT INTO draft_teams (draft_id, team_id, team_name, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![d.draft_id, team.team_id, team.team_name, position as i64 + 1],
            )
            .context("failed to insert draft team")?;
        }

        for slot in state.slots.iter() {
            tx.execute(
                "INSERT INTO pick_slots (draft_id, pick_index, round, slot_type, team_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    d.draft_id,
                    slot.pick_index,
                    slot.round,
                    slot.slot_type.as_str(),
                    slot.team_id,
                ],
            )
            .context("failed to insert pick slot")?;
        }

        tx.commit().context("failed to commit create_draft")?;
        Ok(())
    }

    /// Load a draft with its teams, slots and picks. Returns `None` if no
    /// draft has that id.
    pub fn load_draft(&self, draft_id: &str) -> Result<Option<DraftState>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(&format!("{DRAFT_COLUMNS} WHERE draft_id = ?1"))
            .context("failed to prepare load_draft query")?;
        let mut rows = stmt
            .query_map(params![draft_id], draft_from_row)
            .context("failed to query draft")?;
        let draft = match rows.next() {
            Some(row) => row.context("failed to read draft row")?,
            None => return Ok(None),
        };

        let teams = conn
            .prepare(
                "SELECT team_id, team_name FROM draft_teams
                 WHERE draft_id = ?1 ORDER BY position",
            )
            .context("failed to prepare teams query")?
            .query_map(params![draft_id], |row| {
                Ok(Team {
                    team_id: row.get(0)?,
                    team_name: row.get(1)?,
                })
            })
            .context("failed to query draft teams")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map draft team rows")?;

        let slots = conn
            .prepare(
                "SELECT pick_index, round, slot_type, team_id FROM pick_slots
                 WHERE draft_id = ?1 ORDER BY pick_index",
            )
            .context("failed to prepare slots query")?
            .query_map(params![draft_id], |row| {
                let slot_type: String = row.get(2)?;
                Ok(Slot {
                    pick_index: row.get(0)?,
                    round: row.get(1)?,
                    slot_type: parse_text(2, &slot_type, SlotType::from_str_slot)?,
                    team_id: row.get(3)?,
                })
            })
            .context("failed to query pick slots")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map pick slot rows")?;

        let picks = conn
            .prepare(
                "SELECT draft_id, pick_index, team_id, player_id, pick_type, picked_at
                 FROM picks WHERE draft_id = ?1 ORDER BY pick_index",
            )
            .context("failed to prepare picks query")?
            .query_map(params![draft_id], pick_from_row)
            .context("failed to query picks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map pick rows")?;

        Ok(Some(DraftState::new(draft, teams, slots, picks)))
    }

    /// All draft records, newest first.
    pub fn list_drafts(&self) -> Result<Vec<Draft>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("{DRAFT_COLUMNS} ORDER BY created_at DESC, draft_id"))
            .context("failed to prepare list_drafts query")?;
        let drafts = stmt
            .query_map([], draft_from_row)
            .context("failed to query drafts")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map draft rows")?;
        Ok(drafts)
    }

    /// Returns `true` if a draft with this id exists.
    pub fn draft_exists(&self, draft_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM drafts WHERE draft_id = ?1)",
                params![draft_id],
                |row| row.get(0),
            )
            .context("failed to check draft existence")?;
        Ok(exists)
    }

    /// Insert a pick and move the draft record to `draft` in one
    /// transaction, provided the stored version is still `expected_version`.
    pub fn commit_pick(
        &self,
        pick: &Pick,
        draft: &Draft,
        expected_version: u64,
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        if update_draft(&tx, draft, expected_version)? == CommitOutcome::Conflict {
            return Ok(CommitOutcome::Conflict);
        }

        let inserted = tx.execute(
            "INSERT INTO picks (draft_id, pick_index, team_id, player_id, pick_type, picked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pick.draft_id,
                pick.pick_index,
                pick.team_id,
                pick.player_id,
                pick.pick_type.as_str(),
                pick.picked_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Ok(CommitOutcome::Conflict),
            Err(e) => return Err(e).context("failed to insert pick"),
        }

        tx.commit().context("failed to commit pick")?;
        Ok(CommitOutcome::Committed)
    }

    /// Version-checked update of the draft record alone (status changes).
    pub fn commit_transition(&self, draft: &Draft, expected_version: u64) -> Result<CommitOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        if update_draft(&tx, draft, expected_version)? == CommitOutcome::Conflict {
            return Ok(CommitOutcome::Conflict);
        }
        tx.commit().context("failed to commit draft transition")?;
        Ok(CommitOutcome::Committed)
    }

    /// Delete every pick of a draft, store its reset record and write an
    /// audit row, all in one transaction.
    pub fn reset_draft(
        &self,
        draft: &Draft,
        expected_version: u64,
        actor: &str,
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        if update_draft(&tx, draft, expected_version)? == CommitOutcome::Conflict {
            return Ok(CommitOutcome::Conflict);
        }

        let cleared = tx
            .execute("DELETE FROM picks WHERE draft_id = ?1", params![draft.draft_id])
            .context("failed to delete picks")?;

        tx.execute(
            "INSERT INTO reset_audit (draft_id, actor, picks_cleared, reset_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![draft.draft_id, actor, cleared as i64, Utc::now().to_rfc3339()],
        )
        .context("failed to write reset audit row")?;

        tx.commit().context("failed to commit reset")?;
        Ok(CommitOutcome::Committed)
    }

    /// Reset audit history for a draft, oldest first.
    pub fn load_reset_audit(&self, draft_id: &str) -> Result<Vec<ResetAudit>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT draft_id, actor, picks_cleared, reset_at FROM reset_audit
                 WHERE draft_id = ?1 ORDER BY id",
            )
            .context("failed to prepare reset audit query")?;
        let audits = stmt
            .query_map(params![draft_id], |row| {
                let cleared: i64 = row.get(2)?;
                let reset_at: String = row.get(3)?;
                Ok(ResetAudit {
                    draft_id: row.get(0)?,
                    actor: row.get(1)?,
                    picks_cleared: cleared as usize,
                    reset_at: parse_timestamp(3, &reset_at)?,
                })
            })
            .context("failed to query reset audit")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map reset audit rows")?;
        Ok(audits)
    }

    // ------------------------------------------------------------------
    // Player pool
    // ------------------------------------------------------------------

    /// Insert a player or update their rank and returning team if the same
    /// name already exists in that division. Returns the player's row id.
    pub fn upsert_player(&self, player: &NewPlayer) -> Result<i64> {
        let conn = self.conn();
        upsert_player_on(&conn, player).context("failed to upsert player")
    }

    /// Import a batch of players in a single transaction. Returns the row ids
    /// in input order.
    pub fn import_players(&self, players: &[NewPlayer]) -> Result<Vec<i64>> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin import transaction")?;

        let mut ids = Vec::with_capacity(players.len());
        for player in players {
            let id = upsert_player_on(&tx, player).with_context(|| {
                format!(
                    "failed to upsert {} {} in batch",
                    player.first_name, player.last_name
                )
            })?;
            ids.push(id);
        }

        tx.commit().context("failed to commit import")?;
        Ok(ids)
    }

    /// Every player in a division, best rank first.
    pub fn load_pool(&self, division: Division) -> Result<Vec<Player>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "{PLAYER_COLUMNS} WHERE grade = ?1 AND program = ?2
                 ORDER BY skill_rank, last_name, first_name, player_id"
            ))
            .context("failed to prepare load_pool query")?;
        let players = stmt
            .query_map(
                params![division.grade, division.program.as_str()],
                player_from_row,
            )
            .context("failed to query player pool")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player rows")?;
        Ok(players)
    }

    /// Withdraw a player from the pool. Players that have been picked in any
    /// draft are kept; returns `false` for them and for unknown ids.
    pub fn remove_player(&self, player_id: i64) -> Result<bool> {
        let conn = self.conn();
        let removed = conn
            .execute(
                "DELETE FROM players WHERE player_id = ?1
                 AND NOT EXISTS (SELECT 1 FROM picks WHERE player_id = ?1)",
                params![player_id],
            )
            .context("failed to remove player")?;
        Ok(removed > 0)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

const DRAFT_COLUMNS: &str = "SELECT draft_id, name, grade, program, status, current_pick_index,
        current_skill_rank, initial_skill_rank, base_roster_limit, version, created_at
     FROM drafts";

const PLAYER_COLUMNS: &str = "SELECT player_id, first_name, last_name, grade, program,
        skill_rank, returning_team
     FROM players";

fn draft_from_row(row: &Row<'_>) -> rusqlite::Result<Draft> {
    let program: String = row.get(3)?;
    let status: String = row.get(4)?;
    let version: i64 = row.get(9)?;
    let created_at: String = row.get(10)?;
    Ok(Draft {
        draft_id: row.get(0)?,
        name: row.get(1)?,
        division: Division::new(row.get(2)?, parse_text(3, &program, Program::from_str_program)?),
        status: parse_text(4, &status, DraftStatus::from_str_status)?,
        current_pick_index: row.get(5)?,
        current_skill_rank: row.get(6)?,
        initial_skill_rank: row.get(7)?,
        base_roster_limit: row.get(8)?,
        version: version as u64,
        created_at: parse_timestamp(10, &created_at)?,
    })
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    let program: String = row.get(4)?;
    Ok(Player {
        player_id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        division: Division::new(row.get(3)?, parse_text(4, &program, Program::from_str_program)?),
        skill_rank: row.get(5)?,
        returning_team: row.get(6)?,
    })
}

fn pick_from_row(row: &Row<'_>) -> rusqlite::Result<Pick> {
    let pick_type: String = row.get(4)?;
    let picked_at: String = row.get(5)?;
    Ok(Pick {
        draft_id: row.get(0)?,
        pick_index: row.get(1)?,
        team_id: row.get(2)?,
        player_id: row.get(3)?,
        pick_type: parse_text(4, &pick_type, PickType::from_str_pick)?,
        picked_at: parse_timestamp(5, &picked_at)?,
    })
}

fn parse_text<T>(idx: usize, raw: &str, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value `{raw}`").into(),
        )
    })
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn update_draft(tx: &Transaction<'_>, draft: &Draft, expected_version: u64) -> Result<CommitOutcome> {
    let updated = tx
        .execute(
            "UPDATE drafts SET status = ?1, current_pick_index = ?2,
                 current_skill_rank = ?3, version = ?4
             WHERE draft_id = ?5 AND version = ?6",
            params![
                draft.status.as_str(),
                draft.current_pick_index,
                draft.current_skill_rank,
                draft.version as i64,
                draft.draft_id,
                expected_version as i64,
            ],
        )
        .context("failed to update draft record")?;
    Ok(if updated == 1 {
        CommitOutcome::Committed
    } else {
        CommitOutcome::Conflict
    })
}

fn upsert_player_on(conn: &Connection, player: &NewPlayer) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO players (first_name, last_name, grade, program, skill_rank, returning_team)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(first_name, last_name, grade, program) DO UPDATE SET
            skill_rank     = excluded.skill_rank,
            returning_team = excluded.returning_team
         RETURNING player_id",
        params![
            player.first_name,
            player.last_name,
            player.division.grade,
            player.division.program.as_str(),
            player.skill_rank,
            player.returning_team,
        ],
        |row| row.get(0),
    )
}
