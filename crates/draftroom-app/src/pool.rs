// Player-pool CSV import.
//
// Columns: first_name, last_name, grade, program, skill_rank, returning_team.
// `returning_team` may be blank. Extra columns are ignored.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use draftroom_core::db::Database;
use draftroom_core::draft::player::{Division, NewPlayer, Program};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("row {row}: {message}")]
    Validation { row: usize, message: String },
}

#[derive(Debug, Deserialize)]
struct RawPlayer {
    first_name: String,
    last_name: String,
    grade: u8,
    program: String,
    skill_rank: u32,
    #[serde(default)]
    returning_team: Option<String>,
}

impl RawPlayer {
    /// `row` is the 1-based data row, for error messages.
    fn into_player(self, row: usize) -> Result<NewPlayer, PoolError> {
        let first_name = self.first_name.trim().to_string();
        let last_name = self.last_name.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(PoolError::Validation {
                row,
                message: "first_name and last_name are required".into(),
            });
        }
        let program = Program::from_str_program(&self.program).ok_or_else(|| PoolError::Validation {
            row,
            message: format!("unknown program {:?}", self.program),
        })?;
        if self.skill_rank == 0 {
            return Err(PoolError::Validation {
                row,
                message: format!("{first_name} {last_name}: skill_rank must be at least 1"),
            });
        }

        Ok(NewPlayer {
            first_name,
            last_name,
            division: Division::new(self.grade, program),
            skill_rank: self.skill_rank,
            returning_team: self
                .returning_team
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }
}

/// Parse a pool CSV. A row that does not deserialize is skipped with a
/// warning; a row that deserializes but is invalid fails the whole import.
fn parse_from_reader<R: Read>(rdr: R, path: &str) -> Result<Vec<NewPlayer>, PoolError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut players = Vec::new();
    for (i, result) in reader.deserialize::<RawPlayer>().enumerate() {
        match result {
            Ok(raw) => players.push(raw.into_player(i + 1)?),
            Err(e) if e.is_io_error() => {
                return Err(PoolError::Csv {
                    path: path.to_string(),
                    source: e,
                })
            }
            Err(e) => warn!("skipping malformed pool row {} in {}: {}", i + 1, path, e),
        }
    }
    Ok(players)
}

/// Load players from a pool CSV file.
pub fn load_pool_csv(path: &Path) -> Result<Vec<NewPlayer>, PoolError> {
    let file = std::fs::File::open(path).map_err(|e| PoolError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_from_reader(file, &path.display().to_string())
}

/// Load a pool CSV and upsert every player in one transaction. Returns the
/// number of players imported.
pub fn import_pool_csv(db: &Database, path: &Path) -> anyhow::Result<usize> {
    let players = load_pool_csv(path)?;
    db.import_players(&players)?;
    info!("Imported {} players from {}", players.len(), path.display());
    Ok(players.len())
}
