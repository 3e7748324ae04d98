// Player pool entries and the division they play in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which program a division belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    Flag,
    Tackle,
}

impl Program {
    /// Parse a program string ("flag" / "tackle"), case-insensitive.
    pub fn from_str_program(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flag" => Some(Program::Flag),
            "tackle" => Some(Program::Tackle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Program::Flag => "flag",
            Program::Tackle => "tackle",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grade/program pairing. Players are only draftable into a draft of the
/// same division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Division {
    pub grade: u8,
    pub program: Program,
}

impl Division {
    pub fn new(grade: u8, program: Program) -> Self {
        Division { grade, program }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grade {} {}", self.grade, self.program)
    }
}

/// A player in the shared pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Storage row id.
    pub player_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub division: Division,
    /// Lower is more elite.
    pub skill_rank: u32,
    /// The team this player returns to, if they were rostered last season.
    #[serde(default)]
    pub returning_team: Option<String>,
}

impl Player {
    pub fn is_returning(&self) -> bool {
        self.returning_team.is_some()
    }

    /// Whether this player returns to the given team.
    pub fn returns_to(&self, team_id: &str) -> bool {
        self.returning_team.as_deref() == Some(team_id)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A pool entry before it has a storage id (CSV import, admin edits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlayer {
    pub first_name: String,
    pub last_name: String,
    pub division: Division,
    pub skill_rank: u32,
    #[serde(default)]
    pub returning_team: Option<String>,
}
