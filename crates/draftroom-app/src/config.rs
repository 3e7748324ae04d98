// Configuration loading and parsing (config/draftroom.toml).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use draftroom_core::draft::player::{Division, Program};
use draftroom_core::draft::schedule::{BonusRound, MAX_SLOTS};
use draftroom_core::draft::state::{NewDraft, Team};
use draftroom_core::engine::EngineSettings;

const CONFIG_FILE: &str = "draftroom.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("no config file at {path} and no defaults/draftroom.toml to create it from")]
    MissingDefaults { path: PathBuf },

    #[error("failed to create {path} from defaults: {source}")]
    DefaultsCopyError {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// draftroom.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    pub database: DatabaseSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub drafts: Vec<DraftConfig>,
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_eligible_limit")]
    pub eligible_limit: usize,
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_eligible_limit() -> usize {
    200
}

impl Default for EngineSection {
    fn default() -> Self {
        EngineSection {
            lock_timeout_ms: default_lock_timeout_ms(),
            eligible_limit: default_eligible_limit(),
        }
    }
}

impl EngineSection {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            eligible_limit: self.eligible_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolSection {
    /// Player-pool CSV imported at startup, relative to the working directory.
    #[serde(default)]
    pub csv: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminSection {
    /// Identities allowed to open and reset every draft.
    #[serde(default)]
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftConfig {
    pub id: String,
    pub name: String,
    pub grade: u8,
    pub program: String,
    pub base_roster_limit: u32,
    pub initial_skill_rank: u32,
    pub teams: Vec<TeamConfig>,
    #[serde(default)]
    pub bonus_rounds: Vec<BonusRoundConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BonusRoundConfig {
    pub round: u32,
    #[serde(default)]
    pub order: Option<Vec<String>>,
}

/// Maps an authenticated identity to the team it acts for.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub identity: String,
    pub team_id: String,
}

impl DraftConfig {
    /// The engine's creation request for this draft. Call after validation.
    pub fn to_new_draft(&self) -> Result<NewDraft, ConfigError> {
        let program = Program::from_str_program(&self.program).ok_or_else(|| {
            invalid(
                format!("drafts.{}.program", self.id),
                format!("expected \"flag\" or \"tackle\", got {:?}", self.program),
            )
        })?;

        Ok(NewDraft {
            draft_id: self.id.clone(),
            name: self.name.clone(),
            division: Division::new(self.grade, program),
            initial_skill_rank: self.initial_skill_rank,
            base_roster_limit: self.base_roster_limit,
            teams: self
                .teams
                .iter()
                .map(|t| Team {
                    team_id: t.id.clone(),
                    team_name: t.name.clone(),
                })
                .collect(),
            bonus_rounds: self
                .bonus_rounds
                .iter()
                .map(|b| BonusRound {
                    round: b.round,
                    order: b.order.clone(),
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/draftroom.toml` relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;
    Ok(config)
}

/// Create `config/draftroom.toml` from `defaults/draftroom.toml` when it does
/// not exist yet. An existing file is never touched. Returns the path written,
/// if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.is_file() {
        return Ok(None);
    }

    let default = base_dir.join("defaults").join(CONFIG_FILE);
    if !default.is_file() {
        return Err(ConfigError::MissingDefaults { path: target });
    }

    let copy_err = |path: &Path, result: std::io::Result<()>| {
        result.map_err(|source| ConfigError::DefaultsCopyError {
            path: path.to_path_buf(),
            source,
        })
    };
    let config_dir = base_dir.join("config");
    copy_err(&config_dir, std::fs::create_dir_all(&config_dir))?;
    copy_err(&target, std::fs::copy(&default, &target).map(|_| ()))?;

    tracing::info!("created {} from defaults", target.display());
    Ok(Some(target))
}

/// Load config relative to the current working directory, copying defaults
/// into `config/` first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.engine.lock_timeout_ms == 0 {
        return Err(invalid("engine.lock_timeout_ms", "must be greater than 0"));
    }
    if config.engine.eligible_limit == 0 {
        return Err(invalid("engine.eligible_limit", "must be greater than 0"));
    }
    if config.database.path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    let mut draft_ids = HashSet::new();
    let mut all_teams = HashSet::new();
    for draft in &config.drafts {
        let prefix = format!("drafts.{}", draft.id);
        if draft.id.trim().is_empty() {
            return Err(invalid("drafts.id", "must not be empty"));
        }
        if !draft_ids.insert(draft.id.as_str()) {
            return Err(invalid(format!("{prefix}.id"), "duplicate draft id"));
        }
        if Program::from_str_program(&draft.program).is_none() {
            return Err(invalid(
                format!("{prefix}.program"),
                format!("expected \"flag\" or \"tackle\", got {:?}", draft.program),
            ));
        }
        if draft.base_roster_limit == 0 {
            return Err(invalid(format!("{prefix}.base_roster_limit"), "must be greater than 0"));
        }
        if draft.base_roster_limit > MAX_SLOTS {
            return Err(invalid(
                format!("{prefix}.base_roster_limit"),
                format!("must be at most {MAX_SLOTS}"),
            ));
        }
        if draft.initial_skill_rank == 0 {
            return Err(invalid(format!("{prefix}.initial_skill_rank"), "must be at least 1"));
        }
        if draft.teams.is_empty() {
            return Err(invalid(format!("{prefix}.teams"), "at least one team is required"));
        }
        for team in &draft.teams {
            if team.id.trim().is_empty() {
                return Err(invalid(format!("{prefix}.teams.id"), "must not be empty"));
            }
            all_teams.insert(team.id.as_str());
        }
    }

    for (i, mapping) in config.identities.iter().enumerate() {
        if mapping.identity.trim().is_empty() {
            return Err(invalid(format!("identities[{i}].identity"), "must not be empty"));
        }
        if !all_teams.contains(mapping.team_id.as_str()) {
            return Err(invalid(
                format!("identities[{i}].team_id"),
                format!("unknown team `{}`", mapping.team_id),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
