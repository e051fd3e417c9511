use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment environment. Selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Prod,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "prod" => Ok(Self::Prod),
            other => bail!("unknown environment '{}' (expected 'local' or 'prod')", other),
        }
    }
}

/// Which repository backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend '{}' (expected 'sqlite' or 'memory')", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    pub db_file: String,
    pub storage: StorageBackend,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = parse_or_default(lookup("REVIEWER_ENV"), Environment::Local)
            .context("REVIEWER_ENV must be 'local' or 'prod'")?;

        let state_dir = lookup("REVIEWER_STATE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let db_file = lookup("REVIEWER_DB_FILE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "reviewer-state.db".to_string());

        let storage = parse_or_default(lookup("REVIEWER_STORAGE"), StorageBackend::Sqlite)
            .context("REVIEWER_STORAGE must be 'sqlite' or 'memory'")?;

        Ok(Config {
            environment,
            state_dir,
            db_file,
            storage,
        })
    }

    /// Full path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join(&self.db_file)
    }
}

/// Parse an enumerated variable, falling back to `default` when it is unset
/// or blank. A set but unrecognised value is an error.
fn parse_or_default<T>(value: Option<String>, default: T) -> Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse(),
    }
}
