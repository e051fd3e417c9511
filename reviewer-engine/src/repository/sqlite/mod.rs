//! SQLite implementation of `Directory` and `PullRequestStore`.
//!
//! This provides persistent storage that survives restarts and can be shared
//! by several processes pointing at the same file.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Atomicity
//!
//! Every mutation runs inside an `IMMEDIATE` transaction that re-reads the
//! rows it depends on before writing. Combined with `busy_timeout`, a writer
//! in another process either waits briefly for the lock or fails fast with a
//! storage error; it never observes a half-applied reviewer swap.

mod directory;
mod pull_requests;


use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reviewer_core::{PullRequest, PullRequestId, PullRequestShort, Team, TeamName, User, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{
    Directory, InsertOutcome, MergeOutcome, NewPullRequest, PullRequestStore, RepositoryError,
    SaveTeamOutcome, SwapOutcome,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    /// Exposed as `pub(crate)` so tests can inspect rows directly.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The connection is configured with `journal_mode = WAL`,
    /// `synchronous = FULL`, `busy_timeout = 5000ms` and foreign keys on.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // SQLite silently keeps DELETE mode on filesystems without shared
        // memory support; refuse to run in that case. In-memory databases
        // report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS teams (
                    team_name TEXT NOT NULL PRIMARY KEY
                );

                CREATE TABLE IF NOT EXISTS users (
                    user_id TEXT NOT NULL PRIMARY KEY,
                    user_name TEXT NOT NULL,
                    team_name TEXT NOT NULL REFERENCES teams(team_name),
                    is_active INTEGER NOT NULL DEFAULT 1
                );

                CREATE INDEX IF NOT EXISTS idx_users_team
                    ON users(team_name, user_id);

                CREATE TABLE IF NOT EXISTS pull_requests (
                    pull_request_id TEXT NOT NULL PRIMARY KEY,
                    pull_request_name TEXT NOT NULL,
                    author_id TEXT NOT NULL REFERENCES users(user_id),
                    status TEXT NOT NULL CHECK (status IN ('OPEN', 'MERGED')),
                    created_at TEXT NOT NULL,
                    merged_at TEXT
                );

                CREATE TABLE IF NOT EXISTS pull_request_reviewers (
                    pull_request_id TEXT NOT NULL REFERENCES pull_requests(pull_request_id),
                    user_id TEXT NOT NULL REFERENCES users(user_id),
                    position INTEGER NOT NULL,
                    PRIMARY KEY (pull_request_id, user_id)
                );

                CREATE INDEX IF NOT EXISTS idx_reviewers_user
                    ON pull_request_reviewers(user_id);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                warn!("SQLite connection mutex poisoned during {}", operation);
                RepositoryError::storage(operation, "connection mutex poisoned")
            })?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

/// Adapter for `map_err` that tags a rusqlite error with the operation name.
pub(super) fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::storage(operation, e.to_string())
}

// =============================================================================
// Directory trait implementation
// =============================================================================

#[async_trait]
impl Directory for SqliteRepository {
    async fn eligibility_snapshot(
        &self,
        author: &UserId,
    ) -> Result<Option<Vec<UserId>>, RepositoryError> {
        let author = author.clone();
        self.run("eligibility_snapshot", move |conn| {
            directory::eligibility_snapshot_sync(conn, &author)
        })
        .await
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, RepositoryError> {
        let user_id = user_id.clone();
        self.run("get_user", move |conn| directory::get_user_sync(conn, &user_id))
            .await
    }

    async fn save_team(&self, team: &Team) -> Result<SaveTeamOutcome, RepositoryError> {
        let team = team.clone();
        self.run("save_team", move |conn| directory::save_team_sync(conn, &team))
            .await
    }

    async fn get_team(&self, team_name: &TeamName) -> Result<Option<Team>, RepositoryError> {
        let team_name = team_name.clone();
        self.run("get_team", move |conn| {
            directory::get_team_sync(conn, &team_name)
        })
        .await
    }

    async fn set_user_active(
        &self,
        user_id: &UserId,
        is_active: bool,
    ) -> Result<Option<User>, RepositoryError> {
        let user_id = user_id.clone();
        self.run("set_user_active", move |conn| {
            directory::set_user_active_sync(conn, &user_id, is_active)
        })
        .await
    }
}

// =============================================================================
// PullRequestStore trait implementation
// =============================================================================

#[async_trait]
impl PullRequestStore for SqliteRepository {
    async fn insert(
        &self,
        pull_request: NewPullRequest,
        reviewers: &[UserId],
    ) -> Result<InsertOutcome, RepositoryError> {
        let reviewers = reviewers.to_vec();
        self.run("insert", move |conn| {
            pull_requests::insert_sync(conn, &pull_request, &reviewers)
        })
        .await
    }

    async fn get(&self, id: &PullRequestId) -> Result<Option<PullRequest>, RepositoryError> {
        let id = id.clone();
        self.run("get", move |conn| pull_requests::load_sync(conn, &id))
            .await
    }

    async fn swap_reviewer(
        &self,
        id: &PullRequestId,
        old: &UserId,
        new: &UserId,
    ) -> Result<SwapOutcome, RepositoryError> {
        let (id, old, new) = (id.clone(), old.clone(), new.clone());
        self.run("swap_reviewer", move |conn| {
            pull_requests::swap_reviewer_sync(conn, &id, &old, &new)
        })
        .await
    }

    async fn set_merged(
        &self,
        id: &PullRequestId,
        merged_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, RepositoryError> {
        let id = id.clone();
        self.run("set_merged", move |conn| {
            pull_requests::set_merged_sync(conn, &id, merged_at)
        })
        .await
    }

    async fn assigned_to(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequestShort>, RepositoryError> {
        let user_id = user_id.clone();
        self.run("assigned_to", move |conn| {
            pull_requests::assigned_to_sync(conn, &user_id)
        })
        .await
    }
}
