//! Storage contracts for the workflow engine.
//!
//! Two traits split the storage surface the way the engine consumes it:
//! `Directory` answers who is on which team and who is active, and
//! `PullRequestStore` owns pull request records and their reviewer sets.
//! Both backends in this module (in-memory and SQLite) implement both traits
//! on a single type so that cross-checks such as "is this replacement still an
//! active teammate" run inside the same critical section as the write.
//!
//! Every primitive either returns a populated outcome or a `RepositoryError`.
//! Business-rule rejections are variants of the outcome enums, never `None`.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reviewer_core::{PullRequest, PullRequestId, PullRequestShort, Team, TeamName, User, UserId};

/// Failure of the storage layer itself, unrelated to business rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("corrupt {what} in storage")]
    Corruption { what: &'static str },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        Self::Corruption { what }
    }
}

/// Result of saving a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTeamOutcome {
    /// The team did not exist before; it now holds the returned members.
    Created(Team),
    /// At least one member was new or changed.
    Updated(Team),
    /// Every submitted member was already present with identical attributes.
    Unchanged,
}

/// A pull request about to be inserted. Status is always OPEN on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub pull_request_id: PullRequestId,
    pub pull_request_name: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(PullRequest),
    AlreadyExists,
    /// A proposed reviewer is no longer an active teammate of the author.
    StaleEligibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped(PullRequest),
    NotFound,
    Merged,
    /// The outgoing reviewer is not (or no longer) assigned.
    NotAssigned,
    /// The incoming reviewer is already assigned.
    AlreadyAssigned,
    /// The incoming reviewer is no longer an active teammate of the author.
    StaleEligibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged(PullRequest),
    /// The record was already merged; it is returned unchanged.
    AlreadyMerged(PullRequest),
    NotFound,
}

/// Team and user records.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Active teammates of `author`, excluding the author, in ascending user
    /// ID order. Returns `None` if the author does not exist.
    ///
    /// Author existence and the candidate list come from one read so that a
    /// single decision never mixes two snapshots.
    async fn eligibility_snapshot(
        &self,
        author: &UserId,
    ) -> Result<Option<Vec<UserId>>, RepositoryError>;

    /// Returns `None` if no such user exists.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, RepositoryError>;

    /// Create the team or merge `team.members` into it (upsert by user ID).
    async fn save_team(&self, team: &Team) -> Result<SaveTeamOutcome, RepositoryError>;

    /// The team with its members in ascending user ID order.
    async fn get_team(&self, team_name: &TeamName) -> Result<Option<Team>, RepositoryError>;

    /// Returns the updated user, or `None` if no such user exists.
    async fn set_user_active(
        &self,
        user_id: &UserId,
        is_active: bool,
    ) -> Result<Option<User>, RepositoryError>;
}

/// Pull request records and reviewer sets.
///
/// Each mutating method is atomic: it re-validates its preconditions and
/// applies its write in one unit, so no reader ever sees a half-applied
/// change.
#[async_trait]
pub trait PullRequestStore: Send + Sync {
    /// Insert a new OPEN pull request together with its reviewers.
    async fn insert(
        &self,
        pull_request: NewPullRequest,
        reviewers: &[UserId],
    ) -> Result<InsertOutcome, RepositoryError>;

    async fn get(&self, id: &PullRequestId) -> Result<Option<PullRequest>, RepositoryError>;

    /// Replace `old` with `new` in the reviewer set. `new` is appended at the
    /// end of the ordered set.
    async fn swap_reviewer(
        &self,
        id: &PullRequestId,
        old: &UserId,
        new: &UserId,
    ) -> Result<SwapOutcome, RepositoryError>;

    /// Mark the pull request merged at `merged_at` unless it already is.
    async fn set_merged(
        &self,
        id: &PullRequestId,
        merged_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, RepositoryError>;

    /// Pull requests where `user_id` is currently an assigned reviewer,
    /// newest first.
    async fn assigned_to(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequestShort>, RepositoryError>;
}
