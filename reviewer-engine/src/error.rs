//! Typed failures returned by the workflow engine.
//!
//! Every failure that reaches a caller is one of four kinds. Storage problems
//! are wrapped as `Internal`; everything else is a business-rule outcome and is
//! guaranteed not to have mutated state.

use reviewer_core::{PullRequestId, TeamName, UserId};
use serde::Serialize;
use thiserror::Error;

use crate::repository::RepositoryError;

/// Coarse classification used to pick a process exit status or transport code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    AlreadyExists,
    Internal,
}

/// The entity a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Missing {
    #[error("pull request {0} not found")]
    PullRequest(PullRequestId),
    #[error("author {0} not found")]
    Author(UserId),
    #[error("user {0} not found")]
    User(UserId),
    #[error("team {0} not found")]
    Team(TeamName),
}

/// Why a state transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("pull request {0} is already merged")]
    PrMerged(PullRequestId),
    #[error("{reviewer} is not assigned to pull request {pull_request_id}")]
    NotAssigned {
        pull_request_id: PullRequestId,
        reviewer: UserId,
    },
    #[error("no active replacement candidate in team")]
    NoCandidate,
    #[error("team {0} already exists with identical members")]
    TeamUnchanged(TeamName),
    #[error("user {0} appears more than once in the submitted team")]
    DuplicateMember(UserId),
    /// A concurrent change invalidated the decision between read and write.
    #[error("pull request {0} changed concurrently; retry the request")]
    StateChanged(PullRequestId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    NotFound(#[from] Missing),
    #[error(transparent)]
    Conflict(#[from] ConflictReason),
    #[error("pull request {0} already exists")]
    AlreadyExists(PullRequestId),
    #[error("internal error: {0}")]
    Internal(#[from] RepositoryError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(Missing::PullRequest(_)) => "PR_NOT_FOUND",
            Self::NotFound(Missing::Author(_)) => "AUTHOR_NOT_FOUND",
            Self::NotFound(Missing::User(_)) => "USER_NOT_FOUND",
            Self::NotFound(Missing::Team(_)) => "TEAM_NOT_FOUND",
            Self::Conflict(ConflictReason::PrMerged(_)) => "PR_MERGED",
            Self::Conflict(ConflictReason::NotAssigned { .. }) => "NOT_ASSIGNED",
            Self::Conflict(ConflictReason::NoCandidate) => "NO_CANDIDATE",
            Self::Conflict(ConflictReason::TeamUnchanged(_)) => "TEAM_EXISTS",
            Self::Conflict(ConflictReason::DuplicateMember(_)) => "DUPLICATE_MEMBER",
            Self::Conflict(ConflictReason::StateChanged(_)) => "STATE_CHANGED",
            Self::AlreadyExists(_) => "PR_EXISTS",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
