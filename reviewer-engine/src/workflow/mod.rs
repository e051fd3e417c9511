//! The workflow engine: create, reassign and merge pull requests, plus the
//! team and user administration that feeds reviewer selection.
//!
//! Operations on one pull request are serialized through a per-id async mutex
//! held across read, decide and write. The store primitives re-check their
//! preconditions at write time as well, so a writer in another process (or a
//! concurrent directory change) surfaces as a typed conflict instead of a
//! corrupted reviewer set.

pub mod transition;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use reviewer_core::{
    select_initial_reviewers, select_replacement, PullRequest, PullRequestId, PullRequestShort,
    Team, TeamName, User, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ConflictReason, Missing, WorkflowError};
use crate::repository::{
    Directory, InsertOutcome, MergeOutcome, NewPullRequest, PullRequestStore, RepositoryError,
    SaveTeamOutcome, SwapOutcome,
};
use transition::{decide, Decision, Intent};

/// Validated request to open a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePullRequest {
    pub pull_request_id: PullRequestId,
    pub pull_request_name: String,
    pub author_id: UserId,
}

/// Result of a successful reassignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub pull_request: PullRequest,
    pub replaced_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedTeam {
    pub created: bool,
    pub team: Team,
}

/// Pull requests a user currently reviews, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReviews {
    pub user_id: UserId,
    pub pull_requests: Vec<PullRequestShort>,
}

pub struct WorkflowEngine {
    directory: Arc<dyn Directory>,
    store: Arc<dyn PullRequestStore>,
    /// Per-pull-request locks to serialize create/reassign/merge on one id.
    pr_locks: RwLock<HashMap<PullRequestId, Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(directory: Arc<dyn Directory>, store: Arc<dyn PullRequestStore>) -> Self {
        Self {
            directory,
            store,
            pr_locks: RwLock::new(HashMap::new()),
        }
    }

    /// Build an engine whose directory and store are the same repository.
    pub fn with_repository<R>(repository: Arc<R>) -> Self
    where
        R: Directory + PullRequestStore + 'static,
    {
        Self::new(repository.clone(), repository)
    }

    async fn get_or_create_pr_lock(&self, id: &PullRequestId) -> Arc<Mutex<()>> {
        {
            let locks = self.pr_locks.read().await;
            if let Some(lock) = locks.get(id) {
                return lock.clone();
            }
        }

        // Double-check under the write lock.
        let mut locks = self.pr_locks.write().await;
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry for `id` once no other task holds or waits on it.
    ///
    /// Every holder obtains its handle through the map, so under the write
    /// lock a strong count of two (map plus `pr_lock`) means nobody else can.
    async fn release_pr_lock(&self, id: &PullRequestId, pr_lock: Arc<Mutex<()>>) {
        let mut locks = self.pr_locks.write().await;
        let only_holder = locks
            .get(id)
            .is_some_and(|held| Arc::ptr_eq(held, &pr_lock) && Arc::strong_count(&pr_lock) == 2);
        if only_holder {
            locks.remove(id);
        }
    }

    /// Run `operation` while holding the per-pull-request lock for `id`.
    async fn with_pr_lock<T, F, Fut>(&self, id: &PullRequestId, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let pr_lock = self.get_or_create_pr_lock(id).await;
        let result = {
            let _guard = pr_lock.lock().await;
            operation().await
        };
        self.release_pr_lock(id, pr_lock).await;
        result
    }

    // =========================================================================
    // Pull request lifecycle
    // =========================================================================

    /// Open a pull request and assign up to two active teammates of the
    /// author as reviewers.
    pub async fn create_pull_request(
        &self,
        request: CreatePullRequest,
    ) -> Result<PullRequest, WorkflowError> {
        let id = request.pull_request_id.clone();
        self.with_pr_lock(&id, || self.create_locked(request)).await
    }

    async fn create_locked(&self, request: CreatePullRequest) -> Result<PullRequest, WorkflowError> {
        let id = request.pull_request_id.clone();
        if self.store.get(&id).await?.is_some() {
            return Err(WorkflowError::AlreadyExists(id));
        }

        let candidates = self
            .directory
            .eligibility_snapshot(&request.author_id)
            .await?
            .ok_or_else(|| Missing::Author(request.author_id.clone()))?;

        let reviewers = select_initial_reviewers(&request.author_id, &candidates).map_err(|_| {
            warn!(pr_id = %id, author = %request.author_id, "No eligible reviewers for new pull request");
            ConflictReason::NoCandidate
        })?;

        let outcome = self
            .store
            .insert(
                NewPullRequest {
                    pull_request_id: id.clone(),
                    pull_request_name: request.pull_request_name,
                    author_id: request.author_id,
                    created_at: Utc::now(),
                },
                &reviewers,
            )
            .await?;

        match outcome {
            InsertOutcome::Inserted(pull_request) => {
                info!(
                    pr_id = %id,
                    reviewers = ?pull_request.assigned_reviewers,
                    "Created pull request"
                );
                Ok(pull_request)
            }
            InsertOutcome::AlreadyExists => Err(WorkflowError::AlreadyExists(id)),
            InsertOutcome::StaleEligibility => {
                warn!(pr_id = %id, "Reviewer eligibility changed during create");
                Err(ConflictReason::StateChanged(id).into())
            }
        }
    }

    /// Replace `old_reviewer` with the first eligible teammate of the author
    /// who is not already assigned.
    pub async fn reassign_reviewer(
        &self,
        id: &PullRequestId,
        old_reviewer: &UserId,
    ) -> Result<Reassignment, WorkflowError> {
        self.with_pr_lock(id, || self.reassign_locked(id, old_reviewer))
            .await
    }

    async fn reassign_locked(
        &self,
        id: &PullRequestId,
        old_reviewer: &UserId,
    ) -> Result<Reassignment, WorkflowError> {
        let snapshot = self.load(id).await?;
        match decide(&snapshot, Intent::Reassign { old_reviewer }) {
            Decision::Apply => {}
            Decision::Reject(reason) => {
                debug!(pr_id = %id, old_reviewer = %old_reviewer, "Reassignment rejected: {}", reason);
                return Err(reason.into());
            }
            Decision::AlreadyDone => {
                return Err(ConflictReason::StateChanged(id.clone()).into());
            }
        }

        let candidates = self
            .directory
            .eligibility_snapshot(&snapshot.author_id)
            .await?
            .ok_or(RepositoryError::corruption("author of pull request"))?;

        let replacement =
            select_replacement(old_reviewer, &snapshot.assigned_reviewers, &candidates)
                .map_err(|_| ConflictReason::NoCandidate)?
                .clone();

        match self
            .store
            .swap_reviewer(id, old_reviewer, &replacement)
            .await?
        {
            SwapOutcome::Swapped(pull_request) => {
                info!(
                    pr_id = %id,
                    old_reviewer = %old_reviewer,
                    new_reviewer = %replacement,
                    "Reassigned reviewer"
                );
                Ok(Reassignment {
                    pull_request,
                    replaced_by: replacement,
                })
            }
            SwapOutcome::NotFound => Err(Missing::PullRequest(id.clone()).into()),
            SwapOutcome::Merged => Err(ConflictReason::PrMerged(id.clone()).into()),
            SwapOutcome::NotAssigned => Err(ConflictReason::NotAssigned {
                pull_request_id: id.clone(),
                reviewer: old_reviewer.clone(),
            }
            .into()),
            SwapOutcome::AlreadyAssigned | SwapOutcome::StaleEligibility => {
                warn!(pr_id = %id, new_reviewer = %replacement, "Reviewer set changed during reassign");
                Err(ConflictReason::StateChanged(id.clone()).into())
            }
        }
    }

    /// Mark the pull request merged. Merging twice returns the first merge's
    /// snapshot unchanged.
    pub async fn merge_pull_request(
        &self,
        id: &PullRequestId,
    ) -> Result<PullRequest, WorkflowError> {
        self.with_pr_lock(id, || self.merge_locked(id)).await
    }

    async fn merge_locked(&self, id: &PullRequestId) -> Result<PullRequest, WorkflowError> {
        let snapshot = self.load(id).await?;
        match decide(&snapshot, Intent::Merge) {
            Decision::Apply => {}
            Decision::AlreadyDone => {
                debug!(pr_id = %id, "Pull request already merged");
                return Ok(snapshot);
            }
            Decision::Reject(reason) => return Err(reason.into()),
        }

        match self.store.set_merged(id, Utc::now()).await? {
            MergeOutcome::Merged(pull_request) => {
                info!(pr_id = %id, "Merged pull request");
                Ok(pull_request)
            }
            MergeOutcome::AlreadyMerged(pull_request) => Ok(pull_request),
            MergeOutcome::NotFound => Err(Missing::PullRequest(id.clone()).into()),
        }
    }

    pub async fn get_pull_request(&self, id: &PullRequestId) -> Result<PullRequest, WorkflowError> {
        self.load(id).await
    }

    async fn load(&self, id: &PullRequestId) -> Result<PullRequest, WorkflowError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Missing::PullRequest(id.clone()).into())
    }

    // =========================================================================
    // Teams and users
    // =========================================================================

    /// Create a team or merge new and changed members into it.
    pub async fn save_team(&self, team: Team) -> Result<SavedTeam, WorkflowError> {
        if let Some(duplicate) = team.duplicate_member() {
            return Err(ConflictReason::DuplicateMember(duplicate.clone()).into());
        }

        match self.directory.save_team(&team).await? {
            SaveTeamOutcome::Created(team) => {
                info!(team = %team.team_name, members = team.members.len(), "Created team");
                Ok(SavedTeam {
                    created: true,
                    team,
                })
            }
            SaveTeamOutcome::Updated(team) => {
                info!(team = %team.team_name, members = team.members.len(), "Updated team");
                Ok(SavedTeam {
                    created: false,
                    team,
                })
            }
            SaveTeamOutcome::Unchanged => {
                Err(ConflictReason::TeamUnchanged(team.team_name).into())
            }
        }
    }

    pub async fn get_team(&self, team_name: &TeamName) -> Result<Team, WorkflowError> {
        self.directory
            .get_team(team_name)
            .await?
            .ok_or_else(|| Missing::Team(team_name.clone()).into())
    }

    /// Existing reviewer assignments are kept when a user is deactivated.
    pub async fn set_user_active(
        &self,
        user_id: &UserId,
        is_active: bool,
    ) -> Result<User, WorkflowError> {
        let user = self
            .directory
            .set_user_active(user_id, is_active)
            .await?
            .ok_or_else(|| Missing::User(user_id.clone()))?;
        info!(user_id = %user_id, is_active, "Set user activity");
        Ok(user)
    }

    pub async fn get_user_reviews(&self, user_id: &UserId) -> Result<UserReviews, WorkflowError> {
        let user = self
            .directory
            .get_user(user_id)
            .await?
            .ok_or_else(|| Missing::User(user_id.clone()))?;
        let pull_requests = self.store.assigned_to(user_id).await?;
        Ok(UserReviews {
            user_id: user.user_id,
            pull_requests,
        })
    }
}
