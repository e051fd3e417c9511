//! In-memory implementation of `Directory` and `PullRequestStore`.
//!
//! All state lives behind a single `RwLock`, so every primitive is one
//! critical section. State is lost on restart.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reviewer_core::{
    PrStatus, PullRequest, PullRequestId, PullRequestShort, Team, TeamMember, TeamName, User,
    UserId,
};
use tokio::sync::RwLock;

use super::{
    Directory, InsertOutcome, MergeOutcome, NewPullRequest, PullRequestStore, RepositoryError,
    SaveTeamOutcome, SwapOutcome,
};

#[derive(Default)]
struct Inner {
    teams: BTreeSet<TeamName>,
    /// Keyed by user ID; iteration order is the canonical candidate order.
    users: BTreeMap<UserId, User>,
    pull_requests: HashMap<PullRequestId, PullRequest>,
}

impl Inner {
    fn team_snapshot(&self, team_name: &TeamName) -> Team {
        let members = self
            .users
            .values()
            .filter(|u| &u.team_name == team_name)
            .map(|u| TeamMember::new(u.user_id.clone(), u.user_name.clone(), u.is_active))
            .collect();
        Team {
            team_name: team_name.clone(),
            members,
        }
    }

    fn active_teammates(&self, author: &UserId) -> Option<Vec<UserId>> {
        let team_name = &self.users.get(author)?.team_name;
        Some(
            self.users
                .values()
                .filter(|u| &u.team_name == team_name && u.is_active && &u.user_id != author)
                .map(|u| u.user_id.clone())
                .collect(),
        )
    }

    fn is_eligible(&self, author: &UserId, candidate: &UserId) -> bool {
        is_eligible(&self.users, author, candidate)
    }
}

/// Whether `candidate` may currently review a pull request by `author`.
fn is_eligible(users: &BTreeMap<UserId, User>, author: &UserId, candidate: &UserId) -> bool {
    let (Some(author), Some(candidate)) = (users.get(author), users.get(candidate)) else {
        return false;
    };
    candidate.is_active && candidate.team_name == author.team_name && candidate.user_id != author.user_id
}

/// In-memory repository.
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryRepository {
    async fn eligibility_snapshot(
        &self,
        author: &UserId,
    ) -> Result<Option<Vec<UserId>>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.active_teammates(author))
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(user_id).cloned())
    }

    async fn save_team(&self, team: &Team) -> Result<SaveTeamOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;

        let created = !inner.teams.contains(&team.team_name);
        let changed = team.members.iter().any(|m| match inner.users.get(&m.user_id) {
            Some(existing) => {
                existing.team_name != team.team_name
                    || existing.user_name != m.user_name
                    || existing.is_active != m.is_active
            }
            None => true,
        });

        if !created && !changed {
            return Ok(SaveTeamOutcome::Unchanged);
        }

        inner.teams.insert(team.team_name.clone());
        for member in &team.members {
            inner.users.insert(
                member.user_id.clone(),
                User {
                    user_id: member.user_id.clone(),
                    user_name: member.user_name.clone(),
                    team_name: team.team_name.clone(),
                    is_active: member.is_active,
                },
            );
        }

        let snapshot = inner.team_snapshot(&team.team_name);
        Ok(if created {
            SaveTeamOutcome::Created(snapshot)
        } else {
            SaveTeamOutcome::Updated(snapshot)
        })
    }

    async fn get_team(&self, team_name: &TeamName) -> Result<Option<Team>, RepositoryError> {
        let inner = self.inner.read().await;
        if !inner.teams.contains(team_name) {
            return Ok(None);
        }
        Ok(Some(inner.team_snapshot(team_name)))
    }

    async fn set_user_active(
        &self,
        user_id: &UserId,
        is_active: bool,
    ) -> Result<Option<User>, RepositoryError> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(user_id).map(|user| {
            user.is_active = is_active;
            user.clone()
        }))
    }
}

#[async_trait]
impl PullRequestStore for InMemoryRepository {
    async fn insert(
        &self,
        pull_request: NewPullRequest,
        reviewers: &[UserId],
    ) -> Result<InsertOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;

        if inner
            .pull_requests
            .contains_key(&pull_request.pull_request_id)
        {
            return Ok(InsertOutcome::AlreadyExists);
        }
        if !reviewers
            .iter()
            .all(|r| inner.is_eligible(&pull_request.author_id, r))
        {
            return Ok(InsertOutcome::StaleEligibility);
        }

        let record = PullRequest {
            pull_request_id: pull_request.pull_request_id,
            pull_request_name: pull_request.pull_request_name,
            author_id: pull_request.author_id,
            status: PrStatus::Open,
            assigned_reviewers: reviewers.to_vec(),
            created_at: pull_request.created_at,
            merged_at: None,
        };
        inner
            .pull_requests
            .insert(record.pull_request_id.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn get(&self, id: &PullRequestId) -> Result<Option<PullRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.pull_requests.get(id).cloned())
    }

    async fn swap_reviewer(
        &self,
        id: &PullRequestId,
        old: &UserId,
        new: &UserId,
    ) -> Result<SwapOutcome, RepositoryError> {
        let mut guard = self.inner.write().await;
        let Inner {
            users,
            pull_requests,
            ..
        } = &mut *guard;

        let Some(record) = pull_requests.get_mut(id) else {
            return Ok(SwapOutcome::NotFound);
        };
        if record.status.is_terminal() {
            return Ok(SwapOutcome::Merged);
        }
        if !record.is_assigned(old) {
            return Ok(SwapOutcome::NotAssigned);
        }
        if record.is_assigned(new) {
            return Ok(SwapOutcome::AlreadyAssigned);
        }
        if !is_eligible(users, &record.author_id, new) {
            return Ok(SwapOutcome::StaleEligibility);
        }

        record.assigned_reviewers.retain(|r| r != old);
        record.assigned_reviewers.push(new.clone());
        Ok(SwapOutcome::Swapped(record.clone()))
    }

    async fn set_merged(
        &self,
        id: &PullRequestId,
        merged_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.pull_requests.get_mut(id) else {
            return Ok(MergeOutcome::NotFound);
        };
        if record.status.is_terminal() {
            return Ok(MergeOutcome::AlreadyMerged(record.clone()));
        }
        record.status = PrStatus::Merged;
        record.merged_at = Some(merged_at);
        Ok(MergeOutcome::Merged(record.clone()))
    }

    async fn assigned_to(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequestShort>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut assigned: Vec<&PullRequest> = inner
            .pull_requests
            .values()
            .filter(|pr| pr.is_assigned(user_id))
            .collect();
        assigned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.pull_request_id.cmp(&b.pull_request_id))
        });
        Ok(assigned.into_iter().map(PullRequest::to_short).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn member(id: &str, active: bool) -> TeamMember {
        TeamMember::new(id, id.to_uppercase(), active)
    }

    fn new_pr(id: &str, author: &str) -> NewPullRequest {
        NewPullRequest {
            pull_request_id: PullRequestId::from(id),
            pull_request_name: format!("{} title", id),
            author_id: UserId::from(author),
            created_at: Utc::now(),
        }
    }

    async fn seeded() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.save_team(&Team::new(
            "backend",
            vec![
                member("alice", true),
                member("bob", true),
                member("carol", true),
                member("dave", false),
            ],
        ))
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_save_team_created_then_unchanged() {
        let repo = InMemoryRepository::new();
        let team = Team::new("backend", vec![member("alice", true)]);

        let first = repo.save_team(&team).await.unwrap();
        assert!(matches!(first, SaveTeamOutcome::Created(_)));

        let second = repo.save_team(&team).await.unwrap();
        assert_eq!(second, SaveTeamOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_save_team_attribute_change_is_update() {
        let repo = seeded().await;
        let outcome = repo
            .save_team(&Team::new("backend", vec![member("dave", true)]))
            .await
            .unwrap();

        let SaveTeamOutcome::Updated(team) = outcome else {
            panic!("expected Updated, got {:?}", outcome);
        };
        assert_eq!(team.members.len(), 4);
        assert!(team.members.iter().all(|m| m.is_active));
    }

    #[tokio::test]
    async fn test_save_team_moves_user_between_teams() {
        let repo = seeded().await;
        repo.save_team(&Team::new("frontend", vec![member("carol", true)]))
            .await
            .unwrap();

        let backend = repo.get_team(&TeamName::from("backend")).await.unwrap();
        let backend = backend.unwrap();
        assert!(backend.members.iter().all(|m| m.user_id.as_str() != "carol"));

        let carol = repo.get_user(&UserId::from("carol")).await.unwrap().unwrap();
        assert_eq!(carol.team_name, TeamName::from("frontend"));
    }

    #[tokio::test]
    async fn test_eligibility_snapshot_orders_and_filters() {
        let repo = seeded().await;
        let pool = repo
            .eligibility_snapshot(&UserId::from("bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool, vec![UserId::from("alice"), UserId::from("carol")]);

        let missing = repo
            .eligibility_snapshot(&UserId::from("zed"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_id() {
        let repo = seeded().await;
        let reviewers = [UserId::from("bob")];
        let first = repo.insert(new_pr("pr-1", "alice"), &reviewers).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = repo.insert(new_pr("pr-1", "alice"), &reviewers).await.unwrap();
        assert_eq!(second, InsertOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_insert_rejects_inactive_reviewer() {
        let repo = seeded().await;
        let outcome = repo
            .insert(new_pr("pr-1", "alice"), &[UserId::from("dave")])
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::StaleEligibility);
        assert!(repo.get(&PullRequestId::from("pr-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_swap_appends_replacement() {
        let repo = seeded().await;
        repo.set_user_active(&UserId::from("dave"), true).await.unwrap();
        repo.insert(
            new_pr("pr-1", "alice"),
            &[UserId::from("bob"), UserId::from("carol")],
        )
        .await
        .unwrap();

        let outcome = repo
            .swap_reviewer(
                &PullRequestId::from("pr-1"),
                &UserId::from("bob"),
                &UserId::from("dave"),
            )
            .await
            .unwrap();
        let SwapOutcome::Swapped(pr) = outcome else {
            panic!("expected Swapped, got {:?}", outcome);
        };
        assert_eq!(
            pr.assigned_reviewers,
            vec![UserId::from("carol"), UserId::from("dave")]
        );
    }

    #[tokio::test]
    async fn test_swap_rejections_leave_state_untouched() {
        let repo = seeded().await;
        let id = PullRequestId::from("pr-1");
        repo.insert(
            new_pr("pr-1", "alice"),
            &[UserId::from("bob"), UserId::from("carol")],
        )
        .await
        .unwrap();
        let before = repo.get(&id).await.unwrap();

        let not_assigned = repo
            .swap_reviewer(&id, &UserId::from("dave"), &UserId::from("alice"))
            .await
            .unwrap();
        assert_eq!(not_assigned, SwapOutcome::NotAssigned);

        let already = repo
            .swap_reviewer(&id, &UserId::from("bob"), &UserId::from("carol"))
            .await
            .unwrap();
        assert_eq!(already, SwapOutcome::AlreadyAssigned);

        let inactive = repo
            .swap_reviewer(&id, &UserId::from("bob"), &UserId::from("dave"))
            .await
            .unwrap();
        assert_eq!(inactive, SwapOutcome::StaleEligibility);

        assert_eq!(repo.get(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_set_merged_is_one_shot() {
        let repo = seeded().await;
        let id = PullRequestId::from("pr-1");
        repo.insert(new_pr("pr-1", "alice"), &[UserId::from("bob")])
            .await
            .unwrap();

        let first_at = Utc::now();
        let first = repo.set_merged(&id, first_at).await.unwrap();
        let MergeOutcome::Merged(merged) = first else {
            panic!("expected Merged, got {:?}", first);
        };
        assert_eq!(merged.merged_at, Some(first_at));

        let second = repo
            .set_merged(&id, first_at + Duration::seconds(10))
            .await
            .unwrap();
        let MergeOutcome::AlreadyMerged(again) = second else {
            panic!("expected AlreadyMerged, got {:?}", second);
        };
        assert_eq!(again.merged_at, Some(first_at));

        let swap = repo
            .swap_reviewer(&id, &UserId::from("bob"), &UserId::from("carol"))
            .await
            .unwrap();
        assert_eq!(swap, SwapOutcome::Merged);
    }

    #[tokio::test]
    async fn test_assigned_to_newest_first() {
        let repo = seeded().await;
        let now = Utc::now();
        let mut older = new_pr("pr-old", "alice");
        older.created_at = now - Duration::minutes(5);
        let mut newer = new_pr("pr-new", "alice");
        newer.created_at = now;

        repo.insert(older, &[UserId::from("bob")]).await.unwrap();
        repo.insert(newer, &[UserId::from("bob")]).await.unwrap();
        repo.insert(new_pr("pr-other", "alice"), &[UserId::from("carol")])
            .await
            .unwrap();

        let listed = repo.assigned_to(&UserId::from("bob")).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|p| p.pull_request_id.as_str()).collect();
        assert_eq!(ids, vec!["pr-new", "pr-old"]);
    }
}
