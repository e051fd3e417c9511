//! End-to-end workflow scenarios, run against both repositories.

use std::collections::HashSet;
use std::sync::Arc;

use reviewer_core::{PrStatus, PullRequestId, Team, TeamMember, TeamName, UserId};
use reviewer_engine::{
    CreatePullRequest, ErrorKind, InMemoryRepository, SqliteRepository, WorkflowEngine,
};

fn engines() -> Vec<(&'static str, WorkflowEngine)> {
    vec![
        (
            "memory",
            WorkflowEngine::with_repository(Arc::new(InMemoryRepository::new())),
        ),
        (
            "sqlite",
            WorkflowEngine::with_repository(Arc::new(SqliteRepository::new_in_memory().unwrap())),
        ),
    ]
}

fn team(name: &str, members: &[(&str, bool)]) -> Team {
    Team::new(
        name,
        members
            .iter()
            .map(|(id, active)| TeamMember::new(*id, id.to_uppercase(), *active))
            .collect(),
    )
}

fn create(id: &str, author: &str) -> CreatePullRequest {
    CreatePullRequest {
        pull_request_id: PullRequestId::from(id),
        pull_request_name: format!("{} title", id),
        author_id: UserId::from(author),
    }
}

fn ids(names: &[&str]) -> Vec<UserId> {
    names.iter().map(|n| UserId::from(*n)).collect()
}

#[tokio::test]
async fn test_create_assigns_first_two_active_teammates() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true)],
            ))
            .await
            .unwrap();

        let pr = engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();
        assert_eq!(pr.assigned_reviewers, ids(&["bob", "carol"]), "{}", backend);
        assert_eq!(pr.status, PrStatus::Open, "{}", backend);
        assert!(pr.merged_at.is_none(), "{}", backend);
    }
}

#[tokio::test]
async fn test_create_with_single_eligible_teammate() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", false)],
            ))
            .await
            .unwrap();

        let pr = engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();
        assert_eq!(pr.assigned_reviewers, ids(&["bob"]), "{}", backend);
    }
}

#[tokio::test]
async fn test_create_without_candidates_fails_and_stores_nothing() {
    for (backend, engine) in engines() {
        engine
            .save_team(team("solo", &[("alice", true), ("bob", false)]))
            .await
            .unwrap();

        let err = engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_CANDIDATE", "{}", backend);
        assert_eq!(err.kind(), ErrorKind::Conflict, "{}", backend);

        let lookup = engine
            .get_pull_request(&PullRequestId::from("pr-1"))
            .await
            .unwrap_err();
        assert_eq!(lookup.code(), "PR_NOT_FOUND", "{}", backend);
    }
}

#[tokio::test]
async fn test_create_duplicate_id() {
    for (backend, engine) in engines() {
        engine
            .save_team(team("backend", &[("alice", true), ("bob", true)]))
            .await
            .unwrap();
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let err = engine
            .create_pull_request(create("pr-1", "bob"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PR_EXISTS", "{}", backend);
        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{}", backend);
    }
}

#[tokio::test]
async fn test_reassign_without_spare_candidate_leaves_reviewers_unchanged() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true)],
            ))
            .await
            .unwrap();
        let id = PullRequestId::from("pr-1");
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let err = engine
            .reassign_reviewer(&id, &UserId::from("bob"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_CANDIDATE", "{}", backend);

        let pr = engine.get_pull_request(&id).await.unwrap();
        assert_eq!(pr.assigned_reviewers, ids(&["bob", "carol"]), "{}", backend);
    }
}

#[tokio::test]
async fn test_reassign_picks_next_teammate_and_appends() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true), ("dave", true)],
            ))
            .await
            .unwrap();
        let id = PullRequestId::from("pr-1");
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let reassignment = engine
            .reassign_reviewer(&id, &UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(reassignment.replaced_by, UserId::from("dave"), "{}", backend);
        assert_eq!(
            reassignment.pull_request.assigned_reviewers,
            ids(&["carol", "dave"]),
            "{}",
            backend
        );
    }
}

#[tokio::test]
async fn test_reassign_unassigned_reviewer() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true), ("dave", true)],
            ))
            .await
            .unwrap();
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let err = engine
            .reassign_reviewer(&PullRequestId::from("pr-1"), &UserId::from("dave"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_ASSIGNED", "{}", backend);

        let missing = engine
            .reassign_reviewer(&PullRequestId::from("pr-9"), &UserId::from("bob"))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), "PR_NOT_FOUND", "{}", backend);
    }
}

#[tokio::test]
async fn test_merge_then_reassign_is_rejected() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true), ("dave", true)],
            ))
            .await
            .unwrap();
        let id = PullRequestId::from("pr-1");
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let merged = engine.merge_pull_request(&id).await.unwrap();
        assert_eq!(merged.status, PrStatus::Merged, "{}", backend);
        assert!(merged.merged_at.is_some(), "{}", backend);

        let err = engine
            .reassign_reviewer(&id, &UserId::from("bob"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PR_MERGED", "{}", backend);

        let after = engine.get_pull_request(&id).await.unwrap();
        assert_eq!(after, merged, "{}", backend);
    }
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    for (backend, engine) in engines() {
        engine
            .save_team(team("backend", &[("alice", true), ("bob", true)]))
            .await
            .unwrap();
        let id = PullRequestId::from("pr-1");
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let first = engine.merge_pull_request(&id).await.unwrap();
        let second = engine.merge_pull_request(&id).await.unwrap();
        assert_eq!(first, second, "{}", backend);

        let missing = engine
            .merge_pull_request(&PullRequestId::from("pr-9"))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), "PR_NOT_FOUND", "{}", backend);
    }
}

#[tokio::test]
async fn test_save_team_twice_then_extend() {
    for (backend, engine) in engines() {
        let initial = team("backend", &[("alice", true), ("bob", true)]);

        let saved = engine.save_team(initial.clone()).await.unwrap();
        assert!(saved.created, "{}", backend);

        let err = engine.save_team(initial.clone()).await.unwrap_err();
        assert_eq!(err.code(), "TEAM_EXISTS", "{}", backend);

        let extended = engine
            .save_team(team("backend", &[("carol", true)]))
            .await
            .unwrap();
        assert!(!extended.created, "{}", backend);
        let members: HashSet<&UserId> =
            extended.team.members.iter().map(|m| &m.user_id).collect();
        for member in &initial.members {
            assert!(members.contains(&member.user_id), "{}", backend);
        }
        assert!(members.contains(&UserId::from("carol")), "{}", backend);
    }
}

#[tokio::test]
async fn test_get_team_lists_members_in_order() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("carol", true), ("alice", true), ("bob", false)],
            ))
            .await
            .unwrap();

        let fetched = engine.get_team(&TeamName::from("backend")).await.unwrap();
        let order: Vec<&str> = fetched.members.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(order, vec!["alice", "bob", "carol"], "{}", backend);
        assert!(!fetched.members[1].is_active, "{}", backend);
    }
}

#[tokio::test]
async fn test_deactivation_keeps_existing_assignments() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true), ("dave", true)],
            ))
            .await
            .unwrap();
        let id = PullRequestId::from("pr-1");
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();

        let bob = engine
            .set_user_active(&UserId::from("bob"), false)
            .await
            .unwrap();
        assert!(!bob.is_active, "{}", backend);

        // Bob keeps his existing review but is skipped for new ones.
        let pr = engine.get_pull_request(&id).await.unwrap();
        assert!(pr.is_assigned(&UserId::from("bob")), "{}", backend);

        let second = engine
            .create_pull_request(create("pr-2", "alice"))
            .await
            .unwrap();
        assert_eq!(
            second.assigned_reviewers,
            ids(&["carol", "dave"]),
            "{}",
            backend
        );

        let missing = engine
            .set_user_active(&UserId::from("zed"), false)
            .await
            .unwrap_err();
        assert_eq!(missing.code(), "USER_NOT_FOUND", "{}", backend);
    }
}

#[tokio::test]
async fn test_user_reviews_include_merged() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true)],
            ))
            .await
            .unwrap();
        engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();
        engine
            .create_pull_request(create("pr-2", "carol"))
            .await
            .unwrap();
        engine
            .merge_pull_request(&PullRequestId::from("pr-1"))
            .await
            .unwrap();

        let reviews = engine
            .get_user_reviews(&UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(reviews.user_id, UserId::from("bob"), "{}", backend);
        let mut listed: Vec<(&str, PrStatus)> = reviews
            .pull_requests
            .iter()
            .map(|p| (p.pull_request_id.as_str(), p.status))
            .collect();
        listed.sort_by_key(|(id, _)| *id);
        assert_eq!(
            listed,
            vec![("pr-1", PrStatus::Merged), ("pr-2", PrStatus::Open)],
            "{}",
            backend
        );

        // Alice authored pr-1 and reviews pr-2 only.
        let alice = engine
            .get_user_reviews(&UserId::from("alice"))
            .await
            .unwrap();
        let alice_ids: Vec<&str> = alice
            .pull_requests
            .iter()
            .map(|p| p.pull_request_id.as_str())
            .collect();
        assert_eq!(alice_ids, vec!["pr-2"], "{}", backend);
    }
}

#[tokio::test]
async fn test_author_moved_to_other_team_uses_new_team() {
    for (backend, engine) in engines() {
        engine
            .save_team(team(
                "backend",
                &[("alice", true), ("bob", true), ("carol", true)],
            ))
            .await
            .unwrap();
        engine
            .save_team(team("frontend", &[("erin", true), ("frank", true)]))
            .await
            .unwrap();
        engine
            .save_team(team("frontend", &[("alice", true)]))
            .await
            .unwrap();

        let pr = engine
            .create_pull_request(create("pr-1", "alice"))
            .await
            .unwrap();
        assert_eq!(pr.assigned_reviewers, ids(&["erin", "frank"]), "{}", backend);
    }
}
