//! Pure legality check for pull request transitions.
//!
//! Given the current snapshot and what the caller wants to do, decide whether
//! the change should be applied, has already happened, or must be refused.
//! This function has no side effects; the engine performs the I/O.

use reviewer_core::{PrStatus, PullRequest, UserId};

use crate::error::ConflictReason;

/// A requested change to an existing pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent<'a> {
    Reassign { old_reviewer: &'a UserId },
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The transition is legal from the current state.
    Apply,
    /// The target state already holds; nothing to write.
    AlreadyDone,
    Reject(ConflictReason),
}

pub fn decide(snapshot: &PullRequest, intent: Intent<'_>) -> Decision {
    match (snapshot.status, intent) {
        (PrStatus::Open, Intent::Merge) => Decision::Apply,
        (PrStatus::Merged, Intent::Merge) => Decision::AlreadyDone,

        (PrStatus::Merged, Intent::Reassign { .. }) => {
            Decision::Reject(ConflictReason::PrMerged(snapshot.pull_request_id.clone()))
        }
        (PrStatus::Open, Intent::Reassign { old_reviewer }) => {
            if snapshot.is_assigned(old_reviewer) {
                Decision::Apply
            } else {
                Decision::Reject(ConflictReason::NotAssigned {
                    pull_request_id: snapshot.pull_request_id.clone(),
                    reviewer: old_reviewer.clone(),
                })
            }
        }
    }
}
