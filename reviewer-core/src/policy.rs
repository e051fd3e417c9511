//! Reviewer assignment policy.
//!
//! Pure functions: callers hand in a candidate pool that has already been
//! filtered to active teammates and sorted into canonical (ascending user ID)
//! order. The policy never looks at activity itself, but it does refuse to
//! emit the author or a duplicate even if the pool contains them.

use std::collections::HashSet;

use crate::model::UserId;

/// Maximum number of reviewers assigned when a pull request is created.
pub const MAX_INITIAL_REVIEWERS: usize = 2;

/// No eligible candidate was left after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no eligible reviewer candidate")]
pub struct NoCandidate;

/// Choose the initial reviewers for a new pull request.
///
/// Returns the first `min(MAX_INITIAL_REVIEWERS, eligible)` candidates in pool
/// order. Fails with `NoCandidate` when nobody is eligible; a pull request is
/// never created without reviewers.
pub fn select_initial_reviewers(
    author_id: &UserId,
    candidate_pool: &[UserId],
) -> Result<Vec<UserId>, NoCandidate> {
    let mut seen = HashSet::new();
    let reviewers: Vec<UserId> = candidate_pool
        .iter()
        .filter(|candidate| *candidate != author_id)
        .filter(|candidate| seen.insert(*candidate))
        .take(MAX_INITIAL_REVIEWERS)
        .cloned()
        .collect();

    if reviewers.is_empty() {
        return Err(NoCandidate);
    }
    Ok(reviewers)
}

/// Choose a replacement for `old_reviewer`.
///
/// Returns the first candidate in pool order that is neither the outgoing
/// reviewer nor already assigned, so the swapped set keeps its size and stays
/// duplicate-free.
pub fn select_replacement<'a>(
    old_reviewer: &UserId,
    current_reviewers: &[UserId],
    candidate_pool: &'a [UserId],
) -> Result<&'a UserId, NoCandidate> {
    candidate_pool
        .iter()
        .find(|candidate| {
            *candidate != old_reviewer && !current_reviewers.contains(*candidate)
        })
        .ok_or(NoCandidate)
}
