//! Pull request operations for the SQLite repository.
//!
//! Reviewer sets live in `pull_request_reviewers` with an explicit `position`
//! column so that the assignment order survives a reload.

use chrono::{DateTime, Utc};
use reviewer_core::{PrStatus, PullRequest, PullRequestId, PullRequestShort, UserId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{error, warn};

use super::super::{InsertOutcome, MergeOutcome, NewPullRequest, RepositoryError, SwapOutcome};
use super::sql_error;

pub(super) fn insert_sync(
    conn: &mut Connection,
    pull_request: &NewPullRequest,
    reviewers: &[UserId],
) -> Result<InsertOutcome, RepositoryError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_error("insert"))?;
    let id = pull_request.pull_request_id.as_str();

    let exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM pull_requests WHERE pull_request_id = ?1)",
            params![id],
            |row| row.get(0),
        )
        .map_err(sql_error("insert"))?;
    if exists {
        return Ok(InsertOutcome::AlreadyExists);
    }

    for reviewer in reviewers {
        if !is_eligible(&tx, &pull_request.author_id, reviewer, "insert")? {
            return Ok(InsertOutcome::StaleEligibility);
        }
    }

    tx.execute(
        "INSERT INTO pull_requests
             (pull_request_id, pull_request_name, author_id, status, created_at, merged_at)
         VALUES (?1, ?2, ?3, 'OPEN', ?4, NULL)",
        params![
            id,
            pull_request.pull_request_name,
            pull_request.author_id.as_str(),
            pull_request.created_at
        ],
    )
    .map_err(sql_error("insert"))?;

    for (position, reviewer) in reviewers.iter().enumerate() {
        tx.execute(
            "INSERT INTO pull_request_reviewers (pull_request_id, user_id, position)
             VALUES (?1, ?2, ?3)",
            params![id, reviewer.as_str(), position as i64],
        )
        .map_err(sql_error("insert"))?;
    }

    let record = load_in(&tx, &pull_request.pull_request_id, "insert")?
        .ok_or_else(|| RepositoryError::corruption("pull request row after insert"))?;
    tx.commit().map_err(sql_error("insert"))?;
    Ok(InsertOutcome::Inserted(record))
}

pub(super) fn load_sync(
    conn: &mut Connection,
    id: &PullRequestId,
) -> Result<Option<PullRequest>, RepositoryError> {
    // Row and reviewer set must come from the same snapshot.
    let tx = conn.transaction().map_err(sql_error("get"))?;
    let record = load_in(&tx, id, "get")?;
    tx.commit().map_err(sql_error("get"))?;
    Ok(record)
}

pub(super) fn swap_reviewer_sync(
    conn: &mut Connection,
    id: &PullRequestId,
    old: &UserId,
    new: &UserId,
) -> Result<SwapOutcome, RepositoryError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_error("swap_reviewer"))?;

    let Some(record) = load_in(&tx, id, "swap_reviewer")? else {
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
    if !is_eligible(&tx, &record.author_id, new, "swap_reviewer")? {
        return Ok(SwapOutcome::StaleEligibility);
    }

    tx.execute(
        "DELETE FROM pull_request_reviewers WHERE pull_request_id = ?1 AND user_id = ?2",
        params![id.as_str(), old.as_str()],
    )
    .map_err(sql_error("swap_reviewer"))?;
    tx.execute(
        "INSERT INTO pull_request_reviewers (pull_request_id, user_id, position)
         SELECT ?1, ?2, COALESCE(MAX(position), -1) + 1
         FROM pull_request_reviewers WHERE pull_request_id = ?1",
        params![id.as_str(), new.as_str()],
    )
    .map_err(sql_error("swap_reviewer"))?;

    let updated = load_in(&tx, id, "swap_reviewer")?
        .ok_or_else(|| RepositoryError::corruption("pull request row after swap"))?;
    tx.commit().map_err(sql_error("swap_reviewer"))?;
    Ok(SwapOutcome::Swapped(updated))
}

pub(super) fn set_merged_sync(
    conn: &mut Connection,
    id: &PullRequestId,
    merged_at: DateTime<Utc>,
) -> Result<MergeOutcome, RepositoryError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_error("set_merged"))?;

    let Some(record) = load_in(&tx, id, "set_merged")? else {
        return Ok(MergeOutcome::NotFound);
    };
    if record.status.is_terminal() {
        return Ok(MergeOutcome::AlreadyMerged(record));
    }

    tx.execute(
        "UPDATE pull_requests SET status = 'MERGED', merged_at = ?1
         WHERE pull_request_id = ?2 AND status = 'OPEN'",
        params![merged_at, id.as_str()],
    )
    .map_err(sql_error("set_merged"))?;

    let merged = load_in(&tx, id, "set_merged")?
        .ok_or_else(|| RepositoryError::corruption("pull request row after merge"))?;
    tx.commit().map_err(sql_error("set_merged"))?;
    Ok(MergeOutcome::Merged(merged))
}

pub(super) fn assigned_to_sync(
    conn: &mut Connection,
    user_id: &UserId,
) -> Result<Vec<PullRequestShort>, RepositoryError> {
    let mut stmt = conn
        .prepare(
            "SELECT p.pull_request_id, p.pull_request_name, p.author_id, p.status, p.created_at
             FROM pull_requests p
             JOIN pull_request_reviewers r ON r.pull_request_id = p.pull_request_id
             WHERE r.user_id = ?1",
        )
        .map_err(sql_error("assigned_to"))?;

    let rows = stmt
        .query_map(params![user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, DateTime<Utc>>(4)?,
            ))
        })
        .map_err(sql_error("assigned_to"))?;

    let mut assigned = Vec::new();
    for row in rows {
        // A corrupt row must not hide the rest of the reviewer's queue.
        let (id, name, author, status, created_at) = match row {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read assigned pull request row from SQLite: {}", e);
                continue;
            }
        };
        let status = match status.parse::<PrStatus>() {
            Ok(status) => status,
            Err(e) => {
                warn!("Skipping pull request {} with corrupt status: {}", id, e);
                continue;
            }
        };
        assigned.push((
            created_at,
            PullRequestShort {
                pull_request_id: PullRequestId(id),
                pull_request_name: name,
                author_id: UserId(author),
                status,
            },
        ));
    }

    assigned.sort_by(|(a_at, a), (b_at, b)| {
        b_at.cmp(a_at)
            .then_with(|| a.pull_request_id.cmp(&b.pull_request_id))
    });
    Ok(assigned.into_iter().map(|(_, short)| short).collect())
}

/// Load a full pull request record, reviewers in assignment order.
fn load_in(
    conn: &Connection,
    id: &PullRequestId,
    operation: &'static str,
) -> Result<Option<PullRequest>, RepositoryError> {
    let row = conn
        .query_row(
            "SELECT pull_request_name, author_id, status, created_at, merged_at
             FROM pull_requests WHERE pull_request_id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                    row.get::<_, Option<DateTime<Utc>>>(4)?,
                ))
            },
        )
        .optional()
        .map_err(sql_error(operation))?;

    let Some((name, author, status, created_at, merged_at)) = row else {
        return Ok(None);
    };
    let status: PrStatus = status
        .parse()
        .map_err(|_| RepositoryError::corruption("pull request status"))?;

    let mut stmt = conn
        .prepare(
            "SELECT user_id FROM pull_request_reviewers
             WHERE pull_request_id = ?1 ORDER BY position",
        )
        .map_err(sql_error(operation))?;
    let reviewers = stmt
        .query_map(params![id.as_str()], |row| row.get::<_, String>(0))
        .map_err(sql_error(operation))?
        .map(|r| r.map(UserId))
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_error(operation))?;

    Ok(Some(PullRequest {
        pull_request_id: id.clone(),
        pull_request_name: name,
        author_id: UserId(author),
        status,
        assigned_reviewers: reviewers,
        created_at,
        merged_at,
    }))
}

/// Whether `candidate` is currently an active teammate of `author`.
fn is_eligible(
    conn: &Connection,
    author: &UserId,
    candidate: &UserId,
    operation: &'static str,
) -> Result<bool, RepositoryError> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM users a JOIN users c ON c.team_name = a.team_name
             WHERE a.user_id = ?1 AND c.user_id = ?2
               AND c.is_active = 1 AND c.user_id != a.user_id
         )",
        params![author.as_str(), candidate.as_str()],
        |row| row.get(0),
    )
    .map_err(sql_error(operation))
}
