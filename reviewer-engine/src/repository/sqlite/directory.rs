//! Team and user operations for the SQLite repository.

use reviewer_core::{Team, TeamMember, TeamName, User, UserId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::super::{RepositoryError, SaveTeamOutcome};
use super::sql_error;

pub(super) fn eligibility_snapshot_sync(
    conn: &mut Connection,
    author: &UserId,
) -> Result<Option<Vec<UserId>>, RepositoryError> {
    // Both reads happen in one read transaction so they see the same snapshot.
    let tx = conn
        .transaction()
        .map_err(sql_error("eligibility_snapshot"))?;

    let team_name: Option<String> = tx
        .query_row(
            "SELECT team_name FROM users WHERE user_id = ?1",
            params![author.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_error("eligibility_snapshot"))?;

    let Some(team_name) = team_name else {
        return Ok(None);
    };

    let candidates = {
        let mut stmt = tx
            .prepare(
                "SELECT user_id FROM users
                 WHERE team_name = ?1 AND is_active = 1 AND user_id != ?2
                 ORDER BY user_id",
            )
            .map_err(sql_error("eligibility_snapshot"))?;
        let rows = stmt
            .query_map(params![team_name, author.as_str()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(sql_error("eligibility_snapshot"))?;
        rows.map(|r| r.map(UserId))
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_error("eligibility_snapshot"))?
    };

    tx.commit().map_err(sql_error("eligibility_snapshot"))?;
    Ok(Some(candidates))
}

pub(super) fn get_user_sync(
    conn: &mut Connection,
    user_id: &UserId,
) -> Result<Option<User>, RepositoryError> {
    conn.query_row(
        "SELECT user_id, user_name, team_name, is_active FROM users WHERE user_id = ?1",
        params![user_id.as_str()],
        user_from_row,
    )
    .optional()
    .map_err(sql_error("get_user"))
}

pub(super) fn save_team_sync(
    conn: &mut Connection,
    team: &Team,
) -> Result<SaveTeamOutcome, RepositoryError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(sql_error("save_team"))?;
    let team_name = team.team_name.as_str();

    let exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM teams WHERE team_name = ?1)",
            params![team_name],
            |row| row.get(0),
        )
        .map_err(sql_error("save_team"))?;

    let mut changed = false;
    for member in &team.members {
        let existing: Option<(String, String, bool)> = tx
            .query_row(
                "SELECT user_name, team_name, is_active FROM users WHERE user_id = ?1",
                params![member.user_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(sql_error("save_team"))?;

        let same = existing.is_some_and(|(user_name, current_team, is_active)| {
            user_name == member.user_name
                && current_team == team_name
                && is_active == member.is_active
        });
        if !same {
            changed = true;
            break;
        }
    }

    if exists && !changed {
        // Dropping the transaction rolls it back; nothing was written.
        return Ok(SaveTeamOutcome::Unchanged);
    }

    if !exists {
        tx.execute(
            "INSERT INTO teams (team_name) VALUES (?1)",
            params![team_name],
        )
        .map_err(sql_error("save_team"))?;
    }

    for member in &team.members {
        tx.execute(
            "INSERT INTO users (user_id, user_name, team_name, is_active)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 user_name = excluded.user_name,
                 team_name = excluded.team_name,
                 is_active = excluded.is_active",
            params![
                member.user_id.as_str(),
                member.user_name,
                team_name,
                member.is_active
            ],
        )
        .map_err(sql_error("save_team"))?;
    }

    let snapshot = team_snapshot(&tx, &team.team_name)?;
    tx.commit().map_err(sql_error("save_team"))?;

    Ok(if exists {
        SaveTeamOutcome::Updated(snapshot)
    } else {
        SaveTeamOutcome::Created(snapshot)
    })
}

pub(super) fn get_team_sync(
    conn: &mut Connection,
    team_name: &TeamName,
) -> Result<Option<Team>, RepositoryError> {
    let tx = conn.transaction().map_err(sql_error("get_team"))?;

    let exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM teams WHERE team_name = ?1)",
            params![team_name.as_str()],
            |row| row.get(0),
        )
        .map_err(sql_error("get_team"))?;
    if !exists {
        return Ok(None);
    }

    let team = team_snapshot(&tx, team_name)?;
    tx.commit().map_err(sql_error("get_team"))?;
    Ok(Some(team))
}

pub(super) fn set_user_active_sync(
    conn: &mut Connection,
    user_id: &UserId,
    is_active: bool,
) -> Result<Option<User>, RepositoryError> {
    conn.query_row(
        "UPDATE users SET is_active = ?1 WHERE user_id = ?2
         RETURNING user_id, user_name, team_name, is_active",
        params![is_active, user_id.as_str()],
        user_from_row,
    )
    .optional()
    .map_err(sql_error("set_user_active"))
}

/// Members of `team_name` in ascending user ID order.
fn team_snapshot(conn: &Connection, team_name: &TeamName) -> Result<Team, RepositoryError> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, user_name, is_active FROM users
             WHERE team_name = ?1 ORDER BY user_id",
        )
        .map_err(sql_error("team_snapshot"))?;
    let rows = stmt
        .query_map(params![team_name.as_str()], |row| {
            Ok(TeamMember {
                user_id: UserId(row.get(0)?),
                user_name: row.get(1)?,
                is_active: row.get(2)?,
            })
        })
        .map_err(sql_error("team_snapshot"))?;
    let members = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_error("team_snapshot"))?;

    Ok(Team {
        team_name: team_name.clone(),
        members,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: UserId(row.get(0)?),
        user_name: row.get(1)?,
        team_name: TeamName(row.get(2)?),
        is_active: row.get(3)?,
    })
}
