//! Reward progress rows, one per (user, reward).

use super::store::{opt_ts_from_sql, ts_from_sql, ts_to_sql};
use crate::error::EngineResult;
use crate::models::{Amount, RewardProgress, UserId};
use crate::rewards::progress::progress_percent;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

const PROGRESS_COLUMNS: &str = "user_id, reward_id, omset_left, omset_right, total_omset, \
                                is_completed, is_claimed, started_at, expires_at, last_reset_at";

fn row_to_progress(row: &Row) -> rusqlite::Result<RewardProgress> {
    let started_at: String = row.get(7)?;
    Ok(RewardProgress {
        user_id: row.get(0)?,
        reward_id: row.get(1)?,
        omset_left: row.get(2)?,
        omset_right: row.get(3)?,
        total_omset: row.get(4)?,
        is_completed: row.get(5)?,
        is_claimed: row.get(6)?,
        started_at: ts_from_sql(7, &started_at)?,
        expires_at: opt_ts_from_sql(8, row.get(8)?)?,
        last_reset_at: opt_ts_from_sql(9, row.get(9)?)?,
    })
}

pub fn find_progress(
    conn: &Connection,
    user_id: UserId,
    reward_id: i64,
) -> EngineResult<Option<RewardProgress>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM reward_progress WHERE user_id = ?1 AND reward_id = ?2",
        PROGRESS_COLUMNS
    ))?;
    Ok(stmt
        .query_row(params![user_id, reward_id], row_to_progress)
        .optional()?)
}

pub fn progress_for_user(conn: &Connection, user_id: UserId) -> EngineResult<Vec<RewardProgress>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM reward_progress WHERE user_id = ?1 ORDER BY reward_id",
        PROGRESS_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![user_id], row_to_progress)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Insert a row unless one already exists. Returns whether a row was written.
pub fn insert_progress_if_absent(conn: &Connection, p: &RewardProgress) -> EngineResult<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO reward_progress
         (user_id, reward_id, omset_left, omset_right, total_omset, is_completed, is_claimed,
          started_at, expires_at, last_reset_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    let changed = stmt.execute(params![
        p.user_id,
        p.reward_id,
        p.omset_left,
        p.omset_right,
        p.total_omset,
        p.is_completed,
        p.is_claimed,
        ts_to_sql(p.started_at),
        p.expires_at.map(ts_to_sql),
        p.last_reset_at.map(ts_to_sql)
    ])?;
    Ok(changed > 0)
}

pub fn save_progress(conn: &Connection, p: &RewardProgress) -> EngineResult<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE reward_progress
         SET omset_left = ?1, omset_right = ?2, total_omset = ?3, is_completed = ?4,
             is_claimed = ?5, started_at = ?6, expires_at = ?7, last_reset_at = ?8
         WHERE user_id = ?9 AND reward_id = ?10",
    )?;
    stmt.execute(params![
        p.omset_left,
        p.omset_right,
        p.total_omset,
        p.is_completed,
        p.is_claimed,
        ts_to_sql(p.started_at),
        p.expires_at.map(ts_to_sql),
        p.last_reset_at.map(ts_to_sql),
        p.user_id,
        p.reward_id
    ])?;
    Ok(())
}

/// A progress row joined with its user and reward for the admin listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressListing {
    pub user_id: UserId,
    pub user_name: String,
    pub reward_id: i64,
    pub reward_name: String,
    pub omset_target: Amount,
    pub omset_left: Amount,
    pub omset_right: Amount,
    pub total_omset: Amount,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub progress: f64,
}

/// Every progress row of every user, ordered by user then reward.
pub fn all_progress(conn: &Connection) -> EngineResult<Vec<ProgressListing>> {
    let mut stmt = conn.prepare_cached(
        "SELECT p.user_id, u.name, p.reward_id, r.name, r.omset_target, p.omset_left,
                p.omset_right, p.total_omset, p.is_completed, p.is_claimed, p.started_at,
                p.expires_at
         FROM reward_progress p
         JOIN users u ON u.id = p.user_id
         JOIN rewards r ON r.id = p.reward_id
         ORDER BY p.user_id, p.reward_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let started_at: String = row.get(10)?;
            let omset_target: Amount = row.get(4)?;
            let total_omset: Amount = row.get(7)?;
            Ok(ProgressListing {
                user_id: row.get(0)?,
                user_name: row.get(1)?,
                reward_id: row.get(2)?,
                reward_name: row.get(3)?,
                omset_target,
                omset_left: row.get(5)?,
                omset_right: row.get(6)?,
                total_omset,
                is_completed: row.get(8)?,
                is_claimed: row.get(9)?,
                started_at: ts_from_sql(10, &started_at)?,
                expires_at: opt_ts_from_sql(11, row.get(11)?)?,
                progress: progress_percent(total_omset, omset_target),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
