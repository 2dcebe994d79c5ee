//! Store-backed reward progress: initialization, refresh and claim.

use super::progress::{self, RefreshOutcome};
use crate::binary::omset::subtree_omset;
use crate::binary::MAX_DEPTH;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{accounts, catalog, progress as rows};
use crate::models::{Amount, Reward, RewardProgress, UserId};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

/// Per-user tally of what a refresh pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub created: usize,
    pub updated: usize,
    pub completed: usize,
    pub expired: usize,
    pub claimed: usize,
}

impl RefreshSummary {
    fn record(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Updated => self.updated += 1,
            RefreshOutcome::Completed => self.completed += 1,
            RefreshOutcome::Expired => self.expired += 1,
            RefreshOutcome::Claimed => self.claimed += 1,
        }
    }

    fn absorb(&mut self, other: RefreshSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.completed += other.completed;
        self.expired += other.expired;
        self.claimed += other.claimed;
    }
}

/// Create a zeroed progress row for every active reward the user does not
/// have yet. Existing rows are not touched. Returns the number created.
pub fn initialize(conn: &Connection, user_id: UserId, now: DateTime<Utc>) -> EngineResult<usize> {
    accounts::get_user(conn, user_id)?;
    let mut created = 0;
    for reward in catalog::active_rewards(conn)? {
        if rows::insert_progress_if_absent(conn, &progress::initial(&reward, user_id, now))? {
            created += 1;
        }
    }
    if created > 0 {
        debug!(user_id, created, "reward progress initialized");
    }
    Ok(created)
}

/// Recompute every active reward row of a user from its current subtree omset.
pub fn refresh_user(
    conn: &Connection,
    user_id: UserId,
    now: DateTime<Utc>,
) -> EngineResult<RefreshSummary> {
    let mut summary = RefreshSummary {
        created: initialize(conn, user_id, now)?,
        ..Default::default()
    };
    let omset = subtree_omset(conn, user_id)?;

    for reward in catalog::active_rewards(conn)? {
        let Some(mut row) = rows::find_progress(conn, user_id, reward.id)? else {
            continue;
        };
        let outcome = progress::refresh(&mut row, &reward, omset, now);
        rows::save_progress(conn, &row)?;
        summary.record(outcome);

        match outcome {
            RefreshOutcome::Completed => info!(
                "🏆 User {} reached reward '{}' (omset {:.2} / {:.2})",
                user_id, reward.name, row.total_omset, reward.omset_target
            ),
            RefreshOutcome::Expired => info!(
                "⏳ Reward '{}' period expired for user {}, counters reset",
                reward.name, user_id
            ),
            _ => {}
        }
    }
    Ok(summary)
}

/// Refresh the user and then each binary ancestor, nearest first, up to three
/// levels.
pub fn refresh_with_uplines(
    conn: &Connection,
    user_id: UserId,
    now: DateTime<Utc>,
) -> EngineResult<RefreshSummary> {
    let mut summary = refresh_user(conn, user_id, now)?;
    let mut current = user_id;
    for _ in 0..MAX_DEPTH {
        let Some(parent) = accounts::binary_parent(conn, current)? else {
            break;
        };
        if parent == user_id {
            break;
        }
        summary.absorb(refresh_user(conn, parent, now)?);
        current = parent;
    }
    Ok(summary)
}

/// Claim a reward for a user: zero the row, start a new period and detach the
/// user's own binary children. Both writes share the caller's transaction.
pub fn claim(
    conn: &Connection,
    user_id: UserId,
    reward_id: i64,
    now: DateTime<Utc>,
) -> EngineResult<RewardProgress> {
    let reward = catalog::find_reward(conn, reward_id)?
        .ok_or_else(|| EngineError::not_found(format!("reward {}", reward_id)))?;
    let mut row = rows::find_progress(conn, user_id, reward_id)?.ok_or_else(|| {
        EngineError::invalid_state(format!(
            "user {} has no progress on reward {}",
            user_id, reward_id
        ))
    })?;

    progress::claim(&mut row, &reward, now);
    rows::save_progress(conn, &row)?;
    let detached = accounts::detach_children(conn, user_id)?;

    info!(
        "🎁 Reward '{}' claimed by user {} (binary children detached: {})",
        reward.name, user_id, detached
    );
    Ok(row)
}

/// One reward with the user's progress on it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RewardStatus {
    pub reward_id: i64,
    pub name: String,
    pub omset_target: Amount,
    pub duration: u32,
    pub is_accumulative: bool,
    pub omset_left: Amount,
    pub omset_right: Amount,
    pub total_omset: Amount,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub progress: f64,
}

impl RewardStatus {
    fn new(reward: &Reward, row: Option<&RewardProgress>) -> Self {
        let total = row.map(|p| p.total_omset).unwrap_or(0.0);
        Self {
            reward_id: reward.id,
            name: reward.name.clone(),
            omset_target: reward.omset_target,
            duration: reward.duration,
            is_accumulative: reward.is_accumulative,
            omset_left: row.map(|p| p.omset_left).unwrap_or(0.0),
            omset_right: row.map(|p| p.omset_right).unwrap_or(0.0),
            total_omset: total,
            is_completed: row.is_some_and(|p| p.is_completed),
            is_claimed: row.is_some_and(|p| p.is_claimed),
            started_at: row.map(|p| p.started_at),
            expires_at: row.and_then(|p| p.expires_at),
            progress: progress::progress_percent(total, reward.omset_target),
        }
    }
}

/// Every active reward with the user's progress. Users missing a row get one
/// created and refreshed first.
pub fn overview(
    conn: &Connection,
    user_id: UserId,
    now: DateTime<Utc>,
) -> EngineResult<Vec<RewardStatus>> {
    let rewards = catalog::active_rewards(conn)?;
    let existing = rows::progress_for_user(conn, user_id)?;
    if rewards
        .iter()
        .any(|r| !existing.iter().any(|p| p.reward_id == r.id))
    {
        refresh_user(conn, user_id, now)?;
    }

    let current = rows::progress_for_user(conn, user_id)?;
    Ok(rewards
        .iter()
        .map(|r| RewardStatus::new(r, current.iter().find(|p| p.reward_id == r.id)))
        .collect())
}
