//! Reward progress state machine.
//!
//! Pure transitions over a `RewardProgress` row; the manager loads and saves
//! rows around them.

use crate::binary::omset::SubtreeOmset;
use crate::models::{Reward, RewardProgress, UserId};
use chrono::{DateTime, Duration, Utc};

/// What a refresh did to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Counters overwritten with the current omset.
    Updated,
    /// Counters overwritten and the target reached for the first time.
    Completed,
    /// The period had run out; counters were zeroed and a new period started.
    Expired,
    /// Claimed rows keep zero counters until the next period.
    Claimed,
}

/// End of a period starting at `from`. Accumulative rewards never expire.
pub fn period_end(reward: &Reward, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if reward.is_accumulative {
        None
    } else {
        Some(from + Duration::days(i64::from(reward.duration)))
    }
}

pub fn initial(reward: &Reward, user_id: UserId, now: DateTime<Utc>) -> RewardProgress {
    RewardProgress {
        user_id,
        reward_id: reward.id,
        omset_left: 0.0,
        omset_right: 0.0,
        total_omset: 0.0,
        is_completed: false,
        is_claimed: false,
        started_at: now,
        expires_at: period_end(reward, now),
        last_reset_at: None,
    }
}

fn zero_counters(progress: &mut RewardProgress) {
    progress.omset_left = 0.0;
    progress.omset_right = 0.0;
    progress.total_omset = 0.0;
}

pub fn is_expired(progress: &RewardProgress, reward: &Reward, now: DateTime<Utc>) -> bool {
    !reward.is_accumulative && progress.expires_at.is_some_and(|exp| now > exp)
}

/// Apply fresh omset to a row.
///
/// An expired row is reset and does not take the omset in the same pass. A
/// claimed row is left alone. Otherwise counters are overwritten and the row
/// completes once the total reaches the target; completion is never undone
/// here.
pub fn refresh(
    progress: &mut RewardProgress,
    reward: &Reward,
    omset: SubtreeOmset,
    now: DateTime<Utc>,
) -> RefreshOutcome {
    if is_expired(progress, reward, now) {
        zero_counters(progress);
        progress.is_claimed = false;
        progress.is_completed = false;
        progress.started_at = now;
        progress.last_reset_at = Some(now);
        progress.expires_at = period_end(reward, now);
        return RefreshOutcome::Expired;
    }

    if progress.is_claimed {
        return RefreshOutcome::Claimed;
    }

    progress.omset_left = omset.left;
    progress.omset_right = omset.right;
    progress.total_omset = omset.total;

    if !progress.is_completed && progress.total_omset >= reward.omset_target {
        progress.is_completed = true;
        return RefreshOutcome::Completed;
    }
    RefreshOutcome::Updated
}

/// Mark a row claimed and start a new period with zero counters.
///
/// A claimed row can be claimed again; each claim restarts the period.
pub fn claim(progress: &mut RewardProgress, reward: &Reward, now: DateTime<Utc>) {
    zero_counters(progress);
    progress.is_claimed = true;
    progress.is_completed = false;
    progress.started_at = now;
    progress.last_reset_at = Some(now);
    progress.expires_at = period_end(reward, now);
}

/// Share of the target reached, clamped to 0..=100.
pub fn progress_percent(total_omset: f64, omset_target: f64) -> f64 {
    if omset_target <= 0.0 {
        return 0.0;
    }
    (total_omset / omset_target * 100.0).clamp(0.0, 100.0)
}
