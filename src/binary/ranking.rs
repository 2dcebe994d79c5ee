//! Downline ranking and the binary structure view.

use super::omset::{subtree_omset, user_omset, SubtreeOmset};
use super::{walk_downline, Side, MAX_DEPTH};
use crate::error::EngineResult;
use crate::ledger::accounts;
use crate::models::{Amount, UserId};
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;

/// Display limits for levels 1, 2 and 3.
pub const LEVEL_LIMITS: [usize; 3] = [2, 4, 8];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TopMember {
    pub user_id: UserId,
    pub name: String,
    pub level: u32,
    pub omset: Amount,
    pub position: Side,
}

/// Occupied positions per level under a root.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MemberCounts {
    pub level_1: usize,
    pub level_2: usize,
    pub level_3: usize,
}

impl MemberCounts {
    pub fn total(&self) -> usize {
        self.level_1 + self.level_2 + self.level_3
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RootSummary {
    pub user_id: UserId,
    pub name: String,
    pub omset: Amount,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BinaryStructure {
    pub root: RootSummary,
    pub level_1: Vec<TopMember>,
    pub level_2: Vec<TopMember>,
    pub level_3: Vec<TopMember>,
    pub counts: MemberCounts,
    pub omset: SubtreeOmset,
}

/// Members exactly `level` hops under `root`, highest omset first (ties by
/// lower user id), at most `limit` of them. Only levels 1 to `MAX_DEPTH` have
/// members; a root that was never placed has none.
pub fn top_members(
    conn: &Connection,
    root: UserId,
    level: u32,
    limit: usize,
) -> EngineResult<Vec<TopMember>> {
    if level == 0 || level > MAX_DEPTH || limit == 0 {
        return Ok(Vec::new());
    }

    let mut members = Vec::new();
    for reached in walk_downline(conn, root, level)? {
        if reached.depth != level {
            continue;
        }
        let name = accounts::find_user(conn, reached.user_id)?
            .map(|u| u.name)
            .unwrap_or_default();
        members.push(TopMember {
            user_id: reached.user_id,
            name,
            level,
            omset: user_omset(conn, reached.user_id)?,
            position: reached.side,
        });
    }

    members.sort_by(|a, b| {
        b.omset
            .partial_cmp(&a.omset)
            .unwrap_or(Ordering::Equal)
            .then(a.user_id.cmp(&b.user_id))
    });
    members.truncate(limit);
    Ok(members)
}

pub fn member_counts(conn: &Connection, root: UserId) -> EngineResult<MemberCounts> {
    let mut counts = MemberCounts::default();
    for reached in walk_downline(conn, root, MAX_DEPTH)? {
        match reached.depth {
            1 => counts.level_1 += 1,
            2 => counts.level_2 += 1,
            _ => counts.level_3 += 1,
        }
    }
    Ok(counts)
}

/// Root summary, ranked members for levels 1 to 3 and the root's omset.
pub fn structure(conn: &Connection, root: UserId) -> EngineResult<BinaryStructure> {
    let user = accounts::get_user(conn, root)?;
    Ok(BinaryStructure {
        root: RootSummary {
            user_id: user.id,
            name: user.name,
            omset: user_omset(conn, root)?,
        },
        level_1: top_members(conn, root, 1, LEVEL_LIMITS[0])?,
        level_2: top_members(conn, root, 2, LEVEL_LIMITS[1])?,
        level_3: top_members(conn, root, 3, LEVEL_LIMITS[2])?,
        counts: member_counts(conn, root)?,
        omset: subtree_omset(conn, root)?,
    })
}
