//! Binary placement tree: slot search, bounded-depth omset and downline ranking.
//!
//! The tree is stored as `binary_nodes` rows keyed by user id. All walks use an
//! explicit worklist with a depth counter and a visited set, so a damaged row
//! can neither loop forever nor blow the stack.

pub mod omset;
pub mod placement;
pub mod ranking;

use crate::error::EngineResult;
use crate::ledger::accounts;
use crate::models::UserId;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Levels below a user that count toward its omset and structure view.
pub const MAX_DEPTH: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// A user reached by a walk, `depth` hops below the walk's root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reached {
    pub user_id: UserId,
    pub depth: u32,
    pub side: Side,
}

/// Every user within `max_depth` hops under `root`, tagged with the root-side
/// subtree it sits in. Pre-order, left before right. Missing nodes end their
/// branch.
pub fn walk_downline(
    conn: &Connection,
    root: UserId,
    max_depth: u32,
) -> EngineResult<Vec<Reached>> {
    let Some(root_node) = accounts::find_node(conn, root)? else {
        return Ok(Vec::new());
    };

    let mut visited: HashSet<UserId> = HashSet::from([root]);
    let mut stack: Vec<Reached> = Vec::new();
    if let Some(right) = root_node.right_id {
        stack.push(Reached { user_id: right, depth: 1, side: Side::Right });
    }
    if let Some(left) = root_node.left_id {
        stack.push(Reached { user_id: left, depth: 1, side: Side::Left });
    }

    let mut out = Vec::new();
    while let Some(current) = stack.pop() {
        if current.depth > max_depth || !visited.insert(current.user_id) {
            continue;
        }
        out.push(current);

        if current.depth == max_depth {
            continue;
        }
        if let Some(node) = accounts::find_node(conn, current.user_id)? {
            for child in [node.right_id, node.left_id].into_iter().flatten() {
                stack.push(Reached {
                    user_id: child,
                    depth: current.depth + 1,
                    side: current.side,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::ledger::accounts;
    use crate::models::{BinaryNode, UserId};
    use rusqlite::Connection;

    /// Write placement rows directly: `(parent, left, right)`.
    pub fn link(conn: &Connection, rows: &[(UserId, Option<UserId>, Option<UserId>)]) {
        for &(user_id, left_id, right_id) in rows {
            accounts::save_node(conn, &BinaryNode { user_id, left_id, right_id }).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::link;
    use super::*;
    use crate::ledger::LedgerStore;

    #[test]
    fn test_walk_stops_at_depth_and_tags_sides() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                link(
                    tx,
                    &[
                        (1, Some(2), Some(3)),
                        (2, Some(4), None),
                        (4, Some(5), None),
                        (5, Some(6), None),
                        (3, None, Some(7)),
                    ],
                );
                let reached = walk_downline(tx, 1, MAX_DEPTH)?;
                let ids: Vec<UserId> = reached.iter().map(|r| r.user_id).collect();
                assert_eq!(ids, vec![2, 4, 5, 3, 7]);
                assert!(reached
                    .iter()
                    .filter(|r| [3, 7].contains(&r.user_id))
                    .all(|r| r.side == Side::Right));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_walk_survives_cycles() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                link(tx, &[(1, Some(2), None), (2, Some(1), None)]);
                let reached = walk_downline(tx, 1, 10)?;
                assert_eq!(reached.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
