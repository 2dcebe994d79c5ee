//! Slot search for new participants.
//!
//! A sponsor's own slots are tried first (left, then right). When both are
//! taken the search goes depth-first through the left child's entire subtree
//! before it looks at the right child, so trees grow left-heavy.

use super::Side;
use crate::error::{EngineError, EngineResult};
use crate::ledger::accounts;
use crate::models::{BinaryNode, UserId};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Where a new user landed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Placement {
    pub user_id: UserId,
    pub parent_id: UserId,
    pub side: Side,
}

/// Place `new_user` under `sponsor`. Exactly one node gains a child reference;
/// existing placements never move.
pub fn place(conn: &Connection, sponsor: UserId, new_user: UserId) -> EngineResult<Placement> {
    if sponsor == new_user {
        return Err(EngineError::invalid_state(format!(
            "user {} cannot be placed under itself",
            new_user
        )));
    }
    accounts::get_user(conn, sponsor)?;
    accounts::get_user(conn, new_user)?;

    if let Some(parent) = accounts::binary_parent(conn, new_user)? {
        return Err(EngineError::invalid_state(format!(
            "user {} is already placed under {}",
            new_user, parent
        )));
    }
    if is_in_subtree(conn, new_user, sponsor)? {
        return Err(EngineError::invalid_state(format!(
            "sponsor {} sits inside the subtree of user {}",
            sponsor, new_user
        )));
    }

    let Some(sponsor_node) = accounts::find_node(conn, sponsor)? else {
        let node = BinaryNode {
            user_id: sponsor,
            left_id: Some(new_user),
            right_id: None,
        };
        accounts::save_node(conn, &node)?;
        return Ok(placed(new_user, sponsor, Side::Left));
    };

    if let Some(placement) = fill_first_slot(conn, sponsor_node, new_user)? {
        return Ok(placement);
    }

    let mut visited: HashSet<UserId> = HashSet::from([sponsor]);
    let mut stack: Vec<UserId> = [sponsor_node.right_id, sponsor_node.left_id]
        .into_iter()
        .flatten()
        .collect();

    while let Some(candidate) = stack.pop() {
        if !visited.insert(candidate) {
            continue;
        }
        // A child that was never given a node has two free slots.
        let node = accounts::find_node(conn, candidate)?
            .unwrap_or_else(|| BinaryNode::empty(candidate));

        if let Some(placement) = fill_first_slot(conn, node, new_user)? {
            return Ok(placement);
        }
        debug!(user_id = candidate, "slots full, descending");
        stack.extend([node.right_id, node.left_id].into_iter().flatten());
    }

    Err(EngineError::invalid_state(format!(
        "no free slot under sponsor {}",
        sponsor
    )))
}

fn fill_first_slot(
    conn: &Connection,
    mut node: BinaryNode,
    new_user: UserId,
) -> EngineResult<Option<Placement>> {
    let side = if node.left_id.is_none() {
        node.left_id = Some(new_user);
        Side::Left
    } else if node.right_id.is_none() {
        node.right_id = Some(new_user);
        Side::Right
    } else {
        return Ok(None);
    };
    accounts::save_node(conn, &node)?;
    Ok(Some(placed(new_user, node.user_id, side)))
}

fn placed(user_id: UserId, parent_id: UserId, side: Side) -> Placement {
    info!(
        "🌳 Placed user {} on the {} of {}",
        user_id,
        side.as_str(),
        parent_id
    );
    Placement {
        user_id,
        parent_id,
        side,
    }
}

/// Whether `target` is reachable from `root` through child pointers.
fn is_in_subtree(conn: &Connection, root: UserId, target: UserId) -> EngineResult<bool> {
    let mut visited = HashSet::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        if current == target {
            return Ok(true);
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(node) = accounts::find_node(conn, current)? {
            stack.extend([node.left_id, node.right_id].into_iter().flatten());
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use chrono::Utc;

    fn users(conn: &Connection, n: usize) -> Vec<UserId> {
        (0..n)
            .map(|i| accounts::create_user(conn, &format!("u{}", i), None, Utc::now()).unwrap())
            .collect()
    }

    #[test]
    fn test_left_first_exhaustive_scenario() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let ids = users(tx, 6);
                let (s, a, b, c, d, e) = (ids[0], ids[1], ids[2], ids[3], ids[4], ids[5]);

                assert_eq!(place(tx, s, a)?, Placement { user_id: a, parent_id: s, side: Side::Left });
                assert_eq!(place(tx, s, b)?.side, Side::Right);

                // A never had a node of its own; it is created on demand.
                assert!(accounts::find_node(tx, a)?.is_none());
                assert_eq!(place(tx, s, c)?, Placement { user_id: c, parent_id: a, side: Side::Left });
                assert_eq!(place(tx, s, d)?, Placement { user_id: d, parent_id: a, side: Side::Right });

                // A is full: the search stays in A's subtree and reaches C before B.
                assert_eq!(place(tx, s, e)?, Placement { user_id: e, parent_id: c, side: Side::Left });

                let s_node = accounts::find_node(tx, s)?.unwrap();
                assert_eq!((s_node.left_id, s_node.right_id), (Some(a), Some(b)));
                assert!(accounts::find_node(tx, b)?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_each_user_referenced_once() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let ids = users(tx, 12);
                for &id in &ids[1..] {
                    place(tx, ids[0], id)?;
                }
                for &id in &ids[1..] {
                    let parents: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM binary_nodes WHERE left_id = ?1 OR right_id = ?1",
                        [id],
                        |row| row.get(0),
                    )?;
                    assert_eq!(parents, 1, "user {} has {} parents", id, parents);
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_rejects_self_and_double_placement() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let ids = users(tx, 3);
                assert!(matches!(place(tx, ids[0], ids[0]), Err(EngineError::InvalidState(_))));

                place(tx, ids[0], ids[1])?;
                assert!(matches!(place(tx, ids[2], ids[1]), Err(EngineError::InvalidState(_))));

                // Root of a tree cannot be hung beneath its own downline.
                assert!(matches!(place(tx, ids[1], ids[0]), Err(EngineError::InvalidState(_))));
                assert!(matches!(place(tx, ids[0], 999), Err(EngineError::NotFound(_))));
                Ok(())
            })
            .unwrap();
    }
}
