//! Users, balances, the money ledger and binary placement rows.
//!
//! Free functions over a borrowed connection so callers compose several of
//! them inside one store transaction.

use super::store::{enum_from_sql, require, ts_from_sql, ts_to_sql};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    round_currency, ActivityStatus, Amount, BalanceKind, BinaryNode, LedgerTransaction,
    TransactionFlow, TransactionKind, User, UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

const USER_COLUMNS: &str = "id, name, balance, income, level, total_invest, total_invest_vip, \
                            reff_by, investment_status";

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    let status: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        balance: row.get(2)?,
        income: row.get(3)?,
        level: row.get(4)?,
        total_invest: row.get(5)?,
        total_invest_vip: row.get(6)?,
        reff_by: row.get(7)?,
        investment_status: enum_from_sql(8, &status, ActivityStatus::from_str)?,
    })
}

/// Register a user. The sponsor, when given, must already exist.
pub fn create_user(
    conn: &Connection,
    name: &str,
    reff_by: Option<UserId>,
    now: DateTime<Utc>,
) -> EngineResult<UserId> {
    if let Some(sponsor) = reff_by {
        require(find_user(conn, sponsor)?, || format!("sponsor {}", sponsor))?;
    }
    conn.execute(
        "INSERT INTO users (name, reff_by, created_at) VALUES (?1, ?2, ?3)",
        params![name, reff_by, ts_to_sql(now)],
    )?;
    let id = conn.last_insert_rowid();
    debug!(user_id = id, ?reff_by, "user created");
    Ok(id)
}

pub fn find_user(conn: &Connection, user_id: UserId) -> EngineResult<Option<User>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
    Ok(stmt.query_row(params![user_id], row_to_user).optional()?)
}

pub fn get_user(conn: &Connection, user_id: UserId) -> EngineResult<User> {
    require(find_user(conn, user_id)?, || format!("user {}", user_id))
}

pub fn active_user_ids(conn: &Connection) -> EngineResult<Vec<UserId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM users WHERE investment_status = 'Active' ORDER BY id",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<UserId>>>()?;
    Ok(ids)
}

/// Direct referrals of each of `sponsors` (one referral-forest level down).
pub fn referrals_of(conn: &Connection, sponsors: &[UserId]) -> EngineResult<Vec<User>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM users WHERE reff_by = ?1 ORDER BY id",
        USER_COLUMNS
    ))?;
    let mut out = Vec::new();
    for sponsor in sponsors {
        let rows = stmt.query_map(params![sponsor], row_to_user)?;
        for user in rows {
            out.push(user?);
        }
    }
    Ok(out)
}

pub fn set_investment_status(
    conn: &Connection,
    user_id: UserId,
    status: ActivityStatus,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE users SET investment_status = ?1 WHERE id = ?2",
        params![status.as_str(), user_id],
    )?;
    Ok(())
}

/// Persist investment totals and the derived VIP level.
pub fn update_invest_totals(
    conn: &Connection,
    user_id: UserId,
    total_invest: Amount,
    total_invest_vip: Amount,
    level: u32,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE users SET total_invest = ?1, total_invest_vip = ?2, level = ?3 WHERE id = ?4",
        params![
            round_currency(total_invest),
            round_currency(total_invest_vip),
            level,
            user_id
        ],
    )?;
    Ok(())
}

/// Money movement to record alongside a balance change.
#[derive(Debug, Clone)]
pub struct Movement<'a> {
    pub user_id: UserId,
    pub ledger: BalanceKind,
    pub amount: Amount,
    pub order_id: &'a str,
    pub kind: TransactionKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Add to `balance` or `income` and write the matching debit row.
/// Returns the new ledger value.
pub fn credit(conn: &Connection, movement: Movement<'_>) -> EngineResult<Amount> {
    apply_movement(conn, movement, TransactionFlow::Debit)
}

/// Take from `balance` or `income` and write the matching credit row.
/// Fails with `InsufficientFunds` without touching anything when short.
pub fn debit(conn: &Connection, movement: Movement<'_>) -> EngineResult<Amount> {
    apply_movement(conn, movement, TransactionFlow::Credit)
}

fn apply_movement(
    conn: &Connection,
    movement: Movement<'_>,
    flow: TransactionFlow,
) -> EngineResult<Amount> {
    let user = get_user(conn, movement.user_id)?;
    let current = match movement.ledger {
        BalanceKind::Balance => user.balance,
        BalanceKind::Income => user.income,
    };
    let amount = round_currency(movement.amount);

    let next = match flow {
        TransactionFlow::Debit => round_currency(current + amount),
        TransactionFlow::Credit => {
            if current + 1e-9 < amount {
                return Err(EngineError::InsufficientFunds {
                    needed: amount,
                    available: current,
                });
            }
            round_currency(current - amount)
        }
    };

    conn.execute(
        &format!(
            "UPDATE users SET {} = ?1 WHERE id = ?2",
            movement.ledger.column()
        ),
        params![next, movement.user_id],
    )?;
    record_transaction(
        conn,
        movement.user_id,
        amount,
        movement.order_id,
        flow,
        movement.kind,
        &movement.message,
        movement.at,
    )?;

    debug!(
        user_id = movement.user_id,
        ledger = movement.ledger.column(),
        flow = flow.as_str(),
        kind = movement.kind.as_str(),
        amount,
        "ledger movement"
    );
    Ok(next)
}

#[allow(clippy::too_many_arguments)]
pub fn record_transaction(
    conn: &Connection,
    user_id: UserId,
    amount: Amount,
    order_id: &str,
    flow: TransactionFlow,
    kind: TransactionKind,
    message: &str,
    at: DateTime<Utc>,
) -> EngineResult<i64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO transactions (user_id, amount, order_id, flow, kind, message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    stmt.execute(params![
        user_id,
        amount,
        order_id,
        flow.as_str(),
        kind.as_str(),
        message,
        ts_to_sql(at)
    ])?;
    Ok(conn.last_insert_rowid())
}

pub fn transactions_for_user(
    conn: &Connection,
    user_id: UserId,
) -> EngineResult<Vec<LedgerTransaction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, amount, order_id, flow, kind, message, created_at
         FROM transactions WHERE user_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            let flow: String = row.get(4)?;
            let kind: String = row.get(5)?;
            let created_at: String = row.get(7)?;
            Ok(LedgerTransaction {
                id: row.get(0)?,
                user_id: row.get(1)?,
                amount: row.get(2)?,
                order_id: row.get(3)?,
                flow: enum_from_sql(4, &flow, TransactionFlow::from_str)?,
                kind: enum_from_sql(5, &kind, TransactionKind::from_str)?,
                message: row.get(6)?,
                created_at: ts_from_sql(7, &created_at)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Binary placement rows
// ---------------------------------------------------------------------------

pub fn find_node(conn: &Connection, user_id: UserId) -> EngineResult<Option<BinaryNode>> {
    let mut stmt = conn
        .prepare_cached("SELECT user_id, left_id, right_id FROM binary_nodes WHERE user_id = ?1")?;
    let node = stmt
        .query_row(params![user_id], |row| {
            Ok(BinaryNode {
                user_id: row.get(0)?,
                left_id: row.get(1)?,
                right_id: row.get(2)?,
            })
        })
        .optional()?;
    Ok(node)
}

/// Insert or overwrite a placement row.
pub fn save_node(conn: &Connection, node: &BinaryNode) -> EngineResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO binary_nodes (user_id, left_id, right_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET left_id = excluded.left_id, right_id = excluded.right_id",
    )?;
    stmt.execute(params![node.user_id, node.left_id, node.right_id])?;
    Ok(())
}

/// The node whose left or right slot holds `user_id`.
pub fn binary_parent(conn: &Connection, user_id: UserId) -> EngineResult<Option<UserId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM binary_nodes WHERE left_id = ?1 OR right_id = ?1 LIMIT 1",
    )?;
    Ok(stmt.query_row(params![user_id], |row| row.get(0)).optional()?)
}

/// Empty both child slots of a user's node, leaving the row in place.
pub fn detach_children(conn: &Connection, user_id: UserId) -> EngineResult<bool> {
    let changed = conn.execute(
        "UPDATE binary_nodes SET left_id = NULL, right_id = NULL WHERE user_id = ?1",
        params![user_id],
    )?;
    Ok(changed > 0)
}

/// A user that holds a position in the binary forest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedUser {
    pub user_id: UserId,
    pub name: String,
}

/// Every user with a binary node row, by user id.
pub fn placed_users(conn: &Connection) -> EngineResult<Vec<PlacedUser>> {
    let mut stmt = conn.prepare_cached(
        "SELECT u.id, u.name FROM binary_nodes n JOIN users u ON u.id = n.user_id ORDER BY u.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PlacedUser {
                user_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;

    fn movement(user_id: UserId, ledger: BalanceKind, amount: Amount) -> Movement<'static> {
        Movement {
            user_id,
            ledger,
            amount,
            order_id: "TEST-1",
            kind: TransactionKind::AdminAdjustment,
            message: "test".to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_credit_and_debit_keep_ledger_rows() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let id = create_user(tx, "alice", None, Utc::now())?;
                assert_eq!(credit(tx, movement(id, BalanceKind::Balance, 500.0))?, 500.0);
                assert_eq!(debit(tx, movement(id, BalanceKind::Balance, 120.5))?, 379.5);

                let rows = transactions_for_user(tx, id)?;
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].flow, TransactionFlow::Debit);
                assert_eq!(rows[1].flow, TransactionFlow::Credit);
                assert_eq!(get_user(tx, id)?.income, 0.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_debit_beyond_balance_is_rejected() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let id = create_user(tx, "bob", None, Utc::now())?;
                credit(tx, movement(id, BalanceKind::Income, 10.0))?;
                let err = debit(tx, movement(id, BalanceKind::Income, 10.01)).unwrap_err();
                assert!(matches!(err, EngineError::InsufficientFunds { .. }));
                assert_eq!(get_user(tx, id)?.income, 10.0);
                assert_eq!(transactions_for_user(tx, id)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_unknown_sponsor_is_not_found() {
        let store = LedgerStore::open_in_memory().unwrap();
        let err = store
            .with_write_tx(|tx| create_user(tx, "orphan", Some(99), Utc::now()))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_binary_parent_and_detach() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                save_node(
                    tx,
                    &BinaryNode {
                        user_id: 1,
                        left_id: Some(2),
                        right_id: Some(3),
                    },
                )?;
                assert_eq!(binary_parent(tx, 3)?, Some(1));
                assert_eq!(binary_parent(tx, 1)?, None);

                assert!(detach_children(tx, 1)?);
                assert_eq!(find_node(tx, 1)?, Some(BinaryNode::empty(1)));
                assert_eq!(binary_parent(tx, 2)?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_placed_users_lists_node_owners() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let a = create_user(tx, "a", None, Utc::now())?;
                let b = create_user(tx, "b", Some(a), Utc::now())?;
                create_user(tx, "c", Some(a), Utc::now())?;
                save_node(
                    tx,
                    &BinaryNode {
                        user_id: a,
                        left_id: Some(b),
                        right_id: None,
                    },
                )?;
                save_node(tx, &BinaryNode::empty(b))?;

                let names: Vec<String> = placed_users(tx)?.into_iter().map(|p| p.name).collect();
                assert_eq!(names, vec!["a", "b"]);
                Ok(())
            })
            .unwrap();
    }
}
