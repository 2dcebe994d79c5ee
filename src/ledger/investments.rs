//! Investment rows.

use super::store::{enum_from_sql, opt_ts_from_sql, require, ts_to_sql};
use crate::error::EngineResult;
use crate::models::{Amount, Investment, InvestmentStatus, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const INVESTMENT_COLUMNS: &str = "id, user_id, product_id, category_id, amount, daily_profit, \
                                  duration, total_paid, total_returned, status, order_id, \
                                  next_return_at, last_return_at";

fn row_to_investment(row: &Row) -> rusqlite::Result<Investment> {
    let status: String = row.get(9)?;
    Ok(Investment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        category_id: row.get(3)?,
        amount: row.get(4)?,
        daily_profit: row.get(5)?,
        duration: row.get(6)?,
        total_paid: row.get(7)?,
        total_returned: row.get(8)?,
        status: enum_from_sql(9, &status, InvestmentStatus::from_str)?,
        order_id: row.get(10)?,
        next_return_at: opt_ts_from_sql(11, row.get(11)?)?,
        last_return_at: opt_ts_from_sql(12, row.get(12)?)?,
    })
}

/// Insert a new investment; `investment.id` is ignored and the new id returned.
pub fn insert_investment(
    conn: &Connection,
    investment: &Investment,
    created_at: DateTime<Utc>,
) -> EngineResult<i64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO investments
         (user_id, product_id, category_id, amount, daily_profit, duration, total_paid,
          total_returned, status, order_id, next_return_at, last_return_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    stmt.execute(params![
        investment.user_id,
        investment.product_id,
        investment.category_id,
        investment.amount,
        investment.daily_profit,
        investment.duration,
        investment.total_paid,
        investment.total_returned,
        investment.status.as_str(),
        investment.order_id,
        investment.next_return_at.map(ts_to_sql),
        investment.last_return_at.map(ts_to_sql),
        ts_to_sql(created_at)
    ])?;
    Ok(conn.last_insert_rowid())
}

pub fn find_investment(conn: &Connection, id: i64) -> EngineResult<Option<Investment>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM investments WHERE id = ?1",
        INVESTMENT_COLUMNS
    ))?;
    Ok(stmt.query_row(params![id], row_to_investment).optional()?)
}

pub fn get_investment(conn: &Connection, id: i64) -> EngineResult<Investment> {
    require(find_investment(conn, id)?, || format!("investment {}", id))
}

/// Write back the payout progress of an investment.
pub fn save_payout_progress(conn: &Connection, investment: &Investment) -> EngineResult<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE investments
         SET total_paid = ?1, total_returned = ?2, status = ?3,
             next_return_at = ?4, last_return_at = ?5
         WHERE id = ?6",
    )?;
    stmt.execute(params![
        investment.total_paid,
        investment.total_returned,
        investment.status.as_str(),
        investment.next_return_at.map(ts_to_sql),
        investment.last_return_at.map(ts_to_sql),
        investment.id
    ])?;
    Ok(())
}

pub fn investments_for_user(conn: &Connection, user_id: UserId) -> EngineResult<Vec<Investment>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM investments WHERE user_id = ?1 ORDER BY id",
        INVESTMENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![user_id], row_to_investment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Purchases of a product that count against its purchase limit.
pub fn count_product_purchases(
    conn: &Connection,
    user_id: UserId,
    product_id: i64,
) -> EngineResult<u32> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM investments
         WHERE user_id = ?1 AND product_id = ?2
           AND status IN ('Running', 'Completed', 'Suspended')",
    )?;
    Ok(stmt.query_row(params![user_id, product_id], |row| row.get(0))?)
}

/// Sum of `total_returned` over the user's running investments.
pub fn running_total_returned(conn: &Connection, user_id: UserId) -> EngineResult<Amount> {
    let mut stmt = conn.prepare_cached(
        "SELECT COALESCE(SUM(total_returned), 0) FROM investments
         WHERE user_id = ?1 AND status = 'Running'",
    )?;
    Ok(stmt.query_row(params![user_id], |row| row.get(0))?)
}

/// Ids of running investments whose next payout is due at `now`.
pub fn due_investment_ids(conn: &Connection, now: DateTime<Utc>) -> EngineResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM investments
         WHERE status = 'Running' AND total_paid < duration
           AND next_return_at IS NOT NULL AND next_return_at <= ?1
         ORDER BY next_return_at, id",
    )?;
    let ids = stmt
        .query_map(params![ts_to_sql(now)], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use chrono::Duration;

    fn sample(user_id: UserId, order_id: &str, next: DateTime<Utc>) -> Investment {
        Investment {
            id: 0,
            user_id,
            product_id: 1,
            category_id: 1,
            amount: 1_000.0,
            daily_profit: 10.0,
            duration: 5,
            total_paid: 0,
            total_returned: 0.0,
            status: InvestmentStatus::Running,
            order_id: order_id.to_string(),
            next_return_at: Some(next),
            last_return_at: None,
        }
    }

    #[test]
    fn test_due_selection_and_running_sum() {
        let store = LedgerStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .with_write_tx(|tx| {
                let due = insert_investment(tx, &sample(1, "A", now - Duration::hours(1)), now)?;
                insert_investment(tx, &sample(1, "B", now + Duration::hours(1)), now)?;

                let mut done = sample(1, "C", now - Duration::days(3));
                done.status = InvestmentStatus::Completed;
                done.total_returned = 50.0;
                insert_investment(tx, &done, now)?;

                assert_eq!(due_investment_ids(tx, now)?, vec![due]);

                let mut paid = get_investment(tx, due)?;
                paid.total_paid = 1;
                paid.total_returned = 10.0;
                save_payout_progress(tx, &paid)?;

                assert_eq!(running_total_returned(tx, 1)?, 10.0);
                assert_eq!(running_total_returned(tx, 2)?, 0.0);
                assert_eq!(count_product_purchases(tx, 1, 1)?, 3);
                Ok(())
            })
            .unwrap();
    }
}
