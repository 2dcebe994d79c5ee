//! Omset: investment returns aggregated over a user's binary downline.

use super::{walk_downline, Side, MAX_DEPTH};
use crate::error::EngineResult;
use crate::ledger::{accounts, investments};
use crate::models::{round_currency, Amount, UserId};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SubtreeOmset {
    pub left: Amount,
    pub right: Amount,
    pub total: Amount,
}

/// Sum of `total_returned` over the user's running investments.
pub fn user_omset(conn: &Connection, user_id: UserId) -> EngineResult<Amount> {
    Ok(round_currency(investments::running_total_returned(
        conn, user_id,
    )?))
}

/// Per-side omset of everyone within three levels under `root`. The root's own
/// investments are not included.
pub fn subtree_omset(conn: &Connection, root: UserId) -> EngineResult<SubtreeOmset> {
    if accounts::find_node(conn, root)?.is_none() {
        return Ok(SubtreeOmset::default());
    }

    let mut result = SubtreeOmset::default();
    for member in walk_downline(conn, root, MAX_DEPTH)? {
        let omset = user_omset(conn, member.user_id)?;
        match member.side {
            Side::Left => result.left += omset,
            Side::Right => result.right += omset,
        }
    }
    result.left = round_currency(result.left);
    result.right = round_currency(result.right);
    result.total = round_currency(result.left + result.right);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::test_support::link;
    use crate::ledger::LedgerStore;
    use crate::models::{Investment, InvestmentStatus};
    use chrono::Utc;

    fn running(conn: &Connection, user_id: UserId, returned: Amount, status: InvestmentStatus) {
        let inv = Investment {
            id: 0,
            user_id,
            product_id: 1,
            category_id: 1,
            amount: 1_000.0,
            daily_profit: 10.0,
            duration: 30,
            total_paid: 0,
            total_returned: returned,
            status,
            order_id: format!("T{}-{}-{}", user_id, returned, status.as_str()),
            next_return_at: None,
            last_return_at: None,
        };
        investments::insert_investment(conn, &inv, Utc::now()).unwrap();
    }

    #[test]
    fn test_root_without_node_is_zero() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                running(tx, 1, 500.0, InvestmentStatus::Running);
                assert_eq!(subtree_omset(tx, 1)?, SubtreeOmset::default());
                assert_eq!(user_omset(tx, 1)?, 500.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_sides_are_bounded_to_three_levels() {
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
                    ],
                );
                running(tx, 1, 999.0, InvestmentStatus::Running);
                running(tx, 2, 100.0, InvestmentStatus::Running);
                running(tx, 2, 40.0, InvestmentStatus::Completed);
                running(tx, 4, 20.0, InvestmentStatus::Running);
                running(tx, 5, 5.0, InvestmentStatus::Running);
                running(tx, 6, 1_000.0, InvestmentStatus::Running);
                running(tx, 3, 70.0, InvestmentStatus::Running);

                let omset = subtree_omset(tx, 1)?;
                assert_eq!(omset.left, 125.0);
                assert_eq!(omset.right, 70.0);
                assert_eq!(omset.total, 195.0);
                Ok(())
            })
            .unwrap();
    }
}
