//! Referral forest: sponsor chains for the cascade and the team view.
//!
//! Independent of the binary tree. Edges are `users.reff_by`.

use crate::config::MAX_CASCADE_LEVELS;
use crate::error::EngineResult;
use crate::ledger::accounts;
use crate::models::{round_currency, ActivityStatus, Amount, UserId};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Sponsors of `user_id`, nearest first, at most `levels` long. Stops at the
/// first missing sponsor.
pub fn sponsor_chain(
    conn: &Connection,
    user_id: UserId,
    levels: usize,
) -> EngineResult<Vec<UserId>> {
    let mut chain = Vec::with_capacity(levels);
    let mut seen = HashSet::from([user_id]);
    let mut next = accounts::get_user(conn, user_id)?.reff_by;

    while chain.len() < levels {
        let Some(sponsor_id) = next else { break };
        if !seen.insert(sponsor_id) {
            break;
        }
        let Some(sponsor) = accounts::find_user(conn, sponsor_id)? else {
            debug!(user_id, sponsor_id, "sponsor missing, chain ends");
            break;
        };
        chain.push(sponsor.id);
        next = sponsor.reff_by;
    }
    Ok(chain)
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TeamLevel {
    pub level: u32,
    pub members: usize,
    pub active: usize,
    pub total_invest: Amount,
}

/// Referral levels 1 to 3 below a user: head count, active investors and their
/// combined investment.
pub fn team_levels(conn: &Connection, user_id: UserId) -> EngineResult<Vec<TeamLevel>> {
    accounts::get_user(conn, user_id)?;

    let mut seen = HashSet::from([user_id]);
    let mut frontier = vec![user_id];
    let mut levels = Vec::with_capacity(MAX_CASCADE_LEVELS);

    for level in 1..=MAX_CASCADE_LEVELS as u32 {
        let members: Vec<_> = accounts::referrals_of(conn, &frontier)?
            .into_iter()
            .filter(|u| seen.insert(u.id))
            .collect();

        levels.push(TeamLevel {
            level,
            members: members.len(),
            active: members
                .iter()
                .filter(|u| u.investment_status == ActivityStatus::Active)
                .count(),
            total_invest: round_currency(members.iter().map(|u| u.total_invest).sum()),
        });
        frontier = members.into_iter().map(|u| u.id).collect();
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use chrono::Utc;

    #[test]
    fn test_chain_is_capped_and_nearest_first() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let now = Utc::now();
                let a = accounts::create_user(tx, "a", None, now)?;
                let b = accounts::create_user(tx, "b", Some(a), now)?;
                let c = accounts::create_user(tx, "c", Some(b), now)?;
                let d = accounts::create_user(tx, "d", Some(c), now)?;
                let e = accounts::create_user(tx, "e", Some(d), now)?;

                assert_eq!(sponsor_chain(tx, e, 3)?, vec![d, c, b]);
                assert_eq!(sponsor_chain(tx, b, 3)?, vec![a]);
                assert!(sponsor_chain(tx, a, 3)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_chain_stops_at_missing_sponsor() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let a = accounts::create_user(tx, "a", None, Utc::now())?;
                let b = accounts::create_user(tx, "b", Some(a), Utc::now())?;
                tx.execute("UPDATE users SET reff_by = 777 WHERE id = ?1", [a])?;
                assert_eq!(sponsor_chain(tx, b, 3)?, vec![a]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_team_levels() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let now = Utc::now();
                let root = accounts::create_user(tx, "root", None, now)?;
                let l1a = accounts::create_user(tx, "l1a", Some(root), now)?;
                let l1b = accounts::create_user(tx, "l1b", Some(root), now)?;
                let l2 = accounts::create_user(tx, "l2", Some(l1a), now)?;
                accounts::create_user(tx, "l3", Some(l2), now)?;

                accounts::update_invest_totals(tx, l1a, 1_000.0, 0.0, 0)?;
                accounts::update_invest_totals(tx, l1b, 500.0, 0.0, 0)?;
                accounts::set_investment_status(tx, l1a, ActivityStatus::Active)?;

                let team = team_levels(tx, root)?;
                assert_eq!(team.len(), 3);
                assert_eq!((team[0].members, team[0].active), (2, 1));
                assert_eq!(team[0].total_invest, 1_500.0);
                assert_eq!(team[1].members, 1);
                assert_eq!(team[2].members, 1);
                Ok(())
            })
            .unwrap();
    }
}
