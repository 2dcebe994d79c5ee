//! Multi-level payouts along the referral chain.

use crate::clock::OrderIds;
use crate::error::EngineResult;
use crate::ledger::accounts::{self, Movement};
use crate::models::{percent_of, Amount, BalanceKind, TransactionKind, UserId};
use crate::referral::sponsor_chain;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CascadePayout {
    pub sponsor_id: UserId,
    /// 1 for the direct sponsor.
    pub level: u32,
    pub amount: Amount,
}

/// One cascade to run: `percentages[i]` of `base_amount` goes to the sponsor
/// `i + 1` levels above `source_user`.
#[derive(Debug, Clone)]
pub struct CascadeEvent<'a> {
    pub source_user: UserId,
    pub base_amount: Amount,
    pub percentages: &'a [f64],
    pub ledger: BalanceKind,
    pub kind: TransactionKind,
    pub label: &'a str,
    pub at: DateTime<Utc>,
}

/// Credit every sponsor in the chain its share. Each credit writes its own
/// ledger row under a fresh order id. Zero shares are skipped.
pub fn distribute(
    conn: &Connection,
    order_ids: &dyn OrderIds,
    event: &CascadeEvent<'_>,
) -> EngineResult<Vec<CascadePayout>> {
    let chain = sponsor_chain(conn, event.source_user, event.percentages.len())?;
    let mut payouts = Vec::with_capacity(chain.len());

    for (idx, (sponsor_id, pct)) in chain.iter().zip(event.percentages).enumerate() {
        let amount = percent_of(event.base_amount, *pct);
        if amount <= 0.0 {
            continue;
        }
        let level = idx as u32 + 1;
        let order_id = order_ids.next_order_id(*sponsor_id);
        accounts::credit(
            conn,
            Movement {
                user_id: *sponsor_id,
                ledger: event.ledger,
                amount,
                order_id: &order_id,
                kind: event.kind,
                message: format!(
                    "{} level {} from user {}",
                    event.label, level, event.source_user
                ),
                at: event.at,
            },
        )?;
        payouts.push(CascadePayout {
            sponsor_id: *sponsor_id,
            level,
            amount,
        });
    }

    debug!(
        source_user = event.source_user,
        kind = event.kind.as_str(),
        paid = payouts.len(),
        "cascade distributed"
    );
    Ok(payouts)
}
