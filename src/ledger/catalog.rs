//! Categories, products and the reward catalog.

use super::store::{enum_from_sql, require};
use crate::error::{EngineError, EngineResult};
use crate::models::{ActivityStatus, Amount, Category, Product, ProfitType, Reward};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::info;

pub fn create_category(
    conn: &Connection,
    name: &str,
    profit_type: ProfitType,
) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO categories (name, profit_type, status) VALUES (?1, ?2, 'Active')",
        params![name, profit_type.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_category(conn: &Connection, id: i64) -> EngineResult<Option<Category>> {
    let mut stmt = conn
        .prepare_cached("SELECT id, name, profit_type, status FROM categories WHERE id = ?1")?;
    let category = stmt
        .query_row(params![id], |row| {
            let profit_type: String = row.get(2)?;
            let status: String = row.get(3)?;
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                profit_type: enum_from_sql(2, &profit_type, ProfitType::from_str)?,
                status: enum_from_sql(3, &status, ActivityStatus::from_str)?,
            })
        })
        .optional()?;
    Ok(category)
}

/// Product definition for `create_product`.
#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub category_id: i64,
    pub name: &'a str,
    pub amount: Amount,
    pub daily_profit: Amount,
    pub duration: u32,
    pub required_vip: u32,
    pub purchase_limit: u32,
}

pub fn create_product(conn: &Connection, product: &NewProduct<'_>) -> EngineResult<i64> {
    if product.amount <= 0.0 || product.daily_profit < 0.0 || product.duration == 0 {
        return Err(EngineError::invalid_state(format!(
            "product '{}' needs a positive amount and duration",
            product.name
        )));
    }
    require(find_category(conn, product.category_id)?, || {
        format!("category {}", product.category_id)
    })?;
    conn.execute(
        "INSERT INTO products
         (category_id, name, amount, daily_profit, duration, required_vip, purchase_limit, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'Active')",
        params![
            product.category_id,
            product.name,
            product.amount,
            product.daily_profit,
            product.duration,
            product.required_vip,
            product.purchase_limit
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_product(conn: &Connection, id: i64) -> EngineResult<Option<Product>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, category_id, name, amount, daily_profit, duration, required_vip,
                purchase_limit, status
         FROM products WHERE id = ?1",
    )?;
    let product = stmt
        .query_row(params![id], |row| {
            let status: String = row.get(8)?;
            Ok(Product {
                id: row.get(0)?,
                category_id: row.get(1)?,
                name: row.get(2)?,
                amount: row.get(3)?,
                daily_profit: row.get(4)?,
                duration: row.get(5)?,
                required_vip: row.get(6)?,
                purchase_limit: row.get(7)?,
                status: enum_from_sql(8, &status, ActivityStatus::from_str)?,
            })
        })
        .optional()?;
    Ok(product)
}

pub fn set_product_status(conn: &Connection, id: i64, status: ActivityStatus) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE products SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found(format!("product {}", id)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rewards
// ---------------------------------------------------------------------------

const REWARD_COLUMNS: &str = "id, name, omset_target, duration, is_accumulative, status";

fn row_to_reward(row: &Row) -> rusqlite::Result<Reward> {
    let status: String = row.get(5)?;
    Ok(Reward {
        id: row.get(0)?,
        name: row.get(1)?,
        omset_target: row.get(2)?,
        duration: row.get(3)?,
        is_accumulative: row.get(4)?,
        status: enum_from_sql(5, &status, ActivityStatus::from_str)?,
    })
}

fn check_reward(
    name: &str,
    omset_target: Amount,
    duration: u32,
    is_accumulative: bool,
) -> EngineResult<()> {
    if omset_target <= 0.0 {
        return Err(EngineError::invalid_state(format!(
            "reward '{}' needs a positive omset target",
            name
        )));
    }
    if !is_accumulative && duration == 0 {
        return Err(EngineError::invalid_state(format!(
            "periodic reward '{}' needs a duration",
            name
        )));
    }
    Ok(())
}

pub fn create_reward(
    conn: &Connection,
    name: &str,
    omset_target: Amount,
    duration: u32,
    is_accumulative: bool,
) -> EngineResult<i64> {
    check_reward(name, omset_target, duration, is_accumulative)?;
    conn.execute(
        "INSERT INTO rewards (name, omset_target, duration, is_accumulative, status)
         VALUES (?1, ?2, ?3, ?4, 'Active')",
        params![name, omset_target, duration, is_accumulative],
    )?;
    let id = conn.last_insert_rowid();
    info!("🏆 Reward '{}' created (id={}, target={})", name, id, omset_target);
    Ok(id)
}

pub fn find_reward(conn: &Connection, id: i64) -> EngineResult<Option<Reward>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {} FROM rewards WHERE id = ?1", REWARD_COLUMNS))?;
    Ok(stmt.query_row(params![id], row_to_reward).optional()?)
}

pub fn list_rewards(conn: &Connection) -> EngineResult<Vec<Reward>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {} FROM rewards ORDER BY id", REWARD_COLUMNS))?;
    let rewards = stmt
        .query_map([], row_to_reward)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rewards)
}

pub fn active_rewards(conn: &Connection) -> EngineResult<Vec<Reward>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM rewards WHERE status = 'Active' ORDER BY id",
        REWARD_COLUMNS
    ))?;
    let rewards = stmt
        .query_map([], row_to_reward)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rewards)
}

pub fn set_reward_status(conn: &Connection, id: i64, status: ActivityStatus) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE rewards SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found(format!("reward {}", id)));
    }
    Ok(())
}

/// Partial reward edit; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RewardUpdate {
    pub name: Option<String>,
    pub omset_target: Option<Amount>,
    pub duration: Option<u32>,
    pub is_accumulative: Option<bool>,
    pub status: Option<ActivityStatus>,
}

/// Apply a partial edit and return the stored reward. Periods already running
/// keep the expiry they were given.
pub fn update_reward(conn: &Connection, id: i64, update: &RewardUpdate) -> EngineResult<Reward> {
    let mut reward = require(find_reward(conn, id)?, || format!("reward {}", id))?;
    if let Some(name) = &update.name {
        reward.name = name.clone();
    }
    if let Some(target) = update.omset_target {
        reward.omset_target = target;
    }
    if let Some(duration) = update.duration {
        reward.duration = duration;
    }
    if let Some(is_accumulative) = update.is_accumulative {
        reward.is_accumulative = is_accumulative;
    }
    if let Some(status) = update.status {
        reward.status = status;
    }
    check_reward(
        &reward.name,
        reward.omset_target,
        reward.duration,
        reward.is_accumulative,
    )?;

    conn.execute(
        "UPDATE rewards SET name = ?1, omset_target = ?2, duration = ?3, is_accumulative = ?4,
                            status = ?5
         WHERE id = ?6",
        params![
            reward.name,
            reward.omset_target,
            reward.duration,
            reward.is_accumulative,
            reward.status.as_str(),
            id
        ],
    )?;
    info!("✏️  Reward {} updated", id);
    Ok(reward)
}

/// Remove a reward. Refused while any user has progress against it.
pub fn delete_reward(conn: &Connection, id: i64) -> EngineResult<()> {
    require(find_reward(conn, id)?, || format!("reward {}", id))?;

    let in_use: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reward_progress WHERE reward_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if in_use > 0 {
        return Err(EngineError::invalid_state(format!(
            "reward {} has {} progress rows",
            id, in_use
        )));
    }
    conn.execute("DELETE FROM rewards WHERE id = ?1", params![id])?;
    info!("🗑️  Reward {} deleted", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;

    #[test]
    fn test_product_requires_known_category() {
        let store = LedgerStore::open_in_memory().unwrap();
        let err = store
            .with_write_tx(|tx| {
                create_product(
                    tx,
                    &NewProduct {
                        category_id: 7,
                        name: "Starter",
                        amount: 100_000.0,
                        daily_profit: 1_000.0,
                        duration: 30,
                        required_vip: 0,
                        purchase_limit: 0,
                    },
                )
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_reward_status_filters_active_list() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let a = create_reward(tx, "Bronze", 1_000_000.0, 30, false)?;
                let b = create_reward(tx, "Lifetime", 50_000_000.0, 0, true)?;
                set_reward_status(tx, a, ActivityStatus::Inactive)?;

                let active: Vec<i64> = active_rewards(tx)?.iter().map(|r| r.id).collect();
                assert_eq!(active, vec![b]);
                assert_eq!(list_rewards(tx)?.len(), 2);
                assert!(find_reward(tx, b)?.unwrap().is_accumulative);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_periodic_reward_needs_duration() {
        let store = LedgerStore::open_in_memory().unwrap();
        let err = store
            .with_write_tx(|tx| create_reward(tx, "Broken", 10.0, 0, false))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_update_reward_is_partial() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let id = create_reward(tx, "Bronze", 1_000.0, 30, false)?;
                let updated = update_reward(
                    tx,
                    id,
                    &RewardUpdate {
                        omset_target: Some(2_500.0),
                        status: Some(ActivityStatus::Inactive),
                        ..Default::default()
                    },
                )?;
                assert_eq!(updated.name, "Bronze");
                assert_eq!(updated.duration, 30);
                assert_eq!(find_reward(tx, id)?, Some(updated));
                assert!(active_rewards(tx)?.is_empty());

                let err = update_reward(
                    tx,
                    id,
                    &RewardUpdate {
                        duration: Some(0),
                        ..Default::default()
                    },
                )
                .unwrap_err();
                assert!(matches!(err, EngineError::InvalidState(_)));
                assert!(matches!(
                    update_reward(tx, 404, &RewardUpdate::default()),
                    Err(EngineError::NotFound(_))
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_reward_refused_while_in_progress() {
        use crate::ledger::{accounts, progress};
        use crate::rewards::progress::initial;
        use chrono::Utc;

        let store = LedgerStore::open_in_memory().unwrap();
        store
            .with_write_tx(|tx| {
                let used = create_reward(tx, "Silver", 500.0, 30, false)?;
                let unused = create_reward(tx, "Gold", 900.0, 30, false)?;
                let user = accounts::create_user(tx, "u", None, Utc::now())?;
                let reward = find_reward(tx, used)?.unwrap();
                progress::insert_progress_if_absent(tx, &initial(&reward, user, Utc::now()))?;

                assert!(matches!(delete_reward(tx, used), Err(EngineError::InvalidState(_))));
                assert!(find_reward(tx, used)?.is_some());

                delete_reward(tx, unused)?;
                assert_eq!(find_reward(tx, unused)?, None);
                assert!(matches!(delete_reward(tx, unused), Err(EngineError::NotFound(_))));
                Ok(())
            })
            .unwrap();
    }
}
