//! Investment lifecycle events: purchase and daily return.
//!
//! Each function does all of its writes on the connection it is given; the
//! engine wraps every call in one immediate transaction so a failure anywhere
//! rolls the whole event back.

use super::cascade::{distribute, CascadeEvent, CascadePayout};
use crate::clock::OrderIds;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::accounts::{self, Movement};
use crate::ledger::{catalog, investments};
use crate::models::{
    percent_of, round_currency, ActivityStatus, Amount, BalanceKind, Category, Investment,
    InvestmentStatus, ProfitType, TransactionKind, UserId,
};
use crate::rewards::manager::{self, RefreshSummary};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

/// Shared inputs for one lifecycle event.
pub struct EventContext<'a> {
    pub config: &'a EngineConfig,
    pub order_ids: &'a dyn OrderIds,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PurchaseReceipt {
    pub investment: Investment,
    pub balance_after: Amount,
    pub purchase_bonus: Amount,
    pub referral_payouts: Vec<CascadePayout>,
    pub level: u32,
    pub became_active: bool,
    pub rewards: RefreshSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReturnReceipt {
    pub investment: Investment,
    /// Profit credited by this payout (zero on non-final days of a locked product).
    pub profit_paid: Amount,
    pub capital_returned: Amount,
    pub rebate_payouts: Vec<CascadePayout>,
    pub completed: bool,
    pub rewards: RefreshSummary,
}

fn category_of(conn: &Connection, category_id: i64) -> EngineResult<Category> {
    catalog::find_category(conn, category_id)?.ok_or_else(|| {
        EngineError::Configuration(format!("category {} is not configured", category_id))
    })
}

/// Buy a product from the user's balance and pay the purchase cascade.
pub fn purchase(
    conn: &Connection,
    ctx: &EventContext<'_>,
    user_id: UserId,
    product_id: i64,
) -> EngineResult<PurchaseReceipt> {
    let product = catalog::find_product(conn, product_id)?
        .filter(|p| p.status == ActivityStatus::Active)
        .ok_or_else(|| EngineError::not_found(format!("active product {}", product_id)))?;
    let category = category_of(conn, product.category_id)?;
    let user = accounts::get_user(conn, user_id)?;

    if user.level < product.required_vip {
        return Err(EngineError::invalid_state(format!(
            "product {} requires VIP {}, user {} is VIP {}",
            product.name, product.required_vip, user_id, user.level
        )));
    }
    if product.purchase_limit > 0 {
        let bought = investments::count_product_purchases(conn, user_id, product.id)?;
        if bought >= product.purchase_limit {
            return Err(EngineError::invalid_state(format!(
                "purchase limit {} reached for product {}",
                product.purchase_limit, product.name
            )));
        }
    }

    let order_id = ctx.order_ids.next_order_id(user_id);
    let balance_after = accounts::debit(
        conn,
        Movement {
            user_id,
            ledger: BalanceKind::Balance,
            amount: product.amount,
            order_id: &order_id,
            kind: TransactionKind::Investment,
            message: format!("Investment {}", product.name),
            at: ctx.now,
        },
    )?;

    let mut investment = Investment {
        id: 0,
        user_id,
        product_id: product.id,
        category_id: product.category_id,
        amount: product.amount,
        daily_profit: product.daily_profit,
        duration: product.duration,
        total_paid: 0,
        total_returned: 0.0,
        status: InvestmentStatus::Running,
        order_id,
        next_return_at: Some(ctx.now + Duration::days(1)),
        last_return_at: None,
    };
    investment.id = investments::insert_investment(conn, &investment, ctx.now)?;

    let purchase_bonus = percent_of(product.amount, ctx.config.purchase_bonus_pct);
    if purchase_bonus > 0.0 {
        let bonus_order = ctx.order_ids.next_order_id(user_id);
        accounts::credit(
            conn,
            Movement {
                user_id,
                ledger: BalanceKind::Income,
                amount: purchase_bonus,
                order_id: &bonus_order,
                kind: TransactionKind::PurchaseBonus,
                message: format!("Purchase bonus {}", product.name),
                at: ctx.now,
            },
        )?;
    }

    let referral_payouts = distribute(
        conn,
        ctx.order_ids,
        &CascadeEvent {
            source_user: user_id,
            base_amount: product.amount,
            percentages: &ctx.config.referral_pct,
            ledger: BalanceKind::Income,
            kind: TransactionKind::Referral,
            label: "Referral bonus",
            at: ctx.now,
        },
    )?;

    let total_invest = user.total_invest + product.amount;
    let (total_invest_vip, level) = match category.profit_type {
        ProfitType::Locked => {
            let vip = user.total_invest_vip + product.amount;
            (vip, ctx.config.vip_level(round_currency(vip)))
        }
        ProfitType::Unlocked => (user.total_invest_vip, user.level),
    };
    accounts::update_invest_totals(conn, user_id, total_invest, total_invest_vip, level)?;
    if level != user.level {
        info!("⭐ User {} moved from VIP {} to VIP {}", user_id, user.level, level);
    }

    let became_active = user.investment_status == ActivityStatus::Inactive;
    if became_active {
        accounts::set_investment_status(conn, user_id, ActivityStatus::Active)?;
        manager::initialize(conn, user_id, ctx.now)?;
    }
    let rewards = manager::refresh_with_uplines(conn, user_id, ctx.now)?;

    info!(
        "💰 User {} bought {} for {:.2} (investment {}, {} referral payouts)",
        user_id,
        product.name,
        product.amount,
        investment.id,
        referral_payouts.len()
    );

    Ok(PurchaseReceipt {
        investment,
        balance_after,
        purchase_bonus,
        referral_payouts,
        level,
        became_active,
        rewards,
    })
}

/// Pay one day of a running investment, its rebate cascade and, on the last
/// day, the principal.
pub fn daily_return(
    conn: &Connection,
    ctx: &EventContext<'_>,
    investment_id: i64,
) -> EngineResult<ReturnReceipt> {
    let mut investment = investments::get_investment(conn, investment_id)?;
    if investment.status != InvestmentStatus::Running {
        return Err(EngineError::invalid_state(format!(
            "investment {} is {}",
            investment_id,
            investment.status.as_str()
        )));
    }
    if investment.total_paid >= investment.duration {
        return Err(EngineError::invalid_state(format!(
            "investment {} already paid {} of {} days",
            investment_id, investment.total_paid, investment.duration
        )));
    }

    let category = category_of(conn, investment.category_id)?;
    let product_name = catalog::find_product(conn, investment.product_id)?
        .map(|p| p.name)
        .unwrap_or_else(|| format!("product {}", investment.product_id));
    let user_id = investment.user_id;
    let paid = investment.total_paid + 1;
    let completed = paid >= investment.duration;

    let (profit_paid, ledger) = match category.profit_type {
        ProfitType::Unlocked => (investment.daily_profit, BalanceKind::Income),
        ProfitType::Locked if completed => (
            round_currency(investment.daily_profit * f64::from(investment.duration)),
            BalanceKind::Balance,
        ),
        ProfitType::Locked => (0.0, BalanceKind::Balance),
    };
    if profit_paid > 0.0 {
        let order_id = ctx.order_ids.next_order_id(user_id);
        accounts::credit(
            conn,
            Movement {
                user_id,
                ledger,
                amount: profit_paid,
                order_id: &order_id,
                kind: TransactionKind::Return,
                message: match category.profit_type {
                    ProfitType::Unlocked => format!("Daily profit {}", product_name),
                    ProfitType::Locked => format!("Total profit {} completed", product_name),
                },
                at: ctx.now,
            },
        )?;
    }

    let rebate_payouts = distribute(
        conn,
        ctx.order_ids,
        &CascadeEvent {
            source_user: user_id,
            base_amount: investment.daily_profit,
            percentages: &ctx.config.rebate_pct,
            ledger: BalanceKind::Income,
            kind: TransactionKind::Rebate,
            label: "Rebate",
            at: ctx.now,
        },
    )?;

    let mut capital_returned = 0.0;
    if completed {
        capital_returned = investment.amount;
        let order_id = ctx.order_ids.next_order_id(user_id);
        accounts::credit(
            conn,
            Movement {
                user_id,
                ledger: BalanceKind::Balance,
                amount: capital_returned,
                order_id: &order_id,
                kind: TransactionKind::CapitalReturn,
                message: format!("Capital return {}", product_name),
                at: ctx.now,
            },
        )?;
    }

    investment.total_paid = paid;
    investment.total_returned = round_currency(investment.total_returned + investment.daily_profit);
    investment.last_return_at = Some(ctx.now);
    investment.next_return_at = Some(ctx.now + Duration::days(1));
    if completed {
        investment.status = InvestmentStatus::Completed;
    }
    investments::save_payout_progress(conn, &investment)?;

    let rewards = manager::refresh_with_uplines(conn, user_id, ctx.now)?;

    if completed {
        info!(
            "✅ Investment {} completed for user {} ({} days)",
            investment.id, user_id, investment.duration
        );
    } else {
        debug!(
            investment_id = investment.id,
            user_id,
            day = paid,
            profit_paid,
            "daily return paid"
        );
    }

    Ok(ReturnReceipt {
        investment,
        profit_paid,
        capital_returned,
        rebate_payouts,
        completed,
        rewards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::UuidOrderIds;
    use crate::ledger::catalog::NewProduct;
    use crate::ledger::LedgerStore;
    use crate::models::TransactionFlow;

    struct Fixture {
        store: LedgerStore,
        config: EngineConfig,
        sponsor: UserId,
        buyer: UserId,
        unlocked: i64,
        locked: i64,
    }

    fn fixture() -> Fixture {
        let store = LedgerStore::open_in_memory().unwrap();
        let now = Utc::now();
        let (sponsor, buyer, unlocked, locked) = store
            .with_write_tx(|tx| {
                let sponsor = accounts::create_user(tx, "sponsor", None, now)?;
                let buyer = accounts::create_user(tx, "buyer", Some(sponsor), now)?;
                accounts::credit(
                    tx,
                    Movement {
                        user_id: buyer,
                        ledger: BalanceKind::Balance,
                        amount: 2_000_000.0,
                        order_id: "SEED",
                        kind: TransactionKind::AdminAdjustment,
                        message: "seed".into(),
                        at: now,
                    },
                )?;
                let insight = catalog::create_category(tx, "Insight", ProfitType::Unlocked)?;
                let monitor = catalog::create_category(tx, "Monitor", ProfitType::Locked)?;
                let unlocked = catalog::create_product(
                    tx,
                    &NewProduct {
                        category_id: insight,
                        name: "Neura 1",
                        amount: 100_000.0,
                        daily_profit: 1_000.0,
                        duration: 3,
                        required_vip: 0,
                        purchase_limit: 1,
                    },
                )?;
                let locked = catalog::create_product(
                    tx,
                    &NewProduct {
                        category_id: monitor,
                        name: "Monitor 1",
                        amount: 60_000.0,
                        daily_profit: 500.0,
                        duration: 2,
                        required_vip: 0,
                        purchase_limit: 0,
                    },
                )?;
                Ok((sponsor, buyer, unlocked, locked))
            })
            .unwrap();
        Fixture {
            store,
            config: EngineConfig::default(),
            sponsor,
            buyer,
            unlocked,
            locked,
        }
    }

    fn ctx<'a>(config: &'a EngineConfig, now: DateTime<Utc>) -> EventContext<'a> {
        EventContext {
            config,
            order_ids: &UuidOrderIds,
            now,
        }
    }

    #[test]
    fn test_purchase_debits_and_pays_sponsor() {
        let f = fixture();
        let now = Utc::now();
        let receipt = f
            .store
            .with_write_tx(|tx| purchase(tx, &ctx(&f.config, now), f.buyer, f.unlocked))
            .unwrap();

        assert_eq!(receipt.balance_after, 1_900_000.0);
        assert!(receipt.became_active);
        assert_eq!(receipt.referral_payouts.len(), 1);
        assert_eq!(receipt.investment.next_return_at, Some(now + Duration::days(1)));

        f.store
            .with_read_tx(|tx| {
                let sponsor = accounts::get_user(tx, f.sponsor)?;
                assert_eq!(sponsor.income, 15_000.0);
                let buyer = accounts::get_user(tx, f.buyer)?;
                assert_eq!(buyer.total_invest, 100_000.0);
                assert_eq!(buyer.total_invest_vip, 0.0);
                assert_eq!(buyer.investment_status, ActivityStatus::Active);
                let rows = accounts::transactions_for_user(tx, f.buyer)?;
                assert_eq!(rows.last().unwrap().flow, TransactionFlow::Credit);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_purchase_limit_and_vip_gate() {
        let f = fixture();
        let now = Utc::now();
        f.store
            .with_write_tx(|tx| purchase(tx, &ctx(&f.config, now), f.buyer, f.unlocked))
            .unwrap();
        let err = f
            .store
            .with_write_tx(|tx| purchase(tx, &ctx(&f.config, now), f.buyer, f.unlocked))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // Locked purchase lifts the buyer to VIP 1.
        let receipt = f
            .store
            .with_write_tx(|tx| purchase(tx, &ctx(&f.config, now), f.buyer, f.locked))
            .unwrap();
        assert_eq!(receipt.level, 1);
        assert!(!receipt.became_active);
    }

    #[test]
    fn test_insufficient_balance_leaves_no_trace() {
        let f = fixture();
        let now = Utc::now();
        let err = f
            .store
            .with_write_tx(|tx| purchase(tx, &ctx(&f.config, now), f.sponsor, f.unlocked))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        f.store
            .with_read_tx(|tx| {
                assert!(investments::investments_for_user(tx, f.sponsor)?.is_empty());
                assert_eq!(
                    accounts::get_user(tx, f.sponsor)?.investment_status,
                    ActivityStatus::Inactive
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_locked_profit_paid_on_final_day() {
        let f = fixture();
        let now = Utc::now();
        let bought = f
            .store
            .with_write_tx(|tx| purchase(tx, &ctx(&f.config, now), f.buyer, f.locked))
            .unwrap();
        let id = bought.investment.id;

        let day1 = f
            .store
            .with_write_tx(|tx| daily_return(tx, &ctx(&f.config, now + Duration::days(1)), id))
            .unwrap();
        assert_eq!(day1.profit_paid, 0.0);
        assert!(!day1.completed);

        let day2 = f
            .store
            .with_write_tx(|tx| daily_return(tx, &ctx(&f.config, now + Duration::days(2)), id))
            .unwrap();
        assert!(day2.completed);
        assert_eq!(day2.profit_paid, 1_000.0);
        assert_eq!(day2.capital_returned, 60_000.0);
        assert_eq!(day2.investment.total_returned, 1_000.0);

        let err = f
            .store
            .with_write_tx(|tx| daily_return(tx, &ctx(&f.config, now + Duration::days(3)), id))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        f.store
            .with_read_tx(|tx| {
                let buyer = accounts::get_user(tx, f.buyer)?;
                assert_eq!(buyer.balance, 2_000_000.0 + 1_000.0);
                // Sponsor: 15% referral of 60k plus 3% rebate on each of two days.
                let sponsor = accounts::get_user(tx, f.sponsor)?;
                assert_eq!(sponsor.income, 9_000.0 + 15.0 + 15.0);
                Ok(())
            })
            .unwrap();
    }
}
