//! Compensation engine facade.
//!
//! Every public operation is one unit of work: writes run in their own
//! immediate transaction, display reads in a read transaction. Batch jobs run
//! each item separately and keep going past failures.

use crate::binary::omset::{self, SubtreeOmset};
use crate::binary::placement::{self, Placement};
use crate::binary::ranking::{self, BinaryStructure, MemberCounts, TopMember};
use crate::clock::{Clock, OrderIds, SystemClock, UuidOrderIds};
use crate::commission::investment::{self as events, EventContext};
use crate::commission::{PurchaseReceipt, ReturnReceipt};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::accounts::{self, Movement, PlacedUser};
use crate::ledger::catalog::{self, RewardUpdate};
use crate::ledger::progress::{self as progress_rows, ProgressListing};
use crate::ledger::{investments, LedgerStore};
use crate::models::{Amount, BalanceKind, Reward, RewardProgress, TransactionKind, User, UserId};
use crate::referral::{self, TeamLevel};
use crate::rewards::manager::{self, RefreshSummary, RewardStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Direction of a manual balance adjustment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdjustDirection {
    Add,
    Less,
}

/// Outcome of a batch pass.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BatchReport {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub completed: usize,
}

#[derive(Clone)]
pub struct CompensationEngine {
    store: LedgerStore,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    order_ids: Arc<dyn OrderIds>,
}

impl CompensationEngine {
    pub fn new(store: LedgerStore, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            order_ids: Arc::new(UuidOrderIds),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_order_ids(mut self, order_ids: Arc<dyn OrderIds>) -> Self {
        self.order_ids = order_ids;
        self
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn event_context(&self) -> EventContext<'_> {
        EventContext {
            config: &self.config,
            order_ids: self.order_ids.as_ref(),
            now: self.clock.now(),
        }
    }

    pub fn register_user(&self, name: &str, reff_by: Option<UserId>) -> EngineResult<UserId> {
        let now = self.clock.now();
        self.store
            .with_write_tx(|tx| accounts::create_user(tx, name, reff_by, now))
    }

    pub fn user(&self, user_id: UserId) -> EngineResult<User> {
        self.store.with_read_tx(|tx| accounts::get_user(tx, user_id))
    }

    // -----------------------------------------------------------------------
    // Binary tree
    // -----------------------------------------------------------------------

    pub fn place_in_binary_tree(
        &self,
        sponsor: UserId,
        new_user: UserId,
    ) -> EngineResult<Placement> {
        self.store
            .with_write_tx(|tx| placement::place(tx, sponsor, new_user))
    }

    pub fn compute_subtree_omset(&self, user_id: UserId) -> EngineResult<SubtreeOmset> {
        self.store
            .with_read_tx(|tx| omset::subtree_omset(tx, user_id))
    }

    pub fn compute_own_omset(&self, user_id: UserId) -> EngineResult<Amount> {
        self.store.with_read_tx(|tx| omset::user_omset(tx, user_id))
    }

    pub fn top_members_at_level(
        &self,
        user_id: UserId,
        level: u32,
        limit: usize,
    ) -> EngineResult<Vec<TopMember>> {
        self.store
            .with_read_tx(|tx| ranking::top_members(tx, user_id, level, limit))
    }

    pub fn binary_structure(&self, user_id: UserId) -> EngineResult<BinaryStructure> {
        self.store
            .with_read_tx(|tx| ranking::structure(tx, user_id))
    }

    pub fn binary_member_counts(&self, user_id: UserId) -> EngineResult<MemberCounts> {
        self.store
            .with_read_tx(|tx| ranking::member_counts(tx, user_id))
    }

    /// Users that hold a binary position.
    pub fn placed_users(&self) -> EngineResult<Vec<PlacedUser>> {
        self.store.with_read_tx(|tx| accounts::placed_users(tx))
    }

    // -----------------------------------------------------------------------
    // Rewards
    // -----------------------------------------------------------------------

    pub fn initialize_reward_progress(&self, user_id: UserId) -> EngineResult<usize> {
        let now = self.clock.now();
        self.store
            .with_write_tx(|tx| manager::initialize(tx, user_id, now))
    }

    pub fn refresh_reward_progress(&self, user_id: UserId) -> EngineResult<RefreshSummary> {
        let now = self.clock.now();
        self.store
            .with_write_tx(|tx| manager::refresh_user(tx, user_id, now))
    }

    pub fn claim_reward(&self, user_id: UserId, reward_id: i64) -> EngineResult<RewardProgress> {
        let now = self.clock.now();
        self.store
            .with_write_tx(|tx| manager::claim(tx, user_id, reward_id, now))
    }

    /// Active rewards with the user's progress; creates missing rows.
    pub fn reward_overview(&self, user_id: UserId) -> EngineResult<Vec<RewardStatus>> {
        let now = self.clock.now();
        self.store.with_write_tx(|tx| {
            accounts::get_user(tx, user_id)?;
            manager::overview(tx, user_id, now)
        })
    }

    pub fn update_reward(&self, reward_id: i64, update: &RewardUpdate) -> EngineResult<Reward> {
        self.store
            .with_write_tx(|tx| catalog::update_reward(tx, reward_id, update))
    }

    /// Every stored progress row with user and reward names.
    pub fn all_reward_progress(&self) -> EngineResult<Vec<ProgressListing>> {
        self.store.with_read_tx(|tx| progress_rows::all_progress(tx))
    }

    /// Refresh every user with an active investment. Per-user failures are
    /// logged and counted.
    pub fn refresh_all_reward_progress(&self) -> EngineResult<BatchReport> {
        let users = self.store.with_read_tx(|tx| accounts::active_user_ids(tx))?;
        let mut report = BatchReport {
            selected: users.len(),
            ..Default::default()
        };

        for user_id in users {
            match self.retry_once(|| self.refresh_reward_progress(user_id)) {
                Ok(summary) => {
                    report.succeeded += 1;
                    report.completed += summary.completed;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Reward refresh failed for user {}: {}", user_id, e);
                }
            }
        }

        info!(
            "🔄 Reward refresh: {} users, {} ok, {} failed, {} newly completed",
            report.selected, report.succeeded, report.failed, report.completed
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Investments and commissions
    // -----------------------------------------------------------------------

    pub fn apply_investment_purchase(
        &self,
        user_id: UserId,
        product_id: i64,
    ) -> EngineResult<PurchaseReceipt> {
        let ctx = self.event_context();
        self.store
            .with_write_tx(|tx| events::purchase(tx, &ctx, user_id, product_id))
    }

    pub fn apply_daily_return(&self, investment_id: i64) -> EngineResult<ReturnReceipt> {
        let ctx = self.event_context();
        self.store
            .with_write_tx(|tx| events::daily_return(tx, &ctx, investment_id))
    }

    /// Pay every running investment that is due. One transaction per
    /// investment; a failed item does not stop the batch.
    pub fn run_daily_returns(&self) -> EngineResult<BatchReport> {
        let now = self.clock.now();
        let due = self
            .store
            .with_read_tx(|tx| investments::due_investment_ids(tx, now))?;
        let mut report = BatchReport {
            selected: due.len(),
            ..Default::default()
        };

        for investment_id in due {
            match self.retry_once(|| self.apply_daily_return(investment_id)) {
                Ok(receipt) => {
                    report.succeeded += 1;
                    if receipt.completed {
                        report.completed += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Daily return failed for investment {}: {}", investment_id, e);
                }
            }
        }

        if report.failed > 0 && report.succeeded == 0 {
            error!(
                "❌ Daily returns: all {} due investments failed",
                report.failed
            );
        } else {
            info!(
                "📅 Daily returns: {} due, {} paid, {} completed, {} failed",
                report.selected, report.succeeded, report.completed, report.failed
            );
        }
        Ok(report)
    }

    /// Manual credit or debit of a user's balance or income.
    pub fn adjust_balance(
        &self,
        user_id: UserId,
        ledger: BalanceKind,
        direction: AdjustDirection,
        amount: Amount,
        note: Option<&str>,
    ) -> EngineResult<Amount> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(EngineError::invalid_state(format!(
                "adjustment amount must be positive, got {}",
                amount
            )));
        }
        let now = self.clock.now();
        let order_id = self.order_ids.next_order_id(user_id);
        let verb = match direction {
            AdjustDirection::Add => "added to",
            AdjustDirection::Less => "deducted from",
        };
        let message = note
            .map(str::to_string)
            .unwrap_or_else(|| format!("Admin {} {}", verb, ledger.column()));

        let next = self.store.with_write_tx(|tx| {
            let movement = Movement {
                user_id,
                ledger,
                amount,
                order_id: &order_id,
                kind: TransactionKind::AdminAdjustment,
                message,
                at: now,
            };
            match direction {
                AdjustDirection::Add => accounts::credit(tx, movement),
                AdjustDirection::Less => accounts::debit(tx, movement),
            }
        })?;

        info!(
            "🛠️  {:.2} {} user {} {} (now {:.2})",
            amount,
            verb,
            user_id,
            ledger.column(),
            next
        );
        Ok(next)
    }

    pub fn team_levels(&self, user_id: UserId) -> EngineResult<Vec<TeamLevel>> {
        self.store
            .with_read_tx(|tx| referral::team_levels(tx, user_id))
    }

    /// Run `op`, and once more if the store reported a busy/locked database.
    fn retry_once<T>(&self, op: impl Fn() -> EngineResult<T>) -> EngineResult<T> {
        match op() {
            Err(e) if e.is_retryable() => {
                warn!("Store busy, retrying once: {}", e);
                op()
            }
            other => other,
        }
    }
}
