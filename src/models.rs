use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Users are addressed by integer id everywhere; trees hold ids, never rows.
pub type UserId = i64;

/// Currency amount (platform units, two decimal places).
pub type Amount = f64;

/// Round to the ledger's precision of two decimals.
#[inline]
pub fn round_currency(value: Amount) -> Amount {
    (value * 100.0).round() / 100.0
}

/// `amount * pct / 100`, rounded to ledger precision.
#[inline]
pub fn percent_of(amount: Amount, pct: f64) -> Amount {
    round_currency(amount * pct / 100.0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvestmentStatus {
    Running,
    Completed,
    Suspended,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Running => "Running",
            InvestmentStatus::Completed => "Completed",
            InvestmentStatus::Suspended => "Suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Running" => Some(InvestmentStatus::Running),
            "Completed" => Some(InvestmentStatus::Completed),
            "Suspended" => Some(InvestmentStatus::Suspended),
            _ => None,
        }
    }
}

/// Whether a user currently holds (or has ever bought) an investment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActivityStatus {
    Active,
    Inactive,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Active => "Active",
            ActivityStatus::Inactive => "Inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(ActivityStatus::Active),
            "Inactive" => Some(ActivityStatus::Inactive),
            _ => None,
        }
    }
}

/// Category profit type: when daily profit reaches the investor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfitType {
    /// Paid out every day to `income`.
    Unlocked,
    /// Accrued; the full total is paid to `balance` on completion.
    Locked,
}

impl ProfitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfitType::Unlocked => "unlocked",
            ProfitType::Locked => "locked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unlocked" => Some(ProfitType::Unlocked),
            "locked" => Some(ProfitType::Locked),
            _ => None,
        }
    }
}

/// Which of the two spendable user ledgers a movement touches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceKind {
    Balance,
    Income,
}

impl BalanceKind {
    pub fn column(&self) -> &'static str {
        match self {
            BalanceKind::Balance => "balance",
            BalanceKind::Income => "income",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionFlow {
    /// Money into the user's ledger.
    Debit,
    /// Money out of the user's ledger.
    Credit,
}

impl TransactionFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionFlow::Debit => "debit",
            TransactionFlow::Credit => "credit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(TransactionFlow::Debit),
            "credit" => Some(TransactionFlow::Credit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Investment,
    PurchaseBonus,
    Referral,
    Rebate,
    Return,
    CapitalReturn,
    AdminAdjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Investment => "investment",
            TransactionKind::PurchaseBonus => "purchase_bonus",
            TransactionKind::Referral => "referral",
            TransactionKind::Rebate => "rebate",
            TransactionKind::Return => "return",
            TransactionKind::CapitalReturn => "capital_return",
            TransactionKind::AdminAdjustment => "admin_adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "investment" => Some(TransactionKind::Investment),
            "purchase_bonus" => Some(TransactionKind::PurchaseBonus),
            "referral" => Some(TransactionKind::Referral),
            "rebate" => Some(TransactionKind::Rebate),
            "return" => Some(TransactionKind::Return),
            "capital_return" => Some(TransactionKind::CapitalReturn),
            "admin_adjustment" => Some(TransactionKind::AdminAdjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub balance: Amount,
    pub income: Amount,
    /// VIP tier, derived from `total_invest_vip`.
    pub level: u32,
    pub total_invest: Amount,
    pub total_invest_vip: Amount,
    /// Direct sponsor (referral forest, not the binary tree).
    pub reff_by: Option<UserId>,
    pub investment_status: ActivityStatus,
}

/// Binary placement row. `left_id`/`right_id` are user ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryNode {
    pub user_id: UserId,
    pub left_id: Option<UserId>,
    pub right_id: Option<UserId>,
}

impl BinaryNode {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            left_id: None,
            right_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub profit_type: ProfitType,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: Amount,
    pub daily_profit: Amount,
    pub duration: u32,
    pub required_vip: u32,
    /// 0 means unlimited.
    pub purchase_limit: u32,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Investment {
    pub id: i64,
    pub user_id: UserId,
    pub product_id: i64,
    pub category_id: i64,
    pub amount: Amount,
    pub daily_profit: Amount,
    pub duration: u32,
    pub total_paid: u32,
    pub total_returned: Amount,
    pub status: InvestmentStatus,
    pub order_id: String,
    pub next_return_at: Option<DateTime<Utc>>,
    pub last_return_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reward {
    pub id: i64,
    pub name: String,
    pub omset_target: Amount,
    /// Period length in days.
    pub duration: u32,
    pub is_accumulative: bool,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardProgress {
    pub user_id: UserId,
    pub reward_id: i64,
    pub omset_left: Amount,
    pub omset_right: Amount,
    pub total_omset: Amount,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub started_at: DateTime<Utc>,
    /// Absent for accumulative rewards.
    pub expires_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
}

/// A row of the money ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerTransaction {
    pub id: i64,
    pub user_id: UserId,
    pub amount: Amount,
    pub order_id: String,
    pub flow: TransactionFlow,
    pub kind: TransactionKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
