//! SQLite-backed ledger store.
//!
//! One connection behind a `parking_lot::Mutex`. Every money movement runs in a
//! `BEGIN IMMEDIATE` transaction, which takes the database write lock up front
//! and so serializes debit/credit sequences the way row locks would.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{types::Type, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    balance REAL NOT NULL DEFAULT 0,
    income REAL NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 0,
    total_invest REAL NOT NULL DEFAULT 0,
    total_invest_vip REAL NOT NULL DEFAULT 0,
    reff_by INTEGER,
    investment_status TEXT NOT NULL DEFAULT 'Inactive',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_reff_by ON users(reff_by);
CREATE INDEX IF NOT EXISTS idx_users_investment_status ON users(investment_status);

-- One row per placed user; child columns hold user ids
CREATE TABLE IF NOT EXISTS binary_nodes (
    user_id INTEGER PRIMARY KEY,
    left_id INTEGER UNIQUE,
    right_id INTEGER UNIQUE
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    profit_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'Active'
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    amount REAL NOT NULL,
    daily_profit REAL NOT NULL,
    duration INTEGER NOT NULL,
    required_vip INTEGER NOT NULL DEFAULT 0,
    purchase_limit INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'Active'
);

CREATE TABLE IF NOT EXISTS investments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    amount REAL NOT NULL,
    daily_profit REAL NOT NULL,
    duration INTEGER NOT NULL,
    total_paid INTEGER NOT NULL DEFAULT 0,
    total_returned REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    order_id TEXT NOT NULL UNIQUE,
    next_return_at TEXT,
    last_return_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_investments_user_status ON investments(user_id, status);
CREATE INDEX IF NOT EXISTS idx_investments_due ON investments(status, next_return_at);

CREATE TABLE IF NOT EXISTS rewards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    omset_target REAL NOT NULL,
    duration INTEGER NOT NULL,
    is_accumulative INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'Active'
);

CREATE TABLE IF NOT EXISTS reward_progress (
    user_id INTEGER NOT NULL,
    reward_id INTEGER NOT NULL,
    omset_left REAL NOT NULL DEFAULT 0,
    omset_right REAL NOT NULL DEFAULT 0,
    total_omset REAL NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0,
    is_claimed INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    expires_at TEXT,
    last_reset_at TEXT,
    PRIMARY KEY (user_id, reward_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_reward_progress_reward ON reward_progress(reward_id);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    amount REAL NOT NULL,
    order_id TEXT NOT NULL,
    flow TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, created_at DESC);
"#;

/// Durable owner of users, placements, investments, rewards and the money ledger.
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn open(db_path: &str) -> EngineResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)?;
        let store = Self::init(conn)?;

        let users: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap_or(0);
        info!("🗄️  Ledger store opened at {} ({} users)", db_path, users);

        Ok(store)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" && journal_mode.to_lowercase() != "memory" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside a write-locked transaction. Commits on `Ok`, rolls back
    /// on `Err` (the transaction is dropped without commit).
    pub fn with_write_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against a consistent snapshot.
    pub fn with_read_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they compare
/// lexicographically in SQL.
pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_ts_from_sql(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| ts_from_sql(idx, &s)).transpose()
}

/// Map a stored enum label back to its type, failing the row on unknown text.
pub(crate) fn enum_from_sql<T>(
    idx: usize,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown label '{}'", raw).into(),
        )
    })
}

/// Shorthand for the "row must exist" lookups.
pub(crate) fn require<T>(found: Option<T>, what: impl FnOnce() -> String) -> EngineResult<T> {
    found.ok_or_else(|| EngineError::NotFound(what()))
}
