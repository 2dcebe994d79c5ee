//! Referral Compensation Engine
//!
//! Binary placement, bounded-depth omset, reward progress and the three-level
//! commission cascade over a SQLite ledger. The service binary in `main.rs`
//! wraps [`engine::CompensationEngine`] in an HTTP API and two polling jobs.

pub mod api;
pub mod binary;
pub mod clock;
pub mod commission;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod referral;
pub mod rewards;

pub use config::EngineConfig;
pub use engine::CompensationEngine;
pub use error::{EngineError, EngineResult};
pub use ledger::LedgerStore;
