//! Durable state: users, placements, catalog, investments, reward progress and
//! the money ledger.

pub mod accounts;
pub mod catalog;
pub mod investments;
pub mod progress;
pub mod store;

pub use store::LedgerStore;
