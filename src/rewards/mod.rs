//! Reward progress tracking: accumulate, complete, claim and expire.

pub mod manager;
pub mod progress;

pub use manager::{RefreshSummary, RewardStatus};
pub use progress::RefreshOutcome;
