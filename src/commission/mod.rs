//! Commission cascade and the investment events that trigger it.

pub mod cascade;
pub mod investment;

pub use cascade::CascadePayout;
pub use investment::{EventContext, PurchaseReceipt, ReturnReceipt};
