//! Time and order-reference sources consumed by the engine.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::UserId;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Unique reference for ledger transaction rows.
pub trait OrderIds: Send + Sync {
    fn next_order_id(&self, user_id: UserId) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidOrderIds;

impl OrderIds for UuidOrderIds {
    fn next_order_id(&self, user_id: UserId) -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("INV{}{}", user_id, &uuid[..12].to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::days(2));
        assert_eq!(clock.now() - start, Duration::days(2));
    }

    #[test]
    fn test_order_ids_are_unique_and_tagged() {
        let ids = UuidOrderIds;
        let a = ids.next_order_id(42);
        let b = ids.next_order_id(42);
        assert!(a.starts_with("INV42"));
        assert_ne!(a, b);
    }
}
