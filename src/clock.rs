//! Wall-clock access, as a trait so round scheduling and era-timing tests
//! can run against a fake clock instead of `std::time`/`chrono` directly.

use chrono::{DateTime, Utc};

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

/// Fixed or steppable clock for deterministic tests of round scheduling
/// and era transitions.
pub struct FixedClock {
  now: std::sync::atomic::AtomicI64,
}

impl FixedClock {
  pub fn new(now: DateTime<Utc>) -> Self {
    Self { now: std::sync::atomic::AtomicI64::new(now.timestamp_millis()) }
  }

  pub fn advance(&self, millis: i64) {
    self.now.fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    let millis = self.now.load(std::sync::atomic::Ordering::SeqCst);
    DateTime::from_timestamp_millis(millis).expect("valid millis timestamp")
  }
}
