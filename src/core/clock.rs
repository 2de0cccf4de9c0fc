//! Injectable time source.
//!
//! TTL expiry and retry scheduling both compare stored timestamps against
//! "now". Taking the current time through a trait keeps those comparisons
//! deterministic in tests, which drive a manual clock instead of sleeping.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current moment.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
