//! Time abstraction and millisecond helpers
//!
//! All persisted times are milliseconds since the Unix epoch (UTC).

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Milliseconds in one minute
pub const MINUTE_MILLIS: i64 = 60 * 1000;

/// Milliseconds in one hour
pub const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;

/// Milliseconds in one day
pub const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Round a timestamp down to the start of its minute
pub fn truncate_to_minute(millis: i64) -> i64 {
    millis.div_euclid(MINUTE_MILLIS) * MINUTE_MILLIS
}

/// Convert milliseconds to a UTC datetime
pub fn to_utc(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Time abstraction for testability
///
/// Rotation cadence and the retention horizon are computed from this clock,
/// so tests can drive day boundaries without sleeping.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in milliseconds since the epoch
    fn now_millis(&self) -> i64;

    /// Current UTC datetime
    fn now_utc(&self) -> DateTime<Utc> {
        to_utc(self.now_millis()).unwrap_or_default()
    }
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward, returning the new time
    pub fn advance(&self, delta_millis: i64) -> i64 {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst) + delta_millis
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_minute() {
        assert_eq!(truncate_to_minute(0), 0);
        assert_eq!(truncate_to_minute(59_999), 0);
        assert_eq!(truncate_to_minute(60_000), 60_000);
        assert_eq!(truncate_to_minute(DAY_MILLIS + 61_500), DAY_MILLIS + 60_000);
        assert_eq!(truncate_to_minute(-1), -MINUTE_MILLIS);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        assert_eq!(clock.advance(DAY_MILLIS), 1_000 + DAY_MILLIS);
        clock.set(5);
        assert_eq!(clock.now_millis(), 5);
        assert_eq!(clock.now_utc().timestamp_millis(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
