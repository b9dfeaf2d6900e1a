//! Time sources.
//!
//! Three clocks are in play: wall-clock epoch millis (rule, cache and focus
//! expiry), a monotonic uptime (cooldowns and re-check timers) and the
//! local minute of day (scheduled windows and geo policies).

use chrono::{Local, Timelike, Utc};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

pub trait Clock: Send + Sync {
    /// Wall-clock time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Monotonic milliseconds since an arbitrary process-local origin.
    fn uptime_millis(&self) -> u64;

    /// Local time of day, `0..1440`.
    fn minute_of_day(&self) -> u32;

    /// Milliseconds already elapsed in the current minute, `0..60_000`.
    fn millis_into_minute(&self) -> u64;
}

/// The real clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn uptime_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn minute_of_day(&self) -> u32 {
        let now = Local::now();
        now.hour() * 60 + now.minute()
    }

    fn millis_into_minute(&self) -> u64 {
        let now = Local::now();
        // nanosecond() exceeds one second during a leap second
        let millis = (now.nanosecond() / 1_000_000).min(999);
        u64::from(now.second()) * 1_000 + u64::from(millis)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_millis: AtomicI64,
    uptime_millis: AtomicU64,
    minute_of_day: AtomicU32,
    millis_into_minute: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: i64, uptime_millis: u64, minute_of_day: u32) -> Self {
        Self {
            now_millis: AtomicI64::new(now_millis),
            uptime_millis: AtomicU64::new(uptime_millis),
            minute_of_day: AtomicU32::new(minute_of_day % MINUTES_PER_DAY),
            millis_into_minute: AtomicU64::new(0),
        }
    }

    /// Move both the wall clock and the uptime forward.
    pub fn advance_millis(&self, ms: u64) {
        self.now_millis.fetch_add(ms as i64, Ordering::SeqCst);
        self.uptime_millis.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_minute_of_day(&self, minute: u32) {
        self.minute_of_day
            .store(minute % MINUTES_PER_DAY, Ordering::SeqCst);
    }

    pub fn set_uptime_millis(&self, ms: u64) {
        self.uptime_millis.store(ms, Ordering::SeqCst);
    }

    pub fn set_millis_into_minute(&self, ms: u64) {
        self.millis_into_minute.store(ms % 60_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }

    fn uptime_millis(&self) -> u64 {
        self.uptime_millis.load(Ordering::SeqCst)
    }

    fn minute_of_day(&self) -> u32 {
        self.minute_of_day.load(Ordering::SeqCst)
    }

    fn millis_into_minute(&self) -> u64 {
        self.millis_into_minute.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_minute_of_day_in_range() {
        let clock = SystemClock::new();
        assert!(clock.minute_of_day() < MINUTES_PER_DAY);
    }

    #[test]
    fn system_uptime_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.uptime_millis();
        let b = clock.uptime_millis();
        assert!(b >= a);
    }

    #[test]
    fn manual_clock_advances_both_timelines() {
        let clock = ManualClock::new(1_000, 50, 600);
        clock.advance_millis(250);
        assert_eq!(clock.now_millis(), 1_250);
        assert_eq!(clock.uptime_millis(), 300);
        assert_eq!(clock.minute_of_day(), 600);
    }

    #[test]
    fn system_clock_millis_into_minute_in_range() {
        assert!(SystemClock::new().millis_into_minute() < 60_000);
    }

    #[test]
    fn manual_millis_into_minute_defaults_to_start_of_minute() {
        let clock = ManualClock::new(0, 0, 600);
        assert_eq!(clock.millis_into_minute(), 0);
        clock.set_millis_into_minute(45_500);
        assert_eq!(clock.millis_into_minute(), 45_500);
    }

    #[test]
    fn manual_minute_wraps() {
        let clock = ManualClock::default();
        clock.set_minute_of_day(1445);
        assert_eq!(clock.minute_of_day(), 5);
    }
}
