//! Per-target cooldowns and recurring scheduled exception windows.
//!
//! Evaluation order for a target:
//! 1. live cooldown: allowed until it ends, re-check at its end
//! 2. elapsed cooldown: entry removed, target blocked
//! 3. inside a scheduled window: allowed, re-check at the window end
//! 4. otherwise undecided; permanent lists decide

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::clock::MINUTES_PER_DAY;
use crate::error::ValidationError;
use crate::target::Target;

const MILLIS_PER_MINUTE: u64 = 60_000;

/// A daily time range in minutes from local midnight.
///
/// `start <= now < end`, or when `start > end` the range wraps midnight and
/// matches `now >= start || now < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteWindow {
    pub start: u32,
    pub end: u32,
}

impl MinuteWindow {
    pub fn new(start: u32, end: u32) -> Result<Self, ValidationError> {
        if start > MINUTES_PER_DAY {
            return Err(ValidationError::MinuteOfDay {
                field: "start".into(),
                value: start,
            });
        }
        if end > MINUTES_PER_DAY {
            return Err(ValidationError::MinuteOfDay {
                field: "end".into(),
                value: end,
            });
        }
        if start == end {
            return Err(ValidationError::InvalidValue {
                field: "end".into(),
                message: "window must not end where it starts".into(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.wraps_midnight() {
            minute_of_day >= self.start || minute_of_day < self.end
        } else {
            self.start <= minute_of_day && minute_of_day < self.end
        }
    }

    /// Minutes from `minute_of_day` until this window closes.
    pub fn minutes_until_end(&self, minute_of_day: u32) -> u32 {
        if self.end > minute_of_day {
            self.end - minute_of_day
        } else {
            self.end + MINUTES_PER_DAY - minute_of_day
        }
    }
}

/// Cheat hours for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledWindow {
    pub target: String,
    pub windows: Vec<MinuteWindow>,
}

/// What the tracker concluded for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// Cooldown still running; allow and re-check at `until` (uptime ms).
    CooldownActive { until: u64 },
    /// Cooldown has elapsed and was removed; block.
    CooldownElapsed,
    /// Inside a scheduled window; allow and re-check at `until` (uptime ms).
    WithinWindow { until: u64 },
    /// Nothing to say; defer to the permanent lists.
    Undecided,
}

impl TrackerOutcome {
    /// Uptime at which the caller must force a re-check, if any.
    pub fn recheck_at(&self) -> Option<u64> {
        match self {
            TrackerOutcome::CooldownActive { until } | TrackerOutcome::WithinWindow { until } => {
                Some(*until)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CooldownTracker {
    /// target key -> end uptime ms
    cooldowns: Mutex<HashMap<String, u64>>,
    /// target key -> windows
    windows: RwLock<HashMap<String, Vec<MinuteWindow>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn cooldowns(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.cooldowns.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put_cooldown(&self, target: &Target, end_uptime: u64) {
        let key = target.key();
        tracing::debug!(key = %key, end_uptime, "cooldown granted");
        self.cooldowns().insert(key, end_uptime);
    }

    pub fn remove_cooldown(&self, target: &Target) -> Option<u64> {
        self.cooldowns().remove(&target.key())
    }

    pub fn cooldown_end(&self, target: &Target) -> Option<u64> {
        self.cooldowns().get(&target.key()).copied()
    }

    /// Replace all scheduled windows. Windows for the same target accumulate.
    pub fn refresh_windows(&self, scheduled: &[ScheduledWindow]) {
        let mut map: HashMap<String, Vec<MinuteWindow>> = HashMap::new();
        for entry in scheduled {
            map.entry(entry.target.trim().to_lowercase())
                .or_default()
                .extend(entry.windows.iter().copied());
        }
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        *windows = map;
    }

    /// `minute_of_day` and `millis_into_minute` together give the local time;
    /// the second one makes window-end re-checks land on the minute boundary.
    pub fn evaluate(
        &self,
        target: &Target,
        uptime_now: u64,
        minute_of_day: u32,
        millis_into_minute: u64,
    ) -> TrackerOutcome {
        let key = target.key();

        {
            let mut cooldowns = self.cooldowns();
            if let Some(&end) = cooldowns.get(&key) {
                if uptime_now < end {
                    return TrackerOutcome::CooldownActive { until: end };
                }
                cooldowns.remove(&key);
                tracing::debug!(key = %key, "cooldown elapsed");
                return TrackerOutcome::CooldownElapsed;
            }
        }

        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        let app_key = target.app_id.as_deref().map(str::to_lowercase);
        let candidates = windows
            .get(&key)
            .into_iter()
            .chain(app_key.as_ref().and_then(|k| windows.get(k)))
            .flatten();

        for window in candidates {
            if window.contains(minute_of_day) {
                let remaining = window.minutes_until_end(minute_of_day) as u64;
                let until = (uptime_now + remaining * MILLIS_PER_MINUTE)
                    .saturating_sub(millis_into_minute.min(MILLIS_PER_MINUTE - 1));
                tracing::debug!(key = %key, remaining_min = remaining, "inside scheduled window");
                return TrackerOutcome::WithinWindow { until };
            }
        }

        TrackerOutcome::Undecided
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn window(start: u32, end: u32) -> MinuteWindow {
        MinuteWindow::new(start, end).unwrap()
    }

    #[test]
    fn wraparound_window_matches_both_sides_of_midnight() {
        let w = window(1380, 60);
        assert!(w.contains(1400));
        assert!(w.contains(30));
        assert!(!w.contains(700));
        assert!(!w.contains(60));
        assert!(w.contains(1380));
    }

    #[test]
    fn simple_window_is_half_open() {
        let w = window(540, 600);
        assert!(w.contains(540));
        assert!(w.contains(599));
        assert!(!w.contains(600));
    }

    #[test]
    fn whole_day_window() {
        let w = window(0, 1440);
        assert!(w.contains(0));
        assert!(w.contains(1439));
    }

    #[test]
    fn minutes_until_end_across_midnight() {
        let w = window(1380, 60);
        assert_eq!(w.minutes_until_end(1400), 100);
        assert_eq!(w.minutes_until_end(30), 30);
    }

    #[test]
    fn out_of_range_minute_rejected() {
        assert!(MinuteWindow::new(1500, 10).is_err());
        assert!(MinuteWindow::new(10, 1441).is_err());
    }

    #[test]
    fn empty_window_rejected() {
        assert!(matches!(
            MinuteWindow::new(600, 600),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(MinuteWindow::new(0, 1440).is_ok());
    }

    #[test]
    fn cooldown_allows_then_blocks_and_removes() {
        let tracker = CooldownTracker::new();
        let t = Target::app("com.video");
        let now = 10_000;
        tracker.put_cooldown(&t, now + 5_000);

        assert_eq!(
            tracker.evaluate(&t, now + 1_000, 0, 0),
            TrackerOutcome::CooldownActive { until: now + 5_000 }
        );
        assert_eq!(tracker.evaluate(&t, now + 6_000, 0, 0), TrackerOutcome::CooldownElapsed);
        assert_eq!(tracker.cooldown_end(&t), None);
        assert_eq!(tracker.evaluate(&t, now + 7_000, 0, 0), TrackerOutcome::Undecided);
    }

    #[test]
    fn cooldown_takes_precedence_over_window() {
        let tracker = CooldownTracker::new();
        let t = Target::app("com.video");
        tracker.refresh_windows(&[ScheduledWindow {
            target: "com.video".into(),
            windows: vec![window(0, 1440)],
        }]);
        tracker.put_cooldown(&t, 2_000);
        assert_eq!(
            tracker.evaluate(&t, 1_000, 100, 0),
            TrackerOutcome::CooldownActive { until: 2_000 }
        );
    }

    #[test]
    fn window_yields_absolute_recheck_time() {
        let tracker = CooldownTracker::new();
        tracker.refresh_windows(&[ScheduledWindow {
            target: "Com.Video".into(),
            windows: vec![window(600, 700)],
        }]);
        let outcome = tracker.evaluate(&Target::app("com.video"), 1_000, 690, 0);
        assert_eq!(outcome, TrackerOutcome::WithinWindow { until: 1_000 + 10 * 60_000 });
        assert_eq!(outcome.recheck_at(), Some(601_000));
    }

    #[test]
    fn window_recheck_lands_on_the_closing_minute() {
        let tracker = CooldownTracker::new();
        tracker.refresh_windows(&[ScheduledWindow {
            target: "com.video".into(),
            windows: vec![window(540, 600)],
        }]);
        // 09:59:40 local: the window closes 20 s from now.
        let outcome = tracker.evaluate(&Target::app("com.video"), 1_000, 599, 40_000);
        assert_eq!(outcome, TrackerOutcome::WithinWindow { until: 1_000 + 20_000 });
    }

    #[test]
    fn refresh_replaces_windows() {
        let tracker = CooldownTracker::new();
        let t = Target::app("com.video");
        tracker.refresh_windows(&[ScheduledWindow {
            target: "com.video".into(),
            windows: vec![window(0, 1440)],
        }]);
        tracker.refresh_windows(&[]);
        assert_eq!(tracker.evaluate(&t, 0, 100, 0), TrackerOutcome::Undecided);
    }

    #[test]
    fn url_target_uses_app_windows() {
        let tracker = CooldownTracker::new();
        tracker.refresh_windows(&[ScheduledWindow {
            target: "com.android.chrome".into(),
            windows: vec![window(0, 1440)],
        }]);
        let t = Target::new(Some("com.android.chrome".into()), Some("https://a.b".into()));
        assert!(matches!(tracker.evaluate(&t, 0, 5, 0), TrackerOutcome::WithinWindow { .. }));
    }

    proptest! {
        #[test]
        fn wrapping_window_is_complement_of_gap(start in 1u32..1440, end in 0u32..1440, now in 0u32..1440) {
            prop_assume!(start > end);
            let w = window(start, end);
            let gap = window(end, start);
            prop_assert_eq!(w.contains(now), !gap.contains(now));
        }

        #[test]
        fn remaining_minutes_never_exceed_a_day(start in 0u32..1440, end in 0u32..=1440, now in 0u32..1440) {
            prop_assume!(start != end);
            let w = window(start, end);
            if w.contains(now) {
                let left = w.minutes_until_end(now);
                prop_assert!(left >= 1 && left <= MINUTES_PER_DAY);
            }
        }
    }
}
