//! Forced re-check timers.
//!
//! Cooldowns and scheduled windows end at a known uptime. Each end gets a
//! timer task that emits a [`RecheckRequest`] when it fires; the receiver
//! feeds it back into the engine. At most one timer is outstanding per
//! target: scheduling again replaces the previous timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::target::Target;

/// A timer fired for `target`; `due_at` is the uptime it was set for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecheckRequest {
    pub target: Target,
    pub due_at: u64,
}

struct PendingTimer {
    due_at: u64,
    handle: JoinHandle<()>,
}

pub struct RecheckScheduler {
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<RecheckRequest>,
    pending: Mutex<HashMap<String, PendingTimer>>,
}

impl RecheckScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<RecheckRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            clock,
            tx,
            pending: Mutex::new(HashMap::new()),
        };
        (scheduler, rx)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingTimer>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arrange a re-check of `target` at uptime `due_at`, replacing any
    /// timer already pending for it. A due time in the past fires at once.
    ///
    /// Must be called from within a tokio runtime; outside one the request
    /// is dropped with a warning.
    pub fn schedule(&self, target: &Target, due_at: u64) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(key = %target, error = %e, "no runtime; re-check not scheduled");
                return;
            }
        };

        let delay = Duration::from_millis(due_at.saturating_sub(self.clock.uptime_millis()));
        let tx = self.tx.clone();
        let request = RecheckRequest {
            target: target.clone(),
            due_at,
        };
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(request).is_err() {
                tracing::debug!("re-check receiver dropped");
            }
        });

        let key = target.key();
        let mut pending = self.pending();
        pending.retain(|_, timer| !timer.handle.is_finished());
        if let Some(previous) = pending.insert(key, PendingTimer { due_at, handle }) {
            previous.handle.abort();
        }
        tracing::debug!(key = %target, due_at, delay_ms = delay.as_millis() as u64, "re-check scheduled");
    }

    /// Cancel the pending timer for `target`. Returns false if none was
    /// outstanding.
    pub fn cancel(&self, target: &Target) -> bool {
        match self.pending().remove(&target.key()) {
            Some(timer) => {
                let outstanding = !timer.handle.is_finished();
                timer.handle.abort();
                outstanding
            }
            None => false,
        }
    }

    /// Uptime of the outstanding timer for `target`.
    pub fn due_at(&self, target: &Target) -> Option<u64> {
        self.pending()
            .get(&target.key())
            .filter(|timer| !timer.handle.is_finished())
            .map(|timer| timer.due_at)
    }

    pub fn pending_count(&self) -> usize {
        self.pending()
            .values()
            .filter(|timer| !timer.handle.is_finished())
            .count()
    }
}

impl Drop for RecheckScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.pending().drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn scheduler() -> (RecheckScheduler, mpsc::UnboundedReceiver<RecheckRequest>) {
        RecheckScheduler::new(Arc::new(ManualClock::new(0, 10_000, 600)))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_due_time() {
        let (sched, mut rx) = scheduler();
        let target = Target::app("com.game");
        sched.schedule(&target, 15_000);
        assert_eq!(sched.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, RecheckRequest { target, due_at: 15_000 });
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let (sched, mut rx) = scheduler();
        let target = Target::app("com.game");
        sched.schedule(&target, 12_000);
        sched.schedule(&target, 20_000);
        assert_eq!(sched.pending_count(), 1);
        assert_eq!(sched.due_at(&target), Some(20_000));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.due_at, 20_000);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_for_different_targets_are_independent() {
        let (sched, mut rx) = scheduler();
        sched.schedule(&Target::app("a"), 11_000);
        sched.schedule(&Target::app("b"), 13_000);
        assert_eq!(sched.pending_count(), 2);

        assert_eq!(rx.recv().await.unwrap().target, Target::app("a"));
        assert_eq!(rx.recv().await.unwrap().target, Target::app("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_delivery() {
        let (sched, mut rx) = scheduler();
        let target = Target::app("com.game");
        sched.schedule(&target, 11_000);
        assert!(sched.cancel(&target));
        assert!(!sched.cancel(&target));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sched.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn past_due_fires_immediately() {
        let (sched, mut rx) = scheduler();
        sched.schedule(&Target::app("late"), 1_000);
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.due_at, 1_000);
    }

    #[test]
    fn schedule_outside_runtime_is_ignored() {
        let (sched, _rx) = scheduler();
        sched.schedule(&Target::app("x"), 20_000);
        assert_eq!(sched.pending_count(), 0);
    }
}
