//! TTL-keyed memoization of recent decisions.
//!
//! Last-write-wins is acceptable here: entries are re-derivations, not a
//! source of truth. Same-target linearizability is provided by the engine's
//! per-target lock, not by the cache.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::decision::Decision;

/// Default TTL for locally derived decisions.
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(30);

/// Default TTL for remote decisions.
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDecision {
    pub decision: Decision,
    /// Wall-clock epoch millis.
    pub expires_at: i64,
}

#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: Mutex<HashMap<String, CachedDecision>>,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedDecision>> {
        // A poisoned map still holds valid entries.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached decision for `key`, evicting it if `now >= expires_at`.
    pub fn get(&self, key: &str, now: i64) -> Option<Decision> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(cached) if now < cached.expires_at => Some(cached.decision.clone()),
            Some(_) => {
                entries.remove(key);
                tracing::trace!(key, "cache expired");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, decision: Decision, ttl: Duration, now: i64) {
        let expires_at = now.saturating_add(ttl.as_millis() as i64);
        tracing::trace!(key, ttl_ms = ttl.as_millis() as u64, "cache put");
        self.lock().insert(
            key.to_string(),
            CachedDecision {
                decision,
                expires_at,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self, now: i64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, cached| now < cached.expires_at);
        before - entries.len()
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop entries whose key contains `fragment` (case-insensitive).
    pub fn invalidate_matching(&self, fragment: &str) -> usize {
        let fragment = fragment.to_lowercase();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(&fragment));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
