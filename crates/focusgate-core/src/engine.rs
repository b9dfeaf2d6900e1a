//! Policy orchestrator.
//!
//! [`PolicyEngine::on_target_changed`] evaluates a target against, in order:
//!
//! 1. the exempt set (empty, self, launcher, system UI, keyboard)
//! 2. bookkeeping purge of expired cache entries, rules and records
//! 3. the decision cache
//! 4. soft pause
//! 5. focus mode
//! 6. geofence policies
//! 7. cooldowns and scheduled windows
//! 8. permanent whitelist, then blacklist
//! 9. the remote classifier, resolved fail-open
//!
//! Steps 2 to 8 run on a blocking worker. The remote call runs on the async
//! runtime under a timeout. Evaluations of the same target are serialized;
//! different targets proceed concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::DecisionCache;
use crate::classifier::{resolve_remote, RemoteClassifier};
use crate::clock::Clock;
use crate::cooldown::{CooldownTracker, MinuteWindow, TrackerOutcome};
use crate::decision::{Decision, DecisionRecord, PauseMode};
use crate::error::{ClassifierError, Result, ValidationError};
use crate::focus::{self, FocusMode, FocusModeState};
use crate::geofence::{GeoBlockPolicy, GeoPoint, GeofenceEvaluator, PointOfInterest};
use crate::recheck::{RecheckRequest, RecheckScheduler};
use crate::rules::{Rule, RuleKind, RuleSnapshot};
use crate::storage::{Config, RuleStore, StateStore};
use crate::target::{ExemptSet, Target};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Target locks are pruned once the map grows past this.
const TARGET_LOCK_PRUNE_THRESHOLD: usize = 256;

/// Tunables for a [`PolicyEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub local_ttl: Duration,
    pub remote_ttl: Duration,
    pub window_ttl: Duration,
    pub remote_timeout: Duration,
    pub exempt: ExemptSet,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            local_ttl: config.cache.local_ttl(),
            remote_ttl: config.cache.remote_ttl(),
            window_ttl: config.cache.window_ttl(),
            remote_timeout: config.classifier.timeout(),
            exempt: config.exempt.exempt_set(),
        }
    }
}

/// Outcome of the local phase.
#[derive(Debug)]
enum LocalStep {
    Decided {
        decision: Decision,
        recheck_at: Option<u64>,
    },
    Remote {
        pause: PauseMode,
    },
}

impl LocalStep {
    fn decided(decision: Decision) -> Self {
        LocalStep::Decided {
            decision,
            recheck_at: None,
        }
    }
}

struct EngineInner {
    rules: Arc<dyn RuleStore>,
    state: Arc<dyn StateStore>,
    classifier: Arc<dyn RemoteClassifier>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    cache: DecisionCache,
    tracker: CooldownTracker,
    geofence: RwLock<GeofenceEvaluator>,
    location: RwLock<Option<GeoPoint>>,
    target_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    scheduler: RecheckScheduler,
    rechecks: Mutex<Option<mpsc::UnboundedReceiver<RecheckRequest>>>,
}

/// The decision engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PolicyEngine {
    inner: Arc<EngineInner>,
}

impl PolicyEngine {
    /// Build an engine and load scheduled windows and geofence policies.
    ///
    /// A store that cannot be read at construction leaves those evaluators
    /// empty; [`PolicyEngine::refresh_rules`] loads them again.
    pub fn new(
        rules: Arc<dyn RuleStore>,
        state: Arc<dyn StateStore>,
        classifier: Arc<dyn RemoteClassifier>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let (scheduler, rx) = RecheckScheduler::new(Arc::clone(&clock));
        let inner = EngineInner {
            rules,
            state,
            classifier,
            clock,
            settings,
            cache: DecisionCache::new(),
            tracker: CooldownTracker::new(),
            geofence: RwLock::new(GeofenceEvaluator::default()),
            location: RwLock::new(None),
            target_locks: Mutex::new(HashMap::new()),
            scheduler,
            rechecks: Mutex::new(Some(rx)),
        };
        if let Err(e) = inner.reload_evaluators() {
            tracing::warn!(error = %e, "could not load windows and geofences");
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Take the stream of fired re-check timers. Only the first call
    /// returns `Some`.
    pub fn take_rechecks(&self) -> Option<mpsc::UnboundedReceiver<RecheckRequest>> {
        self.inner
            .rechecks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Spawn a task that delivers fired re-check timers back into the
    /// engine and forwards each re-derived decision on `decisions` for
    /// enforcement. Returns `None` if the receiver was already taken.
    ///
    /// The task holds the engine weakly and ends once the last
    /// [`PolicyEngine`] handle is dropped.
    pub fn spawn_recheck_loop(
        &self,
        decisions: mpsc::UnboundedSender<(RecheckRequest, Decision)>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let mut rx = self.take_rechecks()?;
        let inner: Weak<EngineInner> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let decision = PolicyEngine { inner }.recheck(&request.target).await;
                tracing::debug!(key = %request.target, due_at = request.due_at, %decision, "re-check delivered");
                if decisions.send((request, decision)).is_err() {
                    tracing::debug!("re-check decision receiver dropped");
                }
            }
        }))
    }

    /// Number of outstanding forced re-check timers.
    pub fn pending_rechecks(&self) -> usize {
        self.inner.scheduler.pending_count()
    }

    /// Currently cached decision for `target`, if any.
    pub fn cached_decision(&self, target: &Target) -> Option<Decision> {
        self.inner
            .cache
            .get(&target.key(), self.inner.clock.now_millis())
    }

    // ── evaluation ──────────────────────────────────────────────────────

    /// Decide whether `target` may stay in the foreground.
    ///
    /// Never fails: store errors fall through to remote classification and
    /// remote errors resolve fail-open.
    pub async fn on_target_changed(&self, target: &Target) -> Decision {
        self.evaluate(target, false).await
    }

    /// Delivery point for forced re-check timers: drop the cached decision
    /// for `target` and derive it again. Early delivery is harmless.
    pub async fn recheck(&self, target: &Target) -> Decision {
        self.evaluate(target, true).await
    }

    async fn evaluate(&self, target: &Target, force: bool) -> Decision {
        if target.is_empty() || self.inner.settings.exempt.contains(target) {
            return Decision::allow("nothing to check");
        }

        let key = target.key();
        let lock = self.inner.target_lock(&key);
        let _guard = lock.lock().await;

        if force {
            self.inner.cache.invalidate(&key);
        }

        let inner = Arc::clone(&self.inner);
        let owned = target.clone();
        let step = match tokio::task::spawn_blocking(move || inner.evaluate_local(&owned)).await {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(key = %target, error = %e, "local evaluation failed");
                LocalStep::Remote {
                    pause: self.fallback_pause_mode().await,
                }
            }
        };

        match step {
            LocalStep::Decided {
                decision,
                recheck_at,
            } => {
                if let Some(due_at) = recheck_at {
                    self.inner.scheduler.schedule(target, due_at);
                }
                tracing::debug!(key = %target, %decision, "decided locally");
                decision
            }
            LocalStep::Remote { pause } => self.classify_remote(target, key, pause).await,
        }
    }

    /// Pause mode read on a fresh worker after local evaluation failed, so a
    /// hard pause still governs the remote outcome.
    async fn fallback_pause_mode(&self) -> PauseMode {
        match self.blocking(|inner| inner.state.pause_mode()).await {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!(error = %e, "pause state unavailable; assuming off");
                PauseMode::Off
            }
        }
    }

    async fn classify_remote(&self, target: &Target, key: String, pause: PauseMode) -> Decision {
        let timeout = self.inner.settings.remote_timeout;
        let now = self.inner.clock.now_millis();

        let result = match tokio::time::timeout(timeout, self.inner.classifier.classify(target, now)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        let succeeded = result.is_ok();
        let decision = resolve_remote(result, pause);
        tracing::info!(key = %target, %decision, "remote decision");

        let inner = Arc::clone(&self.inner);
        let record_decision = decision.clone();
        let written = tokio::task::spawn_blocking(move || {
            inner.store_remote(&key, &record_decision, succeeded);
        })
        .await;
        if let Err(e) = written {
            tracing::warn!(key = %target, error = %e, "failed to store remote decision");
        }

        decision
    }

    // ── administration ──────────────────────────────────────────────────

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&EngineInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }

    /// Set the pause mode from its textual form.
    ///
    /// # Errors
    /// Returns a validation error for anything but off, soft or hard; the
    /// stored mode is left unchanged.
    pub async fn set_pause(&self, mode: &str) -> Result<PauseMode> {
        let mode: PauseMode = mode.parse()?;
        self.set_pause_mode(mode).await?;
        Ok(mode)
    }

    pub async fn set_pause_mode(&self, mode: PauseMode) -> Result<()> {
        self.blocking(move |inner| {
            inner.state.set_pause_mode(mode)?;
            inner.cache.clear();
            tracing::info!(%mode, "pause mode set");
            Ok(())
        })
        .await
    }

    pub async fn pause_mode(&self) -> Result<PauseMode> {
        self.blocking(|inner| inner.state.pause_mode()).await
    }

    /// Allow targets containing `pattern` for `ttl_minutes`.
    ///
    /// # Errors
    /// Rejects an empty pattern or a zero TTL.
    pub async fn add_temporary_whitelist(&self, pattern: &str, ttl_minutes: u32) -> Result<Rule> {
        if ttl_minutes == 0 {
            return Err(ValidationError::NonPositiveDuration {
                field: "ttl_minutes".into(),
            }
            .into());
        }
        let expires_at = self.inner.clock.now_millis() + i64::from(ttl_minutes) * MILLIS_PER_MINUTE;
        let mut rule = Rule::temporary(pattern, RuleKind::Whitelist, expires_at)?;

        self.blocking(move |inner| {
            rule.id = inner.rules.insert_rule(&rule)?;
            let evicted = inner.cache.invalidate_matching(&rule.pattern);
            tracing::info!(pattern = %rule.pattern, ttl_minutes, evicted, "temporary whitelist added");
            Ok(rule)
        })
        .await
    }

    /// Add a permanent whitelist or blacklist rule.
    pub async fn add_rule(&self, pattern: &str, kind: RuleKind) -> Result<Rule> {
        let mut rule = Rule::permanent(pattern, kind)?;
        self.blocking(move |inner| {
            rule.id = inner.rules.insert_rule(&rule)?;
            inner.cache.clear();
            tracing::info!(pattern = %rule.pattern, kind = %rule.kind, "rule added");
            Ok(rule)
        })
        .await
    }

    /// Returns false if no rule had that id.
    pub async fn remove_rule(&self, id: i64) -> Result<bool> {
        self.blocking(move |inner| {
            let removed = inner.rules.delete_rule(id)?;
            if removed {
                inner.cache.clear();
                tracing::info!(id, "rule removed");
            }
            Ok(removed)
        })
        .await
    }

    /// Live rules, after purging expired ones.
    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.blocking(|inner| {
            inner.rules.purge_expired_rules(inner.clock.now_millis())?;
            inner.rules.load_rules()
        })
        .await
    }

    /// Enter focus mode for `duration_minutes`.
    ///
    /// # Errors
    /// Rejects a zero duration; focus state is left unchanged.
    pub async fn start_focus_mode(
        &self,
        mode: FocusMode,
        duration_minutes: u32,
        selected_apps: HashSet<String>,
    ) -> Result<FocusModeState> {
        self.blocking(move |inner| {
            let now = inner.clock.now_millis();
            let previous = inner.state.focus_mode()?;
            let next = FocusModeState::start(&previous, mode, duration_minutes, selected_apps, now)?;
            inner.state.save_focus_mode(&next)?;
            inner.cache.clear();
            tracing::info!(%mode, duration_minutes, selected = next.selected_apps.len(), "focus mode started");
            Ok(next)
        })
        .await
    }

    pub async fn stop_focus_mode(&self) -> Result<FocusModeState> {
        self.blocking(|inner| {
            let mut state = inner.state.focus_mode()?;
            state.stop();
            inner.state.save_focus_mode(&state)?;
            inner.cache.clear();
            tracing::info!("focus mode stopped");
            Ok(state)
        })
        .await
    }

    /// Current focus state with expiry applied.
    pub async fn focus_mode_status(&self) -> Result<FocusModeState> {
        self.blocking(|inner| inner.focus_state(inner.clock.now_millis()))
            .await
    }

    /// Reload rules, scheduled windows and geofence policies from the
    /// store and drop every cached decision.
    pub async fn refresh_rules(&self) -> Result<()> {
        self.blocking(|inner| {
            let purged = inner.rules.purge_expired_rules(inner.clock.now_millis())?;
            inner.reload_evaluators()?;
            inner.cache.clear();
            tracing::info!(purged, "rules refreshed");
            Ok(())
        })
        .await
    }

    /// Let `target` through for `minutes`, then re-block it. Returns the
    /// uptime at which the cooldown ends.
    pub async fn grant_cooldown(&self, target: &Target, minutes: u32) -> Result<u64> {
        if target.is_empty() {
            return Err(ValidationError::Empty("target".into()).into());
        }
        if minutes == 0 {
            return Err(ValidationError::NonPositiveDuration {
                field: "minutes".into(),
            }
            .into());
        }

        let key = target.key();
        let lock = self.inner.target_lock(&key);
        let _guard = lock.lock().await;

        let end = self.inner.clock.uptime_millis() + u64::from(minutes) * MILLIS_PER_MINUTE as u64;
        self.inner.tracker.put_cooldown(target, end);
        self.inner.cache.invalidate(&key);
        self.inner.scheduler.schedule(target, end);
        tracing::info!(key = %target, minutes, "cooldown granted");
        Ok(end)
    }

    /// Add a daily window during which `target` is allowed.
    pub async fn add_window(&self, target: &str, window: MinuteWindow) -> Result<i64> {
        let target = target.trim().to_string();
        if target.is_empty() {
            return Err(ValidationError::Empty("target".into()).into());
        }
        let window = MinuteWindow::new(window.start, window.end)?;
        self.blocking(move |inner| {
            let id = inner.rules.insert_window(&target, window)?;
            inner.tracker.refresh_windows(&inner.rules.load_windows()?);
            inner.cache.invalidate_matching(&target);
            tracing::info!(key = %target, start = window.start, end = window.end, "scheduled window added");
            Ok(id)
        })
        .await
    }

    pub async fn add_point_of_interest(&self, poi: PointOfInterest) -> Result<()> {
        GeoPoint::new(poi.lat, poi.lon)?;
        if poi.id.trim().is_empty() {
            return Err(ValidationError::Empty("id".into()).into());
        }
        if !(poi.radius_meters.is_finite() && poi.radius_meters > 0.0) {
            return Err(ValidationError::InvalidValue {
                field: "radius_meters".into(),
                message: "must be a positive number".into(),
            }
            .into());
        }
        self.blocking(move |inner| {
            inner.rules.upsert_point_of_interest(&poi)?;
            inner.reload_geofence()?;
            inner.cache.clear();
            tracing::info!(id = %poi.id, radius = poi.radius_meters, "point of interest saved");
            Ok(())
        })
        .await
    }

    pub async fn add_geo_policy(&self, policy: GeoBlockPolicy) -> Result<i64> {
        let window = MinuteWindow::new(policy.start_minute, policy.end_minute)?;
        if policy.apps.is_empty() {
            return Err(ValidationError::Empty("apps".into()).into());
        }
        self.blocking(move |inner| {
            let id = inner.rules.insert_geo_policy(&policy)?;
            inner.reload_geofence()?;
            inner.cache.clear();
            tracing::info!(poi = %policy.poi_id, start = window.start, end = window.end, "geo policy added");
            Ok(id)
        })
        .await
    }

    /// Record the last-known position. Cached decisions are dropped so a
    /// geofence entered mid-TTL applies immediately.
    pub fn update_location(&self, lat: f64, lon: f64) -> Result<GeoPoint> {
        let point = GeoPoint::new(lat, lon)?;
        *self
            .inner
            .location
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(point);
        self.inner.cache.clear();
        tracing::debug!(lat, lon, "location updated");
        Ok(point)
    }

    pub fn clear_location(&self) {
        *self
            .inner
            .location
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.cache.clear();
    }

    pub fn location(&self) -> Option<GeoPoint> {
        *self.inner.location.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recent persisted remote decision for `target`.
    pub async fn latest_decision(&self, target: &Target) -> Result<Option<DecisionRecord>> {
        let key = target.key();
        self.blocking(move |inner| inner.rules.latest_decision(&key))
            .await
    }
}

impl EngineInner {
    fn target_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .target_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if locks.len() > TARGET_LOCK_PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn reload_evaluators(&self) -> Result<()> {
        self.tracker.refresh_windows(&self.rules.load_windows()?);
        self.reload_geofence()
    }

    fn reload_geofence(&self) -> Result<()> {
        let evaluator = GeofenceEvaluator::new(
            self.rules.load_points_of_interest()?,
            self.rules.load_geo_policies()?,
        );
        *self.geofence.write().unwrap_or_else(|e| e.into_inner()) = evaluator;
        Ok(())
    }

    /// Focus state with lazy expiry persisted.
    fn focus_state(&self, now: i64) -> Result<FocusModeState> {
        let mut state = self.state.focus_mode()?;
        if state.expire(now) {
            self.state.save_focus_mode(&state)?;
            tracing::info!("focus mode expired");
        }
        Ok(state)
    }

    /// Steps 2 to 8. Runs on a blocking worker.
    fn evaluate_local(&self, target: &Target) -> LocalStep {
        let key = target.key();
        let now = self.clock.now_millis();

        self.cache.purge_expired(now);
        if let Err(e) = self.rules.purge_expired_rules(now) {
            tracing::warn!(error = %e, "failed to purge expired rules");
        }
        if let Err(e) = self.rules.purge_expired_decisions(now) {
            tracing::warn!(error = %e, "failed to purge expired decision records");
        }

        if let Some(decision) = self.cache.get(&key, now) {
            tracing::debug!(key = %key, "cache hit");
            return LocalStep::decided(decision);
        }

        let pause = self.state.pause_mode().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "pause state unavailable; assuming off");
            PauseMode::Off
        });
        if pause == PauseMode::Soft {
            let decision = Decision::allow("paused (soft)");
            self.cache.put(&key, decision.clone(), self.settings.local_ttl, now);
            return LocalStep::decided(decision);
        }

        match self.focus_state(now) {
            Ok(state) => {
                if let Some(decision) = focus::evaluate(&state, &self.settings.exempt, target, now) {
                    return LocalStep::decided(decision);
                }
            }
            Err(e) => tracing::warn!(error = %e, "focus state unavailable; skipping focus mode"),
        }

        let minute = self.clock.minute_of_day();
        let position = *self.location.read().unwrap_or_else(|e| e.into_inner());
        let geo_blocked = self
            .geofence
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_blocked(target, minute, position);
        if geo_blocked {
            return LocalStep::decided(Decision::block("geo policy"));
        }

        let uptime = self.clock.uptime_millis();
        let into_minute = self.clock.millis_into_minute();
        match self.tracker.evaluate(target, uptime, minute, into_minute) {
            TrackerOutcome::CooldownActive { until } => {
                return LocalStep::Decided {
                    decision: Decision::allow("cooldown active"),
                    recheck_at: Some(until),
                };
            }
            TrackerOutcome::CooldownElapsed => {
                // The entry is gone; the cached block keeps the next events
                // from falling straight back to an allow.
                let decision = Decision::block("cooldown over");
                self.cache.put(&key, decision.clone(), self.settings.local_ttl, now);
                return LocalStep::decided(decision);
            }
            TrackerOutcome::WithinWindow { until } => {
                let decision = Decision::allow("scheduled window");
                let remaining = Duration::from_millis(until.saturating_sub(uptime));
                let ttl = self.settings.window_ttl.min(remaining);
                self.cache.put(&key, decision.clone(), ttl, now);
                return LocalStep::Decided {
                    decision,
                    recheck_at: Some(until),
                };
            }
            TrackerOutcome::Undecided => {}
        }

        if let Some(hit) = RuleSnapshot::fetch(self.rules.as_ref()).evaluate(target, now) {
            // A temporary rule is live through `expires_at` inclusive.
            let ttl = match hit.expires_at {
                Some(at) => {
                    let left = at.saturating_sub(now).max(0) as u64 + 1;
                    self.settings.local_ttl.min(Duration::from_millis(left))
                }
                None => self.settings.local_ttl,
            };
            self.cache.put(&key, hit.decision.clone(), ttl, now);
            return LocalStep::decided(hit.decision);
        }

        LocalStep::Remote { pause }
    }

    /// Cache a remote decision and persist a record of successful verdicts.
    /// Failures are cached for the local TTL so the next event retries soon.
    fn store_remote(&self, key: &str, decision: &Decision, succeeded: bool) {
        let now = self.clock.now_millis();
        let ttl = if succeeded {
            self.settings.remote_ttl
        } else {
            self.settings.local_ttl
        };
        self.cache.put(key, decision.clone(), ttl, now);

        if !succeeded {
            return;
        }
        let record = DecisionRecord {
            target: key.to_string(),
            decision: decision.verdict().to_string(),
            reason: decision.reason().to_string(),
            decided_at: now,
            expires_at: Some(now.saturating_add(ttl.as_millis() as i64)),
        };
        if let Err(e) = self.rules.record_decision(&record) {
            tracing::warn!(key = %key, error = %e, "failed to persist remote decision");
        }
    }
}
