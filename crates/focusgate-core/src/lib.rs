//! # Focusgate Core Library
//!
//! On-device policy decision engine for digital wellbeing. Given the app or
//! URL currently in the foreground, it decides whether that target is
//! allowed or blocked, and hands the decision to an enforcement surface.
//!
//! ## Architecture
//!
//! - **Engine**: fixed-precedence orchestrator over the evaluators below,
//!   with a TTL decision cache and per-target serialization
//! - **Evaluators**: permanent/temporary rules, cooldowns and scheduled
//!   windows, focus mode, geofence policies
//! - **Remote classification**: HTTP client resolved fail-open
//! - **Storage**: SQLite rule/state persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`PolicyEngine`]: the evaluation entry point and administrative surface
//! - [`Database`]: rule, window, geofence, decision-record and state storage
//! - [`Config`]: engine configuration
//! - [`RemoteClassifier`]: trait for remote classification services

pub mod cache;
pub mod classifier;
pub mod clock;
pub mod cooldown;
pub mod decision;
pub mod engine;
pub mod error;
pub mod focus;
pub mod geofence;
pub mod recheck;
pub mod rules;
pub mod storage;
pub mod target;

pub use cache::DecisionCache;
pub use classifier::{resolve_remote, HttpClassifier, RemoteClassifier, RemoteVerdict};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::{CooldownTracker, MinuteWindow, ScheduledWindow, TrackerOutcome};
pub use decision::{Decision, DecisionRecord, PauseMode};
pub use engine::{EngineSettings, PolicyEngine};
pub use error::{ClassifierError, ConfigError, CoreError, DatabaseError, ValidationError};
pub use focus::{FocusMode, FocusModeState};
pub use geofence::{GeoBlockPolicy, GeoPoint, GeofenceEvaluator, PointOfInterest};
pub use recheck::{RecheckRequest, RecheckScheduler};
pub use rules::{Rule, RuleKind, RuleMatch, RuleSnapshot};
pub use storage::{Config, Database, RuleStore, StateStore};
pub use target::{ExemptSet, Target};
