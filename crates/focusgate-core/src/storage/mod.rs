mod config;
pub mod database;
pub mod device_id;
pub mod migrations;

pub use config::{CacheConfig, ClassifierConfig, Config, ExemptConfig};
pub use database::Database;
pub use device_id::{get_or_create_device_id, get_or_create_device_id_at};

use std::path::PathBuf;

use crate::cooldown::{MinuteWindow, ScheduledWindow};
use crate::decision::{DecisionRecord, PauseMode};
use crate::error::{ConfigError, Result};
use crate::focus::FocusModeState;
use crate::geofence::{GeoBlockPolicy, PointOfInterest};
use crate::rules::Rule;

/// Durable rule, window, geofence and decision-record storage.
///
/// The engine treats this as a synchronous store and only calls it from
/// blocking workers.
pub trait RuleStore: Send + Sync {
    /// All rules in store order.
    fn load_rules(&self) -> Result<Vec<Rule>>;

    /// Delete temporary rules with `expires_at < now`.
    fn purge_expired_rules(&self, now: i64) -> Result<usize>;

    /// Persist a rule, returning its id.
    fn insert_rule(&self, rule: &Rule) -> Result<i64>;

    /// Returns false if no rule had that id.
    fn delete_rule(&self, id: i64) -> Result<bool>;

    fn record_decision(&self, record: &DecisionRecord) -> Result<()>;

    fn purge_expired_decisions(&self, now: i64) -> Result<usize>;

    /// Most recent decision record for a target key.
    fn latest_decision(&self, target: &str) -> Result<Option<DecisionRecord>>;

    fn load_windows(&self) -> Result<Vec<ScheduledWindow>>;

    fn insert_window(&self, target: &str, window: MinuteWindow) -> Result<i64>;

    fn load_points_of_interest(&self) -> Result<Vec<PointOfInterest>>;

    fn upsert_point_of_interest(&self, poi: &PointOfInterest) -> Result<()>;

    fn load_geo_policies(&self) -> Result<Vec<GeoBlockPolicy>>;

    fn insert_geo_policy(&self, policy: &GeoBlockPolicy) -> Result<i64>;
}

/// Pause and focus-mode state. Reads must observe prior writes.
pub trait StateStore: Send + Sync {
    fn pause_mode(&self) -> Result<PauseMode>;

    fn set_pause_mode(&self, mode: PauseMode) -> Result<()>;

    fn focus_mode(&self) -> Result<FocusModeState>;

    fn save_focus_mode(&self, state: &FocusModeState) -> Result<()>;
}

/// Returns the focusgate data directory, creating it if needed.
///
/// `FOCUSGATE_HOME` wins when set. Otherwise `~/.config/focusgate`, or
/// `~/.config/focusgate-dev` when `FOCUSGATE_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("FOCUSGATE_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("FOCUSGATE_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("focusgate-dev")
            } else {
                base_dir.join("focusgate")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
