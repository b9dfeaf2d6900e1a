//! Focus mode: a time-boxed global blocking mode.
//!
//! ## States
//!
//! - **Inactive** (initial)
//! - **Active**: entered by `start` with a duration; left automatically once
//!   `now >= ends_at`, or explicitly by `stop`.
//!
//! ## Modes
//!
//! - `BlockSelected`: blocked iff in `selected_apps` minus `whitelist`, or in
//!   `blacklist`.
//! - `BlockAllExceptSelected`: blocked unless in
//!   (`selected_apps` ∪ exempt set) minus `blacklist`, or in `whitelist`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::decision::Decision;
use crate::error::ValidationError;
use crate::target::{ExemptSet, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    #[default]
    BlockSelected,
    BlockAllExceptSelected,
}

impl FocusMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FocusMode::BlockSelected => "block-selected",
            FocusMode::BlockAllExceptSelected => "block-all-except-selected",
        }
    }
}

impl FromStr for FocusMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "block-selected" | "selected" => Ok(FocusMode::BlockSelected),
            "block-all-except-selected" | "block-all" | "all" => {
                Ok(FocusMode::BlockAllExceptSelected)
            }
            _ => Err(ValidationError::UnknownFocusMode(s.to_string())),
        }
    }
}

impl fmt::Display for FocusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FocusModeState {
    pub active: bool,
    /// Wall-clock epoch millis.
    pub ends_at: i64,
    pub mode: FocusMode,
    #[serde(default)]
    pub selected_apps: HashSet<String>,
    #[serde(default)]
    pub whitelist: HashSet<String>,
    #[serde(default)]
    pub blacklist: HashSet<String>,
}

impl FocusModeState {
    /// Enter Active. Whitelist and blacklist carry over from `previous`.
    pub fn start(
        previous: &FocusModeState,
        mode: FocusMode,
        duration_minutes: u32,
        selected_apps: HashSet<String>,
        now: i64,
    ) -> Result<Self, ValidationError> {
        if duration_minutes == 0 {
            return Err(ValidationError::NonPositiveDuration {
                field: "duration_minutes".into(),
            });
        }
        Ok(Self {
            active: true,
            ends_at: now + i64::from(duration_minutes) * 60_000,
            mode,
            selected_apps,
            whitelist: previous.whitelist.clone(),
            blacklist: previous.blacklist.clone(),
        })
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self, now: i64) -> bool {
        self.active && now < self.ends_at
    }

    /// Lazily apply expiry. Returns true when the state changed and should
    /// be persisted.
    pub fn expire(&mut self, now: i64) -> bool {
        if self.active && now >= self.ends_at {
            self.active = false;
            return true;
        }
        false
    }

    pub fn remaining_millis(&self, now: i64) -> i64 {
        if self.is_active(now) {
            self.ends_at - now
        } else {
            0
        }
    }
}

/// Focus-mode verdict for `target`. `None` means focus mode has nothing to
/// say (inactive, or the target is allowed).
pub fn evaluate(state: &FocusModeState, exempt: &ExemptSet, target: &Target, now: i64) -> Option<Decision> {
    if !state.is_active(now) {
        return None;
    }

    let blocked = match state.mode {
        FocusMode::BlockSelected => {
            (target.is_in(&state.selected_apps) && !target.is_in(&state.whitelist))
                || target.is_in(&state.blacklist)
        }
        FocusMode::BlockAllExceptSelected => {
            let allowed = ((target.is_in(&state.selected_apps) || exempt.contains(target))
                && !target.is_in(&state.blacklist))
                || target.is_in(&state.whitelist);
            !allowed
        }
    };

    blocked.then(|| Decision::block(format!("focus mode ({})", state.mode)))
}
