//! Decisions, pause mode and persisted decision records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Outcome of an evaluation. `reason` is diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "lowercase")]
pub enum Decision {
    Allow(String),
    Block(String),
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Decision::Allow(reason.into())
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Decision::Block(reason.into())
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Allow(r) | Decision::Block(r) => r,
        }
    }

    /// Verdict string as stored in decision records.
    pub fn verdict(&self) -> &'static str {
        match self {
            Decision::Allow(_) => "allow",
            Decision::Block(_) => "block",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.verdict(), self.reason())
    }
}

/// Process-wide override of normal blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseMode {
    #[default]
    Off,
    /// Everything is allowed without further evaluation.
    Soft,
    /// Remote failures resolve to allow with a distinguishable reason.
    Hard,
}

impl PauseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PauseMode::Off => "off",
            PauseMode::Soft => "soft",
            PauseMode::Hard => "hard",
        }
    }
}

impl FromStr for PauseMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(PauseMode::Off),
            "soft" => Ok(PauseMode::Soft),
            "hard" => Ok(PauseMode::Hard),
            _ => Err(ValidationError::UnknownPauseMode(s.to_string())),
        }
    }
}

impl fmt::Display for PauseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded remote decision written to persistence so a restart
/// inside the TTL can still honor it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub target: String,
    pub decision: String,
    pub reason: String,
    pub decided_at: i64,
    pub expires_at: Option<i64>,
}
