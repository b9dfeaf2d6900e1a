//! Permanent and temporary whitelist/blacklist rules.
//!
//! Matching is case-insensitive substring containment of the pattern in the
//! target's canonical form. Whitelist rules are consulted before blacklist
//! rules; within a kind the first rule in store order wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::decision::Decision;
use crate::error::ValidationError;
use crate::storage::RuleStore;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Whitelist,
    Blacklist,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Whitelist => "whitelist",
            RuleKind::Blacklist => "blacklist",
        }
    }
}

impl FromStr for RuleKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whitelist" | "allow" => Ok(RuleKind::Whitelist),
            "blacklist" | "block" => Ok(RuleKind::Blacklist),
            _ => Err(ValidationError::UnknownRuleKind(s.to_string())),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Store-assigned id; `0` for rules not yet persisted.
    #[serde(default)]
    pub id: i64,
    pub pattern: String,
    pub kind: RuleKind,
    pub temporary: bool,
    /// Wall-clock epoch millis. Always set for temporary rules.
    pub expires_at: Option<i64>,
}

impl Rule {
    pub fn permanent(pattern: impl Into<String>, kind: RuleKind) -> Result<Self, ValidationError> {
        let pattern = validate_pattern(pattern.into())?;
        Ok(Self {
            id: 0,
            pattern,
            kind,
            temporary: false,
            expires_at: None,
        })
    }

    pub fn temporary(
        pattern: impl Into<String>,
        kind: RuleKind,
        expires_at: i64,
    ) -> Result<Self, ValidationError> {
        let pattern = validate_pattern(pattern.into())?;
        Ok(Self {
            id: 0,
            pattern,
            kind,
            temporary: true,
            expires_at: Some(expires_at),
        })
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    pub fn matches(&self, target: &Target) -> bool {
        target.key().contains(&self.pattern.to_lowercase())
    }
}

fn validate_pattern(pattern: String) -> Result<String, ValidationError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("pattern".into()));
    }
    Ok(trimmed.to_string())
}

/// A list verdict and, for temporary rules, when the rule behind it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub decision: Decision,
    pub expires_at: Option<i64>,
}

/// Rules as loaded for one evaluation cycle.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    rules: Vec<Rule>,
}

impl RuleSnapshot {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Load the current rules. Expired rules are skipped by `evaluate`, so
    /// callers need not purge first.
    ///
    /// A failing store yields an empty snapshot: evaluation falls through to
    /// remote classification rather than failing the event path.
    pub fn fetch(store: &dyn RuleStore) -> Self {
        match store.load_rules() {
            Ok(rules) => Self::new(rules),
            Err(e) => {
                tracing::warn!(error = %e, "rule store unavailable; treating as no rules");
                Self::default()
            }
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Permanent-list verdict for `target`, if any rule matches.
    ///
    /// Rules past their expiry are skipped even if the purge did not run.
    pub fn evaluate(&self, target: &Target, now: i64) -> Option<RuleMatch> {
        let live = || self.rules.iter().filter(move |r| !r.is_expired(now));

        if let Some(rule) = live().find(|r| r.kind == RuleKind::Whitelist && r.matches(target)) {
            return Some(RuleMatch {
                decision: Decision::allow(format!("local whitelist: {}", rule.pattern)),
                expires_at: rule.expires_at,
            });
        }
        live()
            .find(|r| r.kind == RuleKind::Blacklist && r.matches(target))
            .map(|rule| RuleMatch {
                decision: Decision::block(format!("local blacklist: {}", rule.pattern)),
                expires_at: rule.expires_at,
            })
    }
}
