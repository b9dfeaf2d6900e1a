//! Foreground targets and the always-exempt system set.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The app or URL currently in the foreground.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub app_id: Option<String>,
    pub url: Option<String>,
}

impl Target {
    pub fn new(app_id: Option<String>, url: Option<String>) -> Self {
        Self {
            app_id: app_id.filter(|s| !s.trim().is_empty()),
            url: url.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn app(app_id: impl Into<String>) -> Self {
        Self::new(Some(app_id.into()), None)
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(None, Some(url.into()))
    }

    /// Canonical form: url if present, else app id, else `"unknown"`.
    pub fn canonical(&self) -> &str {
        self.url
            .as_deref()
            .or(self.app_id.as_deref())
            .unwrap_or("unknown")
    }

    /// Lower-cased canonical form, used as the key for caches and trackers.
    pub fn key(&self) -> String {
        self.canonical().to_lowercase()
    }

    /// True when neither an app id nor a url is known.
    pub fn is_empty(&self) -> bool {
        self.app_id.is_none() && self.url.is_none()
    }

    /// Whether the target is a member of `set`.
    ///
    /// App-level sets hold app identifiers, so both the app id and the
    /// canonical form are compared, case-insensitively.
    pub fn is_in(&self, set: &HashSet<String>) -> bool {
        let canonical = self.key();
        let app = self.app_id.as_deref().map(str::to_lowercase);
        set.iter().any(|entry| {
            let entry = entry.to_lowercase();
            entry == canonical || app.as_deref() == Some(entry.as_str())
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// Targets that are never evaluated: the engine's own app, system UI,
/// launcher and keyboard.
#[derive(Debug, Clone, Default)]
pub struct ExemptSet {
    ids: HashSet<String>,
}

impl ExemptSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, target: &Target) -> bool {
        target.is_in(&self.ids)
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_prefers_url() {
        let t = Target::new(Some("com.android.chrome".into()), Some("https://news.site/a".into()));
        assert_eq!(t.canonical(), "https://news.site/a");
        assert_eq!(Target::app("com.example").canonical(), "com.example");
        assert_eq!(Target::default().canonical(), "unknown");
    }

    #[test]
    fn blank_fields_are_treated_as_absent() {
        let t = Target::new(Some("  ".into()), Some(String::new()));
        assert!(t.is_empty());
    }

    #[test]
    fn key_is_lowercase() {
        assert_eq!(Target::app("Com.Example.App").key(), "com.example.app");
    }

    #[test]
    fn membership_checks_app_id_for_url_targets() {
        let set: HashSet<String> = ["com.android.chrome".to_string()].into_iter().collect();
        let t = Target::new(Some("com.android.chrome".into()), Some("https://x.y".into()));
        assert!(t.is_in(&set));
        assert!(!Target::url("https://x.y").is_in(&set));
    }

    #[test]
    fn exempt_set_is_case_insensitive() {
        let exempt = ExemptSet::new(["com.android.SystemUI"]);
        assert!(exempt.contains(&Target::app("com.android.systemui")));
        assert!(!exempt.contains(&Target::app("com.game")));
    }
}
