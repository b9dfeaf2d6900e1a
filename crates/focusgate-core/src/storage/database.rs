//! SQLite-backed rule and state storage.
//!
//! Provides persistent storage for:
//! - Whitelist/blacklist rules (permanent and temporary)
//! - Time-bounded remote decision records
//! - Scheduled windows, points of interest and geo policies
//! - Key-value state (pause mode, focus mode)

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{data_dir, migrations, RuleStore, StateStore};
use crate::cooldown::{MinuteWindow, ScheduledWindow};
use crate::decision::{DecisionRecord, PauseMode};
use crate::error::{DatabaseError, Result};
use crate::focus::FocusModeState;
use crate::geofence::{GeoBlockPolicy, PointOfInterest};
use crate::rules::{Rule, RuleKind};

const PAUSE_KEY: &str = "pause_mode";
const FOCUS_KEY: &str = "focus_mode";

/// SQLite database for rules and engine state.
///
/// The connection sits behind a mutex so the store can be shared between
/// evaluation workers.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data_dir>/focusgate.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("focusgate.db");
        Self::open_at(&path)
    }

    /// Open (or create) a database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a value from the state store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the state store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

fn corrupt(table: &str, message: impl Into<String>) -> DatabaseError {
    DatabaseError::Corrupt {
        table: table.to_string(),
        message: message.into(),
    }
}

impl RuleStore for Database {
    fn load_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, pattern, kind, temporary, expires_at FROM rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?;

        let mut rules = Vec::new();
        for row in rows {
            let (id, pattern, kind, temporary, expires_at) = row?;
            let kind = kind
                .parse::<RuleKind>()
                .map_err(|e| corrupt("rules", e.to_string()))?;
            rules.push(Rule {
                id,
                pattern,
                kind,
                temporary,
                expires_at,
            });
        }
        Ok(rules)
    }

    fn purge_expired_rules(&self, now: i64) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM rules
             WHERE temporary = 1 AND expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        Ok(removed)
    }

    fn insert_rule(&self, rule: &Rule) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rules (pattern, kind, temporary, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![rule.pattern, rule.kind.as_str(), rule.temporary, rule.expires_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_rule(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM rules WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn record_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO decisions (target, decision, reason, decided_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.target,
                record.decision,
                record.reason,
                record.decided_at,
                record.expires_at,
            ],
        )?;
        Ok(())
    }

    fn purge_expired_decisions(&self, now: i64) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM decisions WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        Ok(removed)
    }

    fn latest_decision(&self, target: &str) -> Result<Option<DecisionRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT target, decision, reason, decided_at, expires_at
                 FROM decisions WHERE target = ?1
                 ORDER BY decided_at DESC, id DESC LIMIT 1",
                params![target],
                |row| {
                    Ok(DecisionRecord {
                        target: row.get(0)?,
                        decision: row.get(1)?,
                        reason: row.get(2)?,
                        decided_at: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn load_windows(&self) -> Result<Vec<ScheduledWindow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT target, start_minute, end_minute FROM schedule_windows ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?;

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<MinuteWindow>> = HashMap::new();
        for row in rows {
            let (target, start, end) = row?;
            let window = MinuteWindow::new(start, end)
                .map_err(|e| corrupt("schedule_windows", e.to_string()))?;
            if !grouped.contains_key(&target) {
                order.push(target.clone());
            }
            grouped.entry(target).or_default().push(window);
        }

        Ok(order
            .into_iter()
            .map(|target| {
                let windows = grouped.remove(&target).unwrap_or_default();
                ScheduledWindow { target, windows }
            })
            .collect())
    }

    fn insert_window(&self, target: &str, window: MinuteWindow) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO schedule_windows (target, start_minute, end_minute) VALUES (?1, ?2, ?3)",
            params![target, window.start, window.end],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn load_points_of_interest(&self) -> Result<Vec<PointOfInterest>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, lat, lon, radius_meters FROM points_of_interest ORDER BY id")?;
        let pois = stmt
            .query_map([], |row| {
                Ok(PointOfInterest {
                    id: row.get(0)?,
                    lat: row.get(1)?,
                    lon: row.get(2)?,
                    radius_meters: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pois)
    }

    fn upsert_point_of_interest(&self, poi: &PointOfInterest) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO points_of_interest (id, lat, lon, radius_meters)
             VALUES (?1, ?2, ?3, ?4)",
            params![poi.id, poi.lat, poi.lon, poi.radius_meters],
        )?;
        Ok(())
    }

    fn load_geo_policies(&self) -> Result<Vec<GeoBlockPolicy>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT poi_id, start_minute, end_minute, apps FROM geo_policies ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut policies = Vec::new();
        for row in rows {
            let (poi_id, start_minute, end_minute, apps) = row?;
            let apps: HashSet<String> = serde_json::from_str(&apps)
                .map_err(|e| corrupt("geo_policies", e.to_string()))?;
            policies.push(GeoBlockPolicy {
                poi_id,
                start_minute,
                end_minute,
                apps,
            });
        }
        Ok(policies)
    }

    fn insert_geo_policy(&self, policy: &GeoBlockPolicy) -> Result<i64> {
        let mut apps: Vec<&String> = policy.apps.iter().collect();
        apps.sort();
        let apps = serde_json::to_string(&apps)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO geo_policies (poi_id, start_minute, end_minute, apps)
             VALUES (?1, ?2, ?3, ?4)",
            params![policy.poi_id, policy.start_minute, policy.end_minute, apps],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl StateStore for Database {
    fn pause_mode(&self) -> Result<PauseMode> {
        match self.kv_get(PAUSE_KEY)? {
            Some(value) => Ok(value
                .parse::<PauseMode>()
                .map_err(|e| corrupt("state", e.to_string()))?),
            None => Ok(PauseMode::Off),
        }
    }

    fn set_pause_mode(&self, mode: PauseMode) -> Result<()> {
        self.kv_set(PAUSE_KEY, mode.as_str())
    }

    fn focus_mode(&self) -> Result<FocusModeState> {
        match self.kv_get(FOCUS_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(FocusModeState::default()),
        }
    }

    fn save_focus_mode(&self, state: &FocusModeState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.kv_set(FOCUS_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::FocusMode;

    #[test]
    fn rules_round_trip_in_store_order() {
        let db = Database::open_memory().unwrap();
        db.insert_rule(&Rule::permanent("reddit", RuleKind::Blacklist).unwrap())
            .unwrap();
        db.insert_rule(&Rule::temporary("youtube", RuleKind::Whitelist, 5_000).unwrap())
            .unwrap();

        let rules = db.load_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "reddit");
        assert_eq!(rules[1].kind, RuleKind::Whitelist);
        assert_eq!(rules[1].expires_at, Some(5_000));
        assert!(rules[1].temporary);
    }

    #[test]
    fn purge_removes_only_expired_temporary_rules() {
        let db = Database::open_memory().unwrap();
        db.insert_rule(&Rule::permanent("keep", RuleKind::Blacklist).unwrap())
            .unwrap();
        db.insert_rule(&Rule::temporary("old", RuleKind::Whitelist, 100).unwrap())
            .unwrap();
        db.insert_rule(&Rule::temporary("new", RuleKind::Whitelist, 10_000).unwrap())
            .unwrap();

        assert_eq!(db.purge_expired_rules(1_000).unwrap(), 1);
        let patterns: Vec<_> = db.load_rules().unwrap().into_iter().map(|r| r.pattern).collect();
        assert_eq!(patterns, vec!["keep", "new"]);
    }

    #[test]
    fn delete_rule_reports_missing() {
        let db = Database::open_memory().unwrap();
        let id = db
            .insert_rule(&Rule::permanent("x", RuleKind::Blacklist).unwrap())
            .unwrap();
        assert!(db.delete_rule(id).unwrap());
        assert!(!db.delete_rule(id).unwrap());
    }

    #[test]
    fn latest_decision_and_purge() {
        let db = Database::open_memory().unwrap();
        for (at, verdict) in [(1, "allow"), (2, "block")] {
            db.record_decision(&DecisionRecord {
                target: "com.game".into(),
                decision: verdict.into(),
                reason: "remote".into(),
                decided_at: at,
                expires_at: Some(at + 60_000),
            })
            .unwrap();
        }
        let latest = db.latest_decision("com.game").unwrap().unwrap();
        assert_eq!(latest.decision, "block");

        assert_eq!(db.purge_expired_decisions(100_000).unwrap(), 2);
        assert!(db.latest_decision("com.game").unwrap().is_none());
    }

    #[test]
    fn windows_group_by_target() {
        let db = Database::open_memory().unwrap();
        db.insert_window("com.video", MinuteWindow::new(1380, 60).unwrap()).unwrap();
        db.insert_window("com.chat", MinuteWindow::new(720, 780).unwrap()).unwrap();
        db.insert_window("com.video", MinuteWindow::new(720, 750).unwrap()).unwrap();

        let windows = db.load_windows().unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].target, "com.video");
        assert_eq!(windows[0].windows.len(), 2);
        assert_eq!(windows[1].target, "com.chat");
    }

    #[test]
    fn geo_round_trip() {
        let db = Database::open_memory().unwrap();
        db.upsert_point_of_interest(&PointOfInterest {
            id: "school".into(),
            lat: 1.0,
            lon: 2.0,
            radius_meters: 150.0,
        })
        .unwrap();
        db.insert_geo_policy(&GeoBlockPolicy {
            poi_id: "school".into(),
            start_minute: 480,
            end_minute: 900,
            apps: ["com.game".to_string(), "com.social".to_string()].into_iter().collect(),
        })
        .unwrap();

        let pois = db.load_points_of_interest().unwrap();
        assert_eq!(pois[0].radius_meters, 150.0);
        let policies = db.load_geo_policies().unwrap();
        assert!(policies[0].apps.contains("com.social"));
        assert_eq!(policies[0].start_minute, 480);
    }

    #[test]
    fn pause_mode_defaults_off_and_persists() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.pause_mode().unwrap(), PauseMode::Off);
        db.set_pause_mode(PauseMode::Hard).unwrap();
        assert_eq!(db.pause_mode().unwrap(), PauseMode::Hard);
    }

    #[test]
    fn corrupt_pause_value_is_an_error() {
        let db = Database::open_memory().unwrap();
        db.kv_set(PAUSE_KEY, "sideways").unwrap();
        assert!(db.pause_mode().is_err());
    }

    #[test]
    fn focus_state_round_trip() {
        let db = Database::open_memory().unwrap();
        assert!(!db.focus_mode().unwrap().active);
        let state = FocusModeState::start(
            &FocusModeState::default(),
            FocusMode::BlockAllExceptSelected,
            25,
            ["com.notes".to_string()].into_iter().collect(),
            1_000,
        )
        .unwrap();
        db.save_focus_mode(&state).unwrap();
        assert_eq!(db.focus_mode().unwrap(), state);
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focusgate.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.set_pause_mode(PauseMode::Soft).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.pause_mode().unwrap(), PauseMode::Soft);
    }
}
