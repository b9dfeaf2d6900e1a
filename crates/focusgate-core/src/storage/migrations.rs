//! Database schema migrations for focusgate.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (fresh database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: rules, remote decision records and key/value state.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS rules (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern     TEXT NOT NULL,
            kind        TEXT NOT NULL,
            temporary   INTEGER NOT NULL DEFAULT 0,
            expires_at  INTEGER
        );

        CREATE TABLE IF NOT EXISTS decisions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            target      TEXT NOT NULL,
            decision    TEXT NOT NULL,
            reason      TEXT NOT NULL,
            decided_at  INTEGER NOT NULL,
            expires_at  INTEGER
        );

        CREATE TABLE IF NOT EXISTS state (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rules_expires_at ON rules(temporary, expires_at);
        CREATE INDEX IF NOT EXISTS idx_decisions_target ON decisions(target, decided_at);
        CREATE INDEX IF NOT EXISTS idx_decisions_expires_at ON decisions(expires_at);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: scheduled windows, points of interest and geo policies.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schedule_windows (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            target        TEXT NOT NULL,
            start_minute  INTEGER NOT NULL,
            end_minute    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS points_of_interest (
            id             TEXT PRIMARY KEY,
            lat            REAL NOT NULL,
            lon            REAL NOT NULL,
            radius_meters  REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS geo_policies (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            poi_id        TEXT NOT NULL,
            start_minute  INTEGER NOT NULL,
            end_minute    INTEGER NOT NULL,
            apps          TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_windows_target ON schedule_windows(target);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}
