//! Core error types for focusgate-core.
//!
//! Administrative operations return these errors. The evaluation path
//! (`PolicyEngine::on_target_changed`) never does; every failure there is
//! folded into a `Decision`.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for focusgate-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Remote classifier errors
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking worker panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value could not be decoded
    #[error("Corrupt record in '{table}': {message}")]
    Corrupt { table: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors for administrative input.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    /// Pause mode string was not one of off|soft|hard
    #[error("Unknown pause mode '{0}' (expected off, soft or hard)")]
    UnknownPauseMode(String),

    /// Focus mode string was not recognized
    #[error("Unknown focus mode '{0}' (expected block-selected or block-all-except-selected)")]
    UnknownFocusMode(String),

    /// Rule kind string was not recognized
    #[error("Unknown rule kind '{0}' (expected whitelist or blacklist)")]
    UnknownRuleKind(String),

    /// Empty pattern or target
    #[error("'{0}' must not be empty")]
    Empty(String),

    /// Duration must be positive
    #[error("Invalid duration for '{field}': must be at least 1 minute")]
    NonPositiveDuration { field: String },

    /// Minute of day outside 0..=1440
    #[error("Invalid minute of day {value} for '{field}'")]
    MinuteOfDay { field: String, value: u32 },

    /// Latitude/longitude out of range
    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    Coordinate { lat: f64, lon: f64 },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Remote classification errors.
///
/// All of these are recovered by the fail-open policy; they only reach a
/// caller through `HttpClassifier::classify` directly.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// The call did not complete within the configured timeout
    #[error("Classifier timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Network/transport failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("Classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Body was not the expected schema
    #[error("Malformed classifier response: {0}")]
    Malformed(String),

    /// Classification is switched off in configuration
    #[error("Remote classification is disabled")]
    Disabled,

    /// Invalid endpoint URL
    #[error("Invalid classifier URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Worker(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_sqlite_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }

    #[test]
    fn other_sqlite_errors_map_to_query_failed() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(
            DatabaseError::from(err),
            DatabaseError::QueryFailed(_)
        ));
    }

    #[test]
    fn validation_messages_name_the_input() {
        let err = ValidationError::UnknownPauseMode("medium".into());
        assert!(err.to_string().contains("medium"));
    }
}
