//! Stable device identifier sent with every remote classification request.
//!
//! Format: "focusgate-<uuid>", persisted in `device_id.txt`.

use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use super::data_dir;
use crate::error::{ConfigError, CoreError, Result};

const DEVICE_ID_FILE: &str = "device_id.txt";
const DEVICE_ID_PREFIX: &str = "focusgate-";

/// Get or create the device id stored under `path`.
///
/// # Errors
/// Returns an error if the file cannot be read or written, or holds an id
/// in the wrong format.
pub fn get_or_create_device_id_at(path: &Path) -> Result<String> {
    let device_id_path = path.join(DEVICE_ID_FILE);

    if device_id_path.exists() {
        let content = fs::read_to_string(&device_id_path)?;
        let device_id = content.trim().to_string();
        if !device_id.starts_with(DEVICE_ID_PREFIX) {
            return Err(CoreError::Config(ConfigError::InvalidValue {
                key: "device_id".into(),
                message: format!("'{device_id}' is not a focusgate device id"),
            }));
        }
        return Ok(device_id);
    }

    let device_id = format!("{DEVICE_ID_PREFIX}{}", Uuid::new_v4());
    fs::create_dir_all(path)?;
    let mut file = fs::File::create(&device_id_path)?;
    writeln!(file, "{device_id}")?;

    tracing::info!(device_id = %device_id, "created device id");
    Ok(device_id)
}

/// Get or create the device id in the data directory.
///
/// # Errors
/// See [`get_or_create_device_id_at`].
pub fn get_or_create_device_id() -> Result<String> {
    get_or_create_device_id_at(&data_dir()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn device_id_format() {
        let temp_dir = TempDir::new().unwrap();
        let device_id = get_or_create_device_id_at(temp_dir.path()).unwrap();

        assert!(device_id.starts_with(DEVICE_ID_PREFIX));
        assert_eq!(device_id.len(), DEVICE_ID_PREFIX.len() + 36);
    }

    #[test]
    fn device_id_persists() {
        let temp_dir = TempDir::new().unwrap();
        let first = get_or_create_device_id_at(temp_dir.path()).unwrap();
        let second = get_or_create_device_id_at(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested/path");
        let device_id = get_or_create_device_id_at(&nested).unwrap();
        assert!(nested.join(DEVICE_ID_FILE).exists());
        assert!(device_id.starts_with(DEVICE_ID_PREFIX));
    }

    #[test]
    fn foreign_id_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(DEVICE_ID_FILE), "pomodoro-1234\n").unwrap();
        assert!(get_or_create_device_id_at(temp_dir.path()).is_err());
    }
}
