pub mod check;
pub mod config;
pub mod focus;
pub mod geo;
pub mod pause;
pub mod rule;
pub mod window;

use std::sync::Arc;

use focusgate_core::storage::get_or_create_device_id;
use focusgate_core::{Config, Database, EngineSettings, HttpClassifier, PolicyEngine, SystemClock};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Open the on-disk database and build an engine from the stored config.
pub fn open_engine() -> Result<(PolicyEngine, Arc<Database>), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Arc::new(Database::open()?);
    let device_id = match &config.device_id {
        Some(id) => id.clone(),
        None => get_or_create_device_id()?,
    };
    let classifier = HttpClassifier::new(&config.classifier, device_id)?;

    let engine = PolicyEngine::new(
        db.clone(),
        db.clone(),
        Arc::new(classifier),
        Arc::new(SystemClock::new()),
        EngineSettings::from_config(&config),
    );
    tracing::debug!(classifier = config.classifier.enabled, "engine ready");
    Ok((engine, db))
}

/// Parse a minute of day from "HH:MM" or a plain number of minutes.
pub fn parse_minute(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let minute = match value.split_once(':') {
        Some((h, m)) => {
            let hours: u32 = h.parse().map_err(|_| format!("invalid hour in '{value}'"))?;
            let minutes: u32 = m.parse().map_err(|_| format!("invalid minute in '{value}'"))?;
            if minutes >= 60 {
                return Err(format!("invalid minute in '{value}'"));
            }
            hours * 60 + minutes
        }
        None => value
            .parse()
            .map_err(|_| format!("expected HH:MM or minutes, got '{value}'"))?,
    };
    if minute > 24 * 60 {
        return Err(format!("'{value}' is past the end of the day"));
    }
    Ok(minute)
}

/// Render a minute of day as "HH:MM".
pub fn format_minute(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}
