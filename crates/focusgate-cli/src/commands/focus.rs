use clap::Subcommand;
use serde_json::json;

use focusgate_core::FocusMode;

use super::{open_engine, CliResult};

#[derive(Subcommand)]
pub enum FocusAction {
    /// Start focus mode
    Start {
        /// block-selected or block-all-except-selected
        #[arg(long, default_value = "block-selected")]
        mode: String,
        /// Duration in minutes
        #[arg(long, default_value_t = 25)]
        minutes: u32,
        /// Selected app identifier (repeatable)
        #[arg(long = "app")]
        apps: Vec<String>,
    },
    /// Stop focus mode
    Stop,
    /// Show focus mode state as JSON
    Status,
}

pub async fn run(action: FocusAction) -> CliResult {
    let (engine, _db) = open_engine()?;

    match action {
        FocusAction::Start {
            mode,
            minutes,
            apps,
        } => {
            let mode: FocusMode = mode.parse()?;
            let state = engine
                .start_focus_mode(mode, minutes, apps.into_iter().collect())
                .await?;
            println!("Focus mode started: {mode} for {minutes}m");
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        FocusAction::Stop => {
            engine.stop_focus_mode().await?;
            println!("Focus mode stopped");
        }
        FocusAction::Status => {
            let state = engine.focus_mode_status().await?;
            let now = chrono::Utc::now().timestamp_millis();
            let output = json!({
                "active": state.is_active(now),
                "mode": state.mode,
                "remaining_secs": state.remaining_millis(now) / 1000,
                "selected_apps": state.selected_apps,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
