use clap::Subcommand;
use serde_json::json;

use focusgate_core::{MinuteWindow, RuleStore};

use super::{format_minute, open_engine, parse_minute, CliResult};

#[derive(Subcommand)]
pub enum WindowAction {
    /// Allow a target every day between two times (may wrap midnight)
    Add {
        /// App identifier or URL fragment
        target: String,
        /// Start as HH:MM or minutes from midnight
        #[arg(long, value_parser = parse_minute)]
        start: u32,
        /// End as HH:MM or minutes from midnight (exclusive)
        #[arg(long, value_parser = parse_minute)]
        end: u32,
    },
    /// List scheduled windows as JSON
    List,
}

pub async fn run(action: WindowAction) -> CliResult {
    let (engine, db) = open_engine()?;

    match action {
        WindowAction::Add { target, start, end } => {
            let window = MinuteWindow::new(start, end)?;
            let id = engine.add_window(&target, window).await?;
            println!(
                "Window created: {id} ({target} {}-{})",
                format_minute(start),
                format_minute(end)
            );
        }
        WindowAction::List => {
            let windows: Vec<_> = db
                .load_windows()?
                .into_iter()
                .flat_map(|scheduled| {
                    let target = scheduled.target;
                    scheduled.windows.into_iter().map(move |w| {
                        json!({
                            "target": target,
                            "start": format_minute(w.start),
                            "end": format_minute(w.end),
                            "wraps_midnight": w.wraps_midnight(),
                        })
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&windows)?);
        }
    }
    Ok(())
}
