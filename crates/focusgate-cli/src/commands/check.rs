use clap::Args;
use serde::Serialize;

use focusgate_core::Target;

use super::{open_engine, CliResult};

#[derive(Args)]
pub struct CheckArgs {
    /// Foreground app identifier
    #[arg(long)]
    app: Option<String>,
    /// Foreground URL
    #[arg(long)]
    url: Option<String>,
    /// Last-known latitude
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    /// Last-known longitude
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    target: &'a str,
    decision: &'a str,
    reason: &'a str,
}

pub async fn run(args: CheckArgs) -> CliResult {
    let (engine, _db) = open_engine()?;
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        engine.update_location(lat, lon)?;
    }

    let target = Target::new(args.app, args.url);
    let decision = engine.on_target_changed(&target).await;
    let output = CheckOutput {
        target: target.canonical(),
        decision: decision.verdict(),
        reason: decision.reason(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
