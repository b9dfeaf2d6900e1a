use clap::Subcommand;
use serde_json::json;

use focusgate_core::{GeoBlockPolicy, PointOfInterest, RuleStore};

use super::{open_engine, parse_minute, CliResult};

#[derive(Subcommand)]
pub enum GeoAction {
    /// Add or replace a point of interest
    PoiAdd {
        id: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in meters
        #[arg(long, default_value_t = 100.0)]
        radius: f64,
    },
    /// Block apps near a point of interest during a daily window
    PolicyAdd {
        /// Point of interest id
        poi: String,
        /// Start as HH:MM or minutes from midnight
        #[arg(long, value_parser = parse_minute, default_value = "0")]
        start: u32,
        /// End as HH:MM or minutes from midnight (exclusive)
        #[arg(long, value_parser = parse_minute, default_value = "1440")]
        end: u32,
        /// App identifier to block (repeatable)
        #[arg(long = "app", required = true)]
        apps: Vec<String>,
    },
    /// List points of interest and policies as JSON
    List,
}

pub async fn run(action: GeoAction) -> CliResult {
    let (engine, db) = open_engine()?;

    match action {
        GeoAction::PoiAdd {
            id,
            lat,
            lon,
            radius,
        } => {
            engine
                .add_point_of_interest(PointOfInterest {
                    id: id.clone(),
                    lat,
                    lon,
                    radius_meters: radius,
                })
                .await?;
            println!("Point of interest saved: {id}");
        }
        GeoAction::PolicyAdd {
            poi,
            start,
            end,
            apps,
        } => {
            let id = engine
                .add_geo_policy(GeoBlockPolicy {
                    poi_id: poi,
                    start_minute: start,
                    end_minute: end,
                    apps: apps.into_iter().collect(),
                })
                .await?;
            println!("Geo policy created: {id}");
        }
        GeoAction::List => {
            let output = json!({
                "points_of_interest": db.load_points_of_interest()?,
                "policies": db.load_geo_policies()?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
