//! Location and time-window based blocking.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::cooldown::MinuteWindow;
use crate::error::ValidationError;
use crate::target::Target;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(ValidationError::Coordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Haversine distance in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_meters: f64,
}

impl PointOfInterest {
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }

    /// Inclusive: a position exactly at the radius is inside.
    pub fn contains(&self, position: &GeoPoint) -> bool {
        self.center().distance_to(position) <= self.radius_meters
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoBlockPolicy {
    pub poi_id: String,
    pub start_minute: u32,
    pub end_minute: u32,
    pub apps: HashSet<String>,
}

impl GeoBlockPolicy {
    pub fn window(&self) -> MinuteWindow {
        MinuteWindow {
            start: self.start_minute,
            end: self.end_minute,
        }
    }
}

/// Points of interest plus the policies that reference them.
#[derive(Debug, Clone, Default)]
pub struct GeofenceEvaluator {
    pois: HashMap<String, PointOfInterest>,
    policies: Vec<GeoBlockPolicy>,
}

impl GeofenceEvaluator {
    pub fn new(pois: Vec<PointOfInterest>, policies: Vec<GeoBlockPolicy>) -> Self {
        Self {
            pois: pois.into_iter().map(|p| (p.id.clone(), p)).collect(),
            policies,
        }
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Whether a geo policy blocks `target` at `minute_of_day` and
    /// `position`. Unknown location never blocks; policies referencing a
    /// missing POI are skipped.
    pub fn is_blocked(&self, target: &Target, minute_of_day: u32, position: Option<GeoPoint>) -> bool {
        let Some(position) = position else {
            return false;
        };

        self.policies.iter().any(|policy| {
            let Some(poi) = self.pois.get(&policy.poi_id) else {
                return false;
            };
            target.is_in(&policy.apps)
                && policy.window().contains(minute_of_day)
                && poi.contains(&position)
        })
    }
}
