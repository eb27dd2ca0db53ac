pub mod projection;
pub mod sweep;

pub use projection::{to_lat_lon, to_pixel, ProjectionError};
pub use sweep::GridSweepPlanner;

use serde::{Deserialize, Serialize};

use crate::models::GeoPoint;

/// Hard clamp applied to every navigation target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegionBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for RegionBounds {
    /// Mainland Korea and Jeju
    fn default() -> Self {
        Self {
            min_lat: 33.0,
            max_lat: 39.5,
            min_lon: 124.0,
            max_lon: 132.1,
        }
    }
}

impl RegionBounds {
    pub fn is_valid(&self) -> bool {
        self.min_lat < self.max_lat
            && self.min_lon < self.max_lon
            && self.min_lat > -90.0
            && self.max_lat < 90.0
            && self.min_lon >= -180.0
            && self.max_lon <= 180.0
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }

    pub fn clamp(&self, point: GeoPoint) -> GeoPoint {
        GeoPoint {
            lat: point.lat.clamp(self.min_lat, self.max_lat),
            lon: point.lon.clamp(self.min_lon, self.max_lon),
        }
    }
}
