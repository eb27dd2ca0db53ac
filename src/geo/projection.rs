//! Web Mercator conversion between geographic and world pixel coordinates.
//!
//! Uses the 256 px tile convention, so a world at zoom `z` is
//! `256 * 2^z` pixels on each side.

use std::f64::consts::PI;

use crate::models::{GeoPoint, PixelPoint};

/// Latitude at or beyond which the projection is singular
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("latitude {0} is outside the projectable range (|lat| < 90)")]
pub struct ProjectionError(pub f64);

pub fn world_size(zoom: f64) -> f64 {
    256.0 * 2f64.powf(zoom)
}

pub fn to_pixel(point: GeoPoint, zoom: f64) -> Result<PixelPoint, ProjectionError> {
    if !(point.lat.abs() < 90.0) {
        return Err(ProjectionError(point.lat));
    }
    let scale = world_size(zoom);
    let sin_lat = point.lat.to_radians().sin();
    let x = (point.lon + 180.0) / 360.0 * scale;
    let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI)) * scale;
    Ok(PixelPoint { x, y })
}

pub fn to_lat_lon(pixel: PixelPoint, zoom: f64) -> GeoPoint {
    let scale = world_size(zoom);
    let lon = pixel.x / scale * 360.0 - 180.0;
    let n = PI - 2.0 * PI * pixel.y / scale;
    GeoPoint {
        lat: n.sinh().atan().to_degrees(),
        lon,
    }
}
