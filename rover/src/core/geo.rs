//! Small spherical-earth helpers.

use crate::core::types::Position;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn distance_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlng = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Straight-line distance in degree space. Only meaningful for ranking nearby points.
pub fn distance_deg(a: &Position, b: &Position) -> f64 {
    (a.latitude - b.latitude).hypot(a.longitude - b.longitude)
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in `[0, 360)`.
pub fn bearing_deg(from: &Position, to: &Position) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlng = (to.longitude - from.longitude).to_radians();
    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    normalize_deg(y.atan2(x).to_degrees())
}

/// Point reached by travelling `meters` from `origin` along `bearing`.
///
/// Altitude is carried over unchanged.
pub fn destination(origin: &Position, bearing: f64, meters: f64) -> Position {
    let delta = meters / EARTH_RADIUS_M;
    let theta = bearing.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lng1 = origin.longitude.to_radians();
    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lng2 = lng1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    Position {
        latitude: lat2.to_degrees(),
        longitude: (lng2.to_degrees() + 540.0) % 360.0 - 180.0,
        altitude: origin.altitude,
    }
}

pub fn normalize_deg(deg: f64) -> f64 {
    let wrapped = deg % 360.0;
    if wrapped < 0.0 { wrapped + 360.0 } else { wrapped }
}
