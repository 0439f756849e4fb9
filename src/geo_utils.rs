//! # Geographic Utilities
//!
//! Distance and extent computations shared by the simplifier, the shape
//! extractor and the providers.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`polyline_length`] | Total length of a polyline in meters |
//! | [`perpendicular_distance`] | Planar point-to-line distance in degrees |
//! | [`compute_bounds`] | Bounding box of a polyline |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//!
//! ## Example
//!
//! ```rust
//! use route_geometry::{GeoPoint, geo_utils};
//!
//! let track = vec![
//!     GeoPoint::new(-33.4372, -70.6506),
//!     GeoPoint::new(-33.4420, -70.6580),
//!     GeoPoint::new(-33.4489, -70.6693),
//! ];
//!
//! let length = geo_utils::polyline_length(&track);
//! assert!(length > 2_000.0 && length < 2_500.0);
//! ```
//!
//! ## Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).
//! [`perpendicular_distance`] treats lat/lon as a plane, which is only a fair
//! approximation for spans under roughly 100 km.

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GeoPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two points in meters.
///
/// ```rust
/// use route_geometry::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.lon, p1.lat);
    let point2 = Point::new(p2.lon, p2.lat);
    Haversine::distance(point1, point2)
}

/// Total length of a polyline in meters. Empty or single-point input returns 0.0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Planar distance from `point` to the infinite line through `start` and `end`,
/// in degrees, with longitude as x and latitude as y.
///
/// A zero-length base segment falls back to the Euclidean distance between
/// `point` and `start`.
pub fn perpendicular_distance(point: &GeoPoint, start: &GeoPoint, end: &GeoPoint) -> f64 {
    let (x0, y0) = (point.lon, point.lat);
    let (x1, y1) = (start.lon, start.lat);
    let (x2, y2) = (end.lon, end.lat);

    let dx = x2 - x1;
    let dy = y2 - y1;
    let base = (dy * dy + dx * dx).sqrt();

    if base == 0.0 {
        return ((x0 - x1).powi(2) + (y0 - y1).powi(2)).sqrt();
    }

    (dy * x0 - dx * y0 + x2 * y1 - y2 * x1).abs() / base
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale at `latitude`, which is the larger of the two
/// degree sizes, so the result is conservative for tolerances.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    // At the equator, 1 degree ≈ 111,320 meters
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Bounding Box
// =============================================================================

/// Compute the bounding box of a set of points.
///
/// For empty input the bounds are inverted (MIN/MAX sentinels); use
/// [`Bounds::from_points`] when the input may be empty.
pub fn compute_bounds(points: &[GeoPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lon = f64::MAX;
    let mut max_lon = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lon = min_lon.min(p.lon);
        max_lon = max_lon.max(p.lon);
    }

    Bounds { min_lat, max_lat, min_lon, max_lon }
}

// =============================================================================
// Unit Tests
// =============================================================================
