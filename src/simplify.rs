//! Douglas-Peucker polyline compression.
//!
//! Distances are planar on raw lat/lon degrees (see
//! [`perpendicular_distance`]), so `epsilon` is in degrees:
//! 0.0001 is roughly 11 m. Good enough for routes under ~100 km.
//!
//! The split recursion runs on an explicit stack so very long transit shapes
//! cannot exhaust the thread stack; the output is identical to the textbook
//! recursive form.

use crate::geo_utils::perpendicular_distance;
use crate::{GeoPoint, Polyline};

/// Epsilon (degrees) per unit of `ln(len / target)` in [`compress_adaptive`].
pub const ADAPTIVE_EPSILON_SCALE: f64 = 0.00001;

/// Simplify `points` so no removed point lies farther than `epsilon` from the
/// kept chord that replaced it.
///
/// First and last points are always kept unchanged. Inputs of two points or
/// fewer come back as-is.
///
/// ```
/// use route_geometry::{GeoPoint, simplify};
///
/// let line: Vec<GeoPoint> = (0..50).map(|i| GeoPoint::new(0.0, i as f64 * 0.001)).collect();
/// let compressed = simplify::compress(&line, 0.0001);
/// assert_eq!(compressed, vec![line[0], line[49]]);
/// ```
pub fn compress(points: &[GeoPoint], epsilon: f64) -> Vec<GeoPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    let mut spans = vec![(0usize, last)];
    while let Some((start, end)) = spans.pop() {
        if end <= start + 1 {
            continue;
        }
        let (index, distance) = farthest_from_chord(points, start, end);
        if distance > epsilon {
            keep[index] = true;
            spans.push((index, end));
            spans.push((start, index));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Index and distance of the interior point farthest from the chord
/// `points[start]..points[end]`. The first maximum wins.
fn farthest_from_chord(points: &[GeoPoint], start: usize, end: usize) -> (usize, f64) {
    let (a, b) = (&points[start], &points[end]);
    let mut best = (start, 0.0);
    for (i, p) in points.iter().enumerate().take(end).skip(start + 1) {
        let d = perpendicular_distance(p, a, b);
        if d > best.1 {
            best = (i, d);
        }
    }
    best
}

/// [`compress`] on a [`Polyline`].
pub fn compress_polyline(polyline: &Polyline, epsilon: f64) -> Polyline {
    Polyline::new(compress(polyline.points(), epsilon))
}

/// Compress toward roughly `target_points` points.
///
/// Epsilon grows with `ln(len / target_points)`; the result size is
/// approximate. Inputs already at or under the target come back unchanged.
pub fn compress_adaptive(points: &[GeoPoint], target_points: usize) -> Vec<GeoPoint> {
    let target = target_points.max(2);
    if points.len() <= target {
        return points.to_vec();
    }
    let epsilon = adaptive_epsilon(points.len(), target);
    compress(points, epsilon)
}

/// Epsilon used by [`compress_adaptive`] for a given input size and target.
pub fn adaptive_epsilon(len: usize, target_points: usize) -> f64 {
    let target = target_points.max(2);
    if len <= target {
        return 0.0;
    }
    ADAPTIVE_EPSILON_SCALE * (len as f64 / target as f64).ln()
}

/// Compress each polyline independently.
#[cfg(feature = "parallel")]
pub fn compress_multiple(polylines: &[Vec<GeoPoint>], epsilon: f64) -> Vec<Vec<GeoPoint>> {
    use rayon::prelude::*;

    polylines
        .par_iter()
        .map(|points| compress(points, epsilon))
        .collect()
}

/// Compress each polyline independently.
#[cfg(not(feature = "parallel"))]
pub fn compress_multiple(polylines: &[Vec<GeoPoint>], epsilon: f64) -> Vec<Vec<GeoPoint>> {
    polylines
        .iter()
        .map(|points| compress(points, epsilon))
        .collect()
}
