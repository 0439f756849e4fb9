//! Spatial fingerprints for origin/destination pairs.
//!
//! Both endpoints are snapped to a 4-decimal grid (about 11 m of latitude)
//! and the four grid indices are hashed into a 64-bit key. Two requests whose
//! endpoints fall in the same grid cells share a key regardless of GPS noise
//! inside the cell.
//!
//! The hash is XxHash64 with a fixed seed so keys are stable across processes
//! and releases; persisted cache snapshots depend on that.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::GeoPoint;

/// Decimal digits kept when snapping coordinates to the grid.
pub const GRID_DECIMALS: i32 = 4;

const GRID_SCALE: f64 = 10_000.0;
const FINGERPRINT_SEED: u64 = 0x5eed_0f_c0de;

/// Fixed-width cache key for an origin/destination pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteFingerprint(u64);

impl RouteFingerprint {
    /// Fingerprint an origin/destination pair.
    ///
    /// Coordinates are not validated here; callers reject out-of-range or
    /// non-finite points first.
    ///
    /// ```
    /// use route_geometry::{GeoPoint, RouteFingerprint};
    ///
    /// let a = RouteFingerprint::new(GeoPoint::new(-33.43721, -70.65061), GeoPoint::new(-33.4489, -70.6693));
    /// let b = RouteFingerprint::new(GeoPoint::new(-33.43719, -70.65059), GeoPoint::new(-33.4489, -70.6693));
    /// assert_eq!(a, b);
    /// ```
    pub fn new(origin: GeoPoint, dest: GeoPoint) -> Self {
        Self::hash_cells(None, origin, dest)
    }

    /// Fingerprint a pair within a named scope, e.g. `"walk"` or `"bus:<shape_id>"`.
    ///
    /// Scoped keys never equal unscoped keys for the same coordinates in practice,
    /// so leg geometries of different modes can share one cache.
    pub fn scoped(scope: &str, origin: GeoPoint, dest: GeoPoint) -> Self {
        Self::hash_cells(Some(scope), origin, dest)
    }

    /// Rebuild a fingerprint from its raw value (e.g. a persisted key).
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    fn hash_cells(scope: Option<&str>, origin: GeoPoint, dest: GeoPoint) -> Self {
        let mut hasher = XxHash64::with_seed(FINGERPRINT_SEED);
        if let Some(scope) = scope {
            hasher.write(scope.as_bytes());
            // separator so "ab"+cells can't alias "a"+"b..."
            hasher.write_u8(0xff);
        }
        for cell in grid_cells(origin, dest) {
            hasher.write(&cell.to_le_bytes());
        }
        Self(hasher.finish())
    }
}

impl fmt::Display for RouteFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Snap a coordinate to its grid index.
#[inline]
fn grid_index(value: f64) -> i64 {
    // `as` saturates; `+ 0.0` folds -0.0 into 0.0
    ((value * GRID_SCALE).round() + 0.0) as i64
}

fn grid_cells(origin: GeoPoint, dest: GeoPoint) -> [i64; 4] {
    [
        grid_index(origin.lat),
        grid_index(origin.lon),
        grid_index(dest.lat),
        grid_index(dest.lon),
    ]
}

/// Round a coordinate to the fingerprint grid (4 decimals).
pub fn snap_to_grid(point: GeoPoint) -> GeoPoint {
    GeoPoint::new(
        grid_index(point.lat) as f64 / GRID_SCALE,
        grid_index(point.lon) as f64 / GRID_SCALE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn santiago_pair() -> (GeoPoint, GeoPoint) {
        (GeoPoint::new(-33.4372, -70.6506), GeoPoint::new(-33.4489, -70.6693))
    }

    #[test]
    fn test_same_cell_same_fingerprint() {
        let (origin, dest) = santiago_pair();
        let base = RouteFingerprint::new(origin, dest);

        // Jitter well inside half a grid step
        for jitter in [-0.00004, -0.00001, 0.00001, 0.00004] {
            let o = GeoPoint::new(origin.lat + jitter, origin.lon - jitter);
            let d = GeoPoint::new(dest.lat - jitter, dest.lon + jitter);
            assert_eq!(RouteFingerprint::new(o, d), base, "jitter {}", jitter);
        }
    }

    #[test]
    fn test_distant_pairs_differ() {
        let (origin, dest) = santiago_pair();
        let base = RouteFingerprint::new(origin, dest);

        // More than twice the tolerance away on each axis in turn
        let step = 0.00025;
        let moved = [
            (GeoPoint::new(origin.lat + step, origin.lon), dest),
            (GeoPoint::new(origin.lat, origin.lon + step), dest),
            (origin, GeoPoint::new(dest.lat + step, dest.lon)),
            (origin, GeoPoint::new(dest.lat, dest.lon - step)),
        ];
        for (o, d) in moved {
            assert_ne!(RouteFingerprint::new(o, d), base);
        }
    }

    #[test]
    fn test_direction_matters() {
        let (origin, dest) = santiago_pair();
        assert_ne!(RouteFingerprint::new(origin, dest), RouteFingerprint::new(dest, origin));
    }

    #[test]
    fn test_many_nearby_cells_do_not_collide() {
        let (origin, dest) = santiago_pair();
        let mut seen = std::collections::HashSet::new();
        for i in 0..50 {
            for j in 0..50 {
                let o = GeoPoint::new(origin.lat + i as f64 * 0.0003, origin.lon + j as f64 * 0.0003);
                assert!(seen.insert(RouteFingerprint::new(o, dest)));
            }
        }
    }

    #[test]
    fn test_scoped_differs_from_unscoped() {
        let (origin, dest) = santiago_pair();
        let plain = RouteFingerprint::new(origin, dest);
        let walk = RouteFingerprint::scoped("walk", origin, dest);
        let bus = RouteFingerprint::scoped("bus:shape-7", origin, dest);
        assert_ne!(plain, walk);
        assert_ne!(walk, bus);
        assert_eq!(walk, RouteFingerprint::scoped("walk", origin, dest));
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let a = RouteFingerprint::new(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0));
        let b = RouteFingerprint::new(GeoPoint::new(-0.00001, -0.0), GeoPoint::new(1.0, 1.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        let (origin, dest) = santiago_pair();
        let key = RouteFingerprint::new(origin, dest).to_string();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(RouteFingerprint::from_raw(1).to_string(), "0000000000000001");
    }

    #[test]
    fn test_snap_to_grid() {
        let snapped = snap_to_grid(GeoPoint::new(-33.43724, -70.65056));
        assert!((snapped.lat - -33.4372).abs() < 1e-9);
        assert!((snapped.lon - -70.6506).abs() < 1e-9);
    }
}
