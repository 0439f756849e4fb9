//! # Route Geometry
//!
//! Route geometry caching, compression and transit shape extraction for
//! accessible navigation.
//!
//! This library provides:
//! - Spatial fingerprints that map noisy GPS coordinate pairs to stable cache keys
//! - A bounded route cache with TTL expiry and frequency-first eviction
//! - Douglas-Peucker polyline compression
//! - Stop-to-stop segment extraction from transit line shapes
//! - A resolver that walks a fallback chain of route providers on cache misses
//!
//! ## Features
//!
//! - **`parallel`** - Compress batches of polylines with rayon
//! - **`http`** - OSRM routing engine provider
//! - **`ffi`** - Client-tier bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use route_geometry::{
//!     CacheConfig, GeoPoint, Polyline, RouteCache, RoutePayload, RouteSource, SystemClock,
//!     simplify,
//! };
//!
//! let origin = GeoPoint::new(-33.4372, -70.6506);
//! let dest = GeoPoint::new(-33.4489, -70.6693);
//!
//! let raw = vec![origin, GeoPoint::new(-33.4430, -70.6600), dest];
//! let geometry = Polyline::new(simplify::compress(&raw, 0.0001));
//!
//! let cache = RouteCache::new(CacheConfig::default(), Arc::new(SystemClock));
//! cache.insert(origin, dest, RoutePayload::new(geometry, 2_150.0, 1_650, RouteSource::Engine));
//!
//! // A few meters of GPS noise still lands in the same grid cell
//! let noisy = GeoPoint::new(-33.43721, -70.65062);
//! assert!(cache.get(noisy, dest).is_some());
//! ```

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod clock;
pub mod fingerprint;
pub mod geo_utils;
pub mod itinerary;
pub mod maintenance;
pub mod persistence;
pub mod provider;
pub mod resolver;
pub mod segment;
pub mod simplify;

// Routing engine over HTTP
#[cfg(feature = "http")]
pub mod osrm;

#[cfg(feature = "ffi")]
mod ffi;

pub use cache::{CacheConfig, CacheEntry, CacheMetrics, EvictionPolicy, RouteCache, TopEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::RouteFingerprint;
pub use itinerary::{
    ItineraryLeg, ItineraryOption, ItineraryPlanner, ItinerarySource, ItinerarySummary,
    LegGeometry, ResolvedItinerary,
};
pub use maintenance::{MaintenanceConfig, MaintenanceHandle, spawn_maintenance};
pub use persistence::{CacheSnapshot, FilePersistence, MemoryPersistence, PersistenceError, PersistenceStore};
pub use provider::{ProviderError, ProviderRoute, RouteProvider, StraightLineProvider};
pub use resolver::{Resolution, ResolveError, ResolveState, ResolverConfig, RouteResolver};
pub use segment::{
    ExtractorConfig, InMemoryShapeStore, LegMode, SegmentError, SegmentExtractionResult,
    SegmentSource, ShapeLegProvider, ShapeSegmentExtractor, ShapeStore,
};

#[cfg(feature = "http")]
pub use osrm::{OsrmConfig, OsrmProvider};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteGeometryRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate in WGS84 degrees.
///
/// # Example
/// ```
/// use route_geometry::GeoPoint;
/// let point = GeoPoint::new(-33.4372, -70.6506); // Santiago
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lon >= -180.0
            && self.lon <= 180.0
    }
}

/// Bounding box of a route geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bounds {
    /// Create bounds from points. Returns `None` for empty input.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(geo_utils::compute_bounds(points))
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// An ordered sequence of points. Order defines the direction of travel.
///
/// On the wire a polyline is an array of `[longitude, latitude]` pairs
/// (GeoJSON coordinate order). Consumers depend on that order.
///
/// ```
/// use route_geometry::{GeoPoint, Polyline};
///
/// let line = Polyline::new(vec![GeoPoint::new(-33.0, -70.0), GeoPoint::new(-33.1, -70.2)]);
/// let json = serde_json::to_string(&line).unwrap();
/// assert_eq!(json, "[[-70.0,-33.0],[-70.2,-33.1]]");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polyline {
    points: Vec<GeoPoint>,
}

impl Polyline {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self { points }
    }

    /// Build a polyline from GeoJSON-ordered `[lon, lat]` pairs.
    pub fn from_lon_lat(coords: &[[f64; 2]]) -> Self {
        Self {
            points: coords.iter().map(|c| GeoPoint::new(c[1], c[0])).collect(),
        }
    }

    /// GeoJSON-ordered `[lon, lat]` pairs.
    pub fn to_lon_lat(&self) -> Vec<[f64; 2]> {
        self.points.iter().map(|p| [p.lon, p.lat]).collect()
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<GeoPoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&GeoPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&GeoPoint> {
        self.points.last()
    }

    /// Length along the polyline in meters.
    pub fn length_meters(&self) -> f64 {
        geo_utils::polyline_length(&self.points)
    }
}

impl From<Vec<GeoPoint>> for Polyline {
    fn from(points: Vec<GeoPoint>) -> Self {
        Self::new(points)
    }
}

impl Serialize for Polyline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.points.len()))?;
        for p in &self.points {
            seq.serialize_element(&[p.lon, p.lat])?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Polyline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let coords = Vec::<[f64; 2]>::deserialize(deserializer)?;
        Ok(Self::from_lon_lat(&coords))
    }
}

/// Which source produced a route geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum RouteSource {
    /// Vehicle/foot routing engine
    Engine,
    /// Exact stop-to-stop slice of a transit shape
    Shape,
    /// Whole transit shape (stops matched out of order)
    FullShape,
    /// Scraped third-party itinerary
    ScrapeFallback,
    /// Synthesized two-point line
    StraightLine,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Engine => "engine",
            RouteSource::Shape => "shape",
            RouteSource::FullShape => "full-shape",
            RouteSource::ScrapeFallback => "scrape-fallback",
            RouteSource::StraightLine => "straight-line",
        }
    }

    /// True for sources that only approximate the real path.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            RouteSource::FullShape | RouteSource::ScrapeFallback | RouteSource::StraightLine
        )
    }
}

impl std::fmt::Display for RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved route. Immutable once cached; replacing it creates a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePayload {
    /// Route geometry (serialized as `[lon, lat]` pairs)
    pub geometry: Polyline,
    /// Route distance in meters
    pub distance_meters: f64,
    /// Estimated travel time in seconds
    pub duration_seconds: u32,
    /// Provenance of the geometry
    pub source: RouteSource,
    /// Pre-computed bounding box for map rendering
    pub bounds: Option<Bounds>,
}

impl RoutePayload {
    pub fn new(
        geometry: Polyline,
        distance_meters: f64,
        duration_seconds: u32,
        source: RouteSource,
    ) -> Self {
        let bounds = Bounds::from_points(geometry.points());
        Self {
            geometry,
            distance_meters,
            duration_seconds,
            source,
            bounds,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
