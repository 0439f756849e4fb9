//! Client-tier bindings for mobile (iOS/Android) via UniFFI.
//!
//! The phone keeps its own small persistent cache so recently used routes
//! render offline and without a round trip to the server.

use std::sync::Arc;

use log::{debug, info};

use crate::segment::ShapeSegmentExtractor;
use crate::{
    init_logging, simplify, CacheConfig, FilePersistence, GeoPoint, Polyline, RouteCache,
    RouteFingerprint, RoutePayload, RouteSource, SegmentSource, SystemClock,
};

/// Route geometry as seen by Kotlin/Swift.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRoute {
    pub points: Vec<GeoPoint>,
    pub distance_meters: f64,
    pub duration_seconds: u32,
    pub source: RouteSource,
}

impl From<&RoutePayload> for FfiRoute {
    fn from(payload: &RoutePayload) -> Self {
        Self {
            points: payload.geometry.points().to_vec(),
            distance_meters: payload.distance_meters,
            duration_seconds: payload.duration_seconds,
            source: payload.source,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSegment {
    pub points: Vec<GeoPoint>,
    pub distance_meters: f64,
    pub duration_seconds: u32,
    pub source: SegmentSource,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub cached_count: u64,
    pub max_size: u64,
    /// Fingerprints of the most used routes, highest first
    pub top_keys: Vec<String>,
}

/// Persistent route cache for the device.
#[derive(Debug, uniffi::Object)]
pub struct ClientRouteCache {
    cache: RouteCache,
}

#[uniffi::export]
impl ClientRouteCache {
    /// Open (or create) the cache stored at `path`.
    #[uniffi::constructor]
    pub fn new(path: String, max_entries: u32, ttl_secs: u64) -> Arc<Self> {
        init_logging();
        info!("[RouteGeometryRust] Opening client cache at {}", path);
        let config = CacheConfig {
            max_entries: max_entries as usize,
            default_ttl_secs: ttl_secs,
            ..CacheConfig::default()
        };
        let cache = RouteCache::with_persistence(
            config,
            Arc::new(SystemClock),
            Arc::new(FilePersistence::new(path)),
        );
        Arc::new(Self { cache })
    }

    pub fn get(&self, origin: GeoPoint, dest: GeoPoint) -> Option<FfiRoute> {
        self.cache.get(origin, dest).map(|payload| FfiRoute::from(payload.as_ref()))
    }

    pub fn put(&self, origin: GeoPoint, dest: GeoPoint, route: FfiRoute) {
        let payload = RoutePayload::new(
            Polyline::new(route.points),
            route.distance_meters,
            route.duration_seconds,
            route.source,
        );
        self.cache.insert(origin, dest, payload);
    }

    pub fn remove_expired(&self) -> u32 {
        self.cache.remove_expired() as u32
    }

    /// Write the cache to disk. Returns false if the write failed.
    pub fn flush(&self) -> bool {
        self.cache.flush_or_skip()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn metrics(&self) -> FfiCacheMetrics {
        let m = self.cache.metrics();
        FfiCacheMetrics {
            hits: m.hits,
            misses: m.misses,
            hit_rate: m.hit_rate,
            cached_count: m.cached_count as u64,
            max_size: m.max_size as u64,
            top_keys: m.top_entries.into_iter().map(|e| e.key).collect(),
        }
    }
}

/// Cache key for an origin/destination pair, as 16 hex digits.
#[uniffi::export]
pub fn route_fingerprint(origin: GeoPoint, dest: GeoPoint) -> String {
    RouteFingerprint::new(origin, dest).to_string()
}

/// Douglas-Peucker compression (epsilon in degrees).
#[uniffi::export]
pub fn ffi_compress(points: Vec<GeoPoint>, epsilon: f64) -> Vec<GeoPoint> {
    init_logging();
    let compressed = simplify::compress(&points, epsilon);
    debug!("[RouteGeometryRust] Compressed {} -> {} points", points.len(), compressed.len());
    compressed
}

/// Compress toward roughly `target_points` points.
#[uniffi::export]
pub fn ffi_compress_adaptive(points: Vec<GeoPoint>, target_points: u32) -> Vec<GeoPoint> {
    simplify::compress_adaptive(&points, target_points as usize)
}

/// Compress many polylines in one call (parallel).
#[uniffi::export]
pub fn ffi_compress_multiple(polylines: Vec<Vec<GeoPoint>>, epsilon: f64) -> Vec<Vec<GeoPoint>> {
    init_logging();
    let start = std::time::Instant::now();
    let result = simplify::compress_multiple(&polylines, epsilon);
    info!(
        "[RouteGeometryRust] Compressed {} polylines in {:?}",
        polylines.len(),
        start.elapsed()
    );
    result
}

/// Stop-to-stop slice of a transit shape. `None` if the shape is unusable.
#[uniffi::export]
pub fn ffi_extract_segment(shape: Vec<GeoPoint>, from_stop: GeoPoint, to_stop: GeoPoint) -> Option<FfiSegment> {
    ShapeSegmentExtractor::default()
        .extract(&shape, from_stop, to_stop)
        .map(|segment| FfiSegment {
            points: segment.polyline.into_points(),
            distance_meters: segment.distance_meters,
            duration_seconds: segment.duration_seconds,
            source: segment.source,
        })
}
