//! Route providers: the slow, unreliable sources behind the cache.
//!
//! A provider turns an origin/destination pair into a geometry with distance
//! and duration. Concrete providers (routing engine, scraped itineraries,
//! transit shapes) live behind [`RouteProvider`] so the resolver can walk
//! them as a fallback chain.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use thiserror::Error;

use crate::geo_utils::haversine_distance;
use crate::{GeoPoint, Polyline, RouteSource};

/// Default assumed speed for straight-line estimates (walking, m/s).
pub const DEFAULT_STRAIGHT_LINE_SPEED_MPS: f64 = 1.2;

/// Why a provider could not produce a route.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not parse provider response: {0}")]
    Parse(String),
    #[error("no route between the requested points")]
    NoRoute,
    #[error("unusable geometry ({points} points, {distance_meters} m)")]
    InvalidGeometry { points: usize, distance_meters: f64 },
}

/// A route as returned by a provider, before simplification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub geometry: Polyline,
    pub distance_meters: f64,
    pub duration_seconds: u32,
    /// Provenance of this particular result
    pub source: RouteSource,
}

impl ProviderRoute {
    /// Reject degenerate results: fewer than two points or no distance.
    pub fn validate(self) -> Result<Self, ProviderError> {
        let usable = self.geometry.len() > 1
            && self.distance_meters.is_finite()
            && self.distance_meters > 0.0;
        if usable {
            Ok(self)
        } else {
            Err(ProviderError::InvalidGeometry {
                points: self.geometry.len(),
                distance_meters: self.distance_meters,
            })
        }
    }
}

/// Future returned by [`RouteProvider::get_route`].
pub type ProviderFuture<'a> = BoxFuture<'a, Result<ProviderRoute, ProviderError>>;

/// A source of route geometries.
pub trait RouteProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Compute a route. Implementations should not retry internally; the
    /// caller applies a timeout and moves on to the next provider.
    fn get_route(&self, origin: GeoPoint, dest: GeoPoint) -> ProviderFuture<'_>;
}

/// Query `provider` under `timeout` and validate the result.
pub async fn query_with_timeout(
    provider: &dyn RouteProvider,
    origin: GeoPoint,
    dest: GeoPoint,
    timeout: Duration,
) -> Result<ProviderRoute, ProviderError> {
    match tokio::time::timeout(timeout, provider.get_route(origin, dest)).await {
        Ok(result) => result.and_then(ProviderRoute::validate),
        Err(_) => {
            debug!("[{}] timed out after {:?}", provider.name(), timeout);
            Err(ProviderError::Timeout(timeout))
        }
    }
}

/// Two-point line between the endpoints at an assumed speed.
pub fn straight_line(origin: GeoPoint, dest: GeoPoint, speed_mps: f64) -> ProviderRoute {
    let distance_meters = haversine_distance(&origin, &dest);
    ProviderRoute {
        geometry: Polyline::new(vec![origin, dest]),
        distance_meters,
        duration_seconds: estimate_duration(distance_meters, speed_mps),
        source: RouteSource::StraightLine,
    }
}

/// Seconds to cover `distance_meters` at `speed_mps`, rounded.
pub fn estimate_duration(distance_meters: f64, speed_mps: f64) -> u32 {
    if speed_mps <= 0.0 || !distance_meters.is_finite() {
        return 0;
    }
    (distance_meters / speed_mps).round() as u32
}

/// Great-circle fallback provider.
///
/// Ignores the street network but never fails (except for identical
/// endpoints, which have no usable geometry). Put it last in a chain.
#[derive(Debug, Clone)]
pub struct StraightLineProvider {
    /// Assumed travel speed in m/s.
    pub speed_mps: f64,
}

impl Default for StraightLineProvider {
    fn default() -> Self {
        Self {
            speed_mps: DEFAULT_STRAIGHT_LINE_SPEED_MPS,
        }
    }
}

impl StraightLineProvider {
    pub fn new(speed_mps: f64) -> Self {
        Self { speed_mps }
    }
}

impl RouteProvider for StraightLineProvider {
    fn name(&self) -> &str {
        "straight-line"
    }

    fn get_route(&self, origin: GeoPoint, dest: GeoPoint) -> ProviderFuture<'_> {
        let route = straight_line(origin, dest, self.speed_mps);
        async move { Ok(route) }.boxed()
    }
}
