//! # Shape Segment Extraction
//!
//! Derives the geometry of a bus leg (stop A to stop B) from the full
//! physical path of the transit line, as published in the schedule feed.
//!
//! ## Algorithm
//! 1. Find the shape point nearest to each stop (brute-force haversine)
//! 2. If the boarding index comes before the alighting index, slice the shape
//! 3. Otherwise the shape runs the other way (or the stops were swapped):
//!    return the whole shape, tagged [`SegmentSource::FullShapeFallback`]
//!
//! When there is no usable shape, the leg degrades to the routing engine and
//! finally to a straight line. Callers always get a drawable path back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo_utils::{haversine_distance, polyline_length};
use crate::provider::{
    estimate_duration, query_with_timeout, straight_line, ProviderError, ProviderFuture,
    ProviderRoute, RouteProvider,
};
use crate::{GeoPoint, Polyline, RouteSource};

/// How a leg is travelled. Selects the assumed speed for duration estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LegMode {
    Walk,
    Bus,
}

impl LegMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegMode::Walk => "walk",
            LegMode::Bus => "bus",
        }
    }
}

/// Where an extracted segment's geometry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SegmentSource {
    /// Slice of the shape between the two stops
    Exact,
    /// Stops matched out of order; the whole shape was returned
    FullShapeFallback,
    /// No shape; routing engine geometry
    EngineFallback,
    /// Nothing else worked; two-point line
    StraightLineFallback,
}

impl From<SegmentSource> for RouteSource {
    fn from(source: SegmentSource) -> Self {
        match source {
            SegmentSource::Exact => RouteSource::Shape,
            SegmentSource::FullShapeFallback => RouteSource::FullShape,
            SegmentSource::EngineFallback => RouteSource::Engine,
            SegmentSource::StraightLineFallback => RouteSource::StraightLine,
        }
    }
}

/// Geometry for one stop-to-stop leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentExtractionResult {
    pub polyline: Polyline,
    pub distance_meters: f64,
    pub duration_seconds: u32,
    pub source: SegmentSource,
}

/// Errors that leave nothing to fall back to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("unknown stop code: {0}")]
    UnknownStop(String),
    #[error("unknown shape id: {0}")]
    UnknownShape(String),
    #[error("shape store failed: {0}")]
    Store(String),
}

/// Read access to transit shapes and stop positions.
pub trait ShapeStore: Send + Sync {
    /// Ordered points of a line's physical path.
    fn shape_points(&self, shape_id: &str) -> Result<Vec<GeoPoint>, SegmentError>;

    /// Position of a stop.
    fn stop_coordinates(&self, stop_code: &str) -> Result<GeoPoint, SegmentError>;
}

/// Shape store held in memory (loaded from a feed at startup, or in tests).
#[derive(Debug, Clone, Default)]
pub struct InMemoryShapeStore {
    shapes: HashMap<String, Vec<GeoPoint>>,
    stops: HashMap<String, GeoPoint>,
}

impl InMemoryShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shape(mut self, shape_id: impl Into<String>, points: Vec<GeoPoint>) -> Self {
        self.shapes.insert(shape_id.into(), points);
        self
    }

    pub fn with_stop(mut self, stop_code: impl Into<String>, point: GeoPoint) -> Self {
        self.stops.insert(stop_code.into(), point);
        self
    }
}

impl ShapeStore for InMemoryShapeStore {
    fn shape_points(&self, shape_id: &str) -> Result<Vec<GeoPoint>, SegmentError> {
        self.shapes
            .get(shape_id)
            .cloned()
            .ok_or_else(|| SegmentError::UnknownShape(shape_id.to_string()))
    }

    fn stop_coordinates(&self, stop_code: &str) -> Result<GeoPoint, SegmentError> {
        self.stops
            .get(stop_code)
            .copied()
            .ok_or_else(|| SegmentError::UnknownStop(stop_code.to_string()))
    }
}

/// Configuration for segment extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Assumed walking speed in m/s. Default: 1.0 (accessible pace)
    pub walking_speed_mps: f64,
    /// Assumed average bus speed in m/s, stops included. Default: 5.5 (~20 km/h)
    pub bus_speed_mps: f64,
    /// Timeout for the routing engine fallback. Default: 5000 ms
    pub engine_timeout_ms: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            walking_speed_mps: 1.0,
            bus_speed_mps: 5.5,
            engine_timeout_ms: 5_000,
        }
    }
}

/// Index of the shape point nearest to `target`. First index wins ties.
pub fn nearest_index(shape: &[GeoPoint], target: &GeoPoint) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in shape.iter().enumerate() {
        let d = haversine_distance(p, target);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}

/// Extracts stop-to-stop geometry from transit shapes.
#[derive(Debug, Clone, Default)]
pub struct ShapeSegmentExtractor {
    config: ExtractorConfig,
}

impl ShapeSegmentExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn speed_for(&self, mode: LegMode) -> f64 {
        match mode {
            LegMode::Walk => self.config.walking_speed_mps,
            LegMode::Bus => self.config.bus_speed_mps,
        }
    }

    /// Slice `shape` between the points nearest to `from_stop` and `to_stop`.
    ///
    /// Returns `None` when the shape has fewer than two points. Durations use
    /// the bus speed.
    ///
    /// ```
    /// use route_geometry::{GeoPoint, SegmentSource, ShapeSegmentExtractor};
    ///
    /// let shape: Vec<GeoPoint> = (0..4).map(|i| GeoPoint::new(0.0, i as f64)).collect();
    /// let extractor = ShapeSegmentExtractor::default();
    ///
    /// let leg = extractor.extract(&shape, GeoPoint::new(0.0, 0.1), GeoPoint::new(0.0, 2.1)).unwrap();
    /// assert_eq!(leg.polyline.len(), 3);
    /// assert_eq!(leg.source, SegmentSource::Exact);
    /// ```
    pub fn extract(
        &self,
        shape: &[GeoPoint],
        from_stop: GeoPoint,
        to_stop: GeoPoint,
    ) -> Option<SegmentExtractionResult> {
        if shape.len() < 2 {
            return None;
        }
        let start_idx = nearest_index(shape, &from_stop)?;
        let end_idx = nearest_index(shape, &to_stop)?;

        let (points, source) = if start_idx < end_idx {
            (&shape[start_idx..=end_idx], SegmentSource::Exact)
        } else {
            debug!(
                "[ShapeSegmentExtractor] Stops match out of order ({} >= {}), using full shape",
                start_idx, end_idx
            );
            (shape, SegmentSource::FullShapeFallback)
        };

        let distance_meters = polyline_length(points);
        Some(SegmentExtractionResult {
            polyline: Polyline::new(points.to_vec()),
            distance_meters,
            duration_seconds: estimate_duration(distance_meters, self.config.bus_speed_mps),
            source,
        })
    }

    /// Extract from `shape` if there is one, else ask `engine`, else draw a
    /// straight line. Never fails.
    pub async fn extract_or_fallback(
        &self,
        shape: Option<&[GeoPoint]>,
        from: GeoPoint,
        to: GeoPoint,
        mode: LegMode,
        engine: Option<&dyn RouteProvider>,
    ) -> SegmentExtractionResult {
        if let Some(result) = shape.and_then(|s| self.extract(s, from, to)) {
            return result;
        }

        if let Some(engine) = engine {
            let timeout = Duration::from_millis(self.config.engine_timeout_ms);
            match query_with_timeout(engine, from, to, timeout).await {
                Ok(route) => {
                    let duration_seconds = if route.duration_seconds > 0 {
                        route.duration_seconds
                    } else {
                        estimate_duration(route.distance_meters, self.speed_for(mode))
                    };
                    return SegmentExtractionResult {
                        polyline: route.geometry,
                        distance_meters: route.distance_meters,
                        duration_seconds,
                        source: SegmentSource::EngineFallback,
                    };
                }
                Err(e) => warn!(
                    "[ShapeSegmentExtractor] Engine fallback via {} failed: {}",
                    engine.name(),
                    e
                ),
            }
        }

        let line = straight_line(from, to, self.speed_for(mode));
        SegmentExtractionResult {
            polyline: line.geometry,
            distance_meters: line.distance_meters,
            duration_seconds: line.duration_seconds,
            source: SegmentSource::StraightLineFallback,
        }
    }

    /// Bus leg between two stop codes on a shape.
    ///
    /// Unknown stops are an error (no coordinates to fall back on); a missing
    /// or broken shape falls back like [`extract_or_fallback`](Self::extract_or_fallback).
    pub async fn extract_between_stops(
        &self,
        store: &dyn ShapeStore,
        shape_id: &str,
        from_code: &str,
        to_code: &str,
        engine: Option<&dyn RouteProvider>,
    ) -> Result<SegmentExtractionResult, SegmentError> {
        let from = store.stop_coordinates(from_code)?;
        let to = store.stop_coordinates(to_code)?;

        let shape = match store.shape_points(shape_id) {
            Ok(points) => Some(points),
            Err(e) => {
                warn!("[ShapeSegmentExtractor] No shape for {}: {}", shape_id, e);
                None
            }
        };

        Ok(self
            .extract_or_fallback(shape.as_deref(), from, to, LegMode::Bus, engine)
            .await)
    }
}

/// Serves one transit shape as a [`RouteProvider`], so a line's geometry can
/// sit in a resolver chain ahead of the routing engine.
pub struct ShapeLegProvider {
    name: String,
    store: Arc<dyn ShapeStore>,
    shape_id: String,
    extractor: ShapeSegmentExtractor,
}

impl ShapeLegProvider {
    pub fn new(store: Arc<dyn ShapeStore>, shape_id: impl Into<String>, extractor: ShapeSegmentExtractor) -> Self {
        let shape_id = shape_id.into();
        Self {
            name: format!("shape:{}", shape_id),
            store,
            shape_id,
            extractor,
        }
    }
}

impl RouteProvider for ShapeLegProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_route(&self, origin: GeoPoint, dest: GeoPoint) -> ProviderFuture<'_> {
        let result = self
            .store
            .shape_points(&self.shape_id)
            .map_err(|_| ProviderError::NoRoute)
            .and_then(|shape| {
                self.extractor
                    .extract(&shape, origin, dest)
                    .ok_or(ProviderError::NoRoute)
            })
            .map(|segment| ProviderRoute {
                geometry: segment.polyline,
                distance_meters: segment.distance_meters,
                duration_seconds: segment.duration_seconds,
                source: segment.source.into(),
            });
        async move { result }.boxed()
    }
}
