//! # Two-Phase Itineraries
//!
//! Transit planners answer quickly with itinerary options but geometry for
//! every leg is slow to fetch and expensive to ship to a phone. So planning
//! is split:
//!
//! 1. [`ItineraryPlanner::plan_summaries`] returns summaries (duration,
//!    transfers, lines) with no geometry
//! 2. [`ItineraryPlanner::resolve_itinerary`] resolves geometry for the one
//!    option the rider picked
//!
//! Walk legs go through the provider chain, degrading to a straight line.
//! Bus legs are cut from the line's shape via [`ShapeSegmentExtractor`].
//! Both are simplified and cached under scoped fingerprints so a walk and a
//! bus ride between the same points never share an entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::provider::{ProviderError, ProviderRoute, RouteProvider, StraightLineProvider};
use crate::resolver::{ResolveError, RouteResolver};
use crate::segment::{LegMode, SegmentExtractionResult, ShapeSegmentExtractor, ShapeStore};
use crate::{GeoPoint, Polyline, RouteFingerprint, RoutePayload, RouteSource};

/// Planned options kept for phase 2. Older plans are dropped past this.
const MAX_PLANNED_OPTIONS: usize = 512;

/// Legs shorter than this are transfers on the spot and get no routing.
const MIN_LEG_METERS: f64 = 1.0;

/// One leg of a planned itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryLeg {
    pub mode: LegMode,
    pub from: GeoPoint,
    pub to: GeoPoint,
    /// Boarding stop code (bus legs)
    #[serde(default)]
    pub from_stop: Option<String>,
    /// Alighting stop code (bus legs)
    #[serde(default)]
    pub to_stop: Option<String>,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub shape_id: Option<String>,
    pub duration_seconds: u32,
}

impl ItineraryLeg {
    pub fn walk(from: GeoPoint, to: GeoPoint, duration_seconds: u32) -> Self {
        Self {
            mode: LegMode::Walk,
            from,
            to,
            from_stop: None,
            to_stop: None,
            route_id: None,
            shape_id: None,
            duration_seconds,
        }
    }

    pub fn bus(
        route_id: impl Into<String>,
        shape_id: impl Into<String>,
        from: GeoPoint,
        to: GeoPoint,
        duration_seconds: u32,
    ) -> Self {
        Self {
            mode: LegMode::Bus,
            from,
            to,
            from_stop: None,
            to_stop: None,
            route_id: Some(route_id.into()),
            shape_id: Some(shape_id.into()),
            duration_seconds,
        }
    }

    /// Attach boarding and alighting stop codes.
    pub fn with_stops(mut self, from_stop: impl Into<String>, to_stop: impl Into<String>) -> Self {
        self.from_stop = Some(from_stop.into());
        self.to_stop = Some(to_stop.into());
        self
    }

    /// Cache key for this leg's geometry.
    pub fn fingerprint(&self) -> RouteFingerprint {
        match (self.mode, &self.shape_id) {
            (LegMode::Walk, _) => RouteFingerprint::scoped("walk", self.from, self.to),
            (LegMode::Bus, Some(shape_id)) => {
                RouteFingerprint::scoped(&format!("bus:{}", shape_id), self.from, self.to)
            }
            (LegMode::Bus, None) => RouteFingerprint::scoped("bus", self.from, self.to),
        }
    }
}

/// An option as returned by a planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryOption {
    pub id: String,
    pub legs: Vec<ItineraryLeg>,
    pub duration_seconds: u32,
}

impl ItineraryOption {
    pub fn summary(&self) -> ItinerarySummary {
        let route_ids: Vec<String> = self
            .legs
            .iter()
            .filter(|leg| leg.mode == LegMode::Bus)
            .filter_map(|leg| leg.route_id.clone())
            .collect();
        let rides = self.legs.iter().filter(|leg| leg.mode == LegMode::Bus).count();
        ItinerarySummary {
            option_id: self.id.clone(),
            duration_seconds: self.duration_seconds,
            transfers: rides.saturating_sub(1),
            route_ids,
        }
    }
}

/// Phase 1 result: enough to choose an option, no geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItinerarySummary {
    pub option_id: String,
    pub duration_seconds: u32,
    pub transfers: usize,
    pub route_ids: Vec<String>,
}

/// Geometry of one resolved leg.
#[derive(Debug, Clone)]
pub struct LegGeometry {
    pub mode: LegMode,
    pub route_id: Option<String>,
    pub payload: Arc<RoutePayload>,
    pub cache_hit: bool,
}

/// Phase 2 result.
#[derive(Debug, Clone)]
pub struct ResolvedItinerary {
    pub option_id: String,
    pub legs: Vec<LegGeometry>,
    pub distance_meters: f64,
    pub duration_seconds: u32,
}

impl ResolvedItinerary {
    /// True if any leg had to fall back to approximate geometry.
    pub fn is_degraded(&self) -> bool {
        self.legs.iter().any(|leg| leg.payload.source.is_degraded())
    }
}

/// A trip planner that proposes itineraries.
pub trait ItinerarySource: Send + Sync {
    fn name(&self) -> &str;

    fn plan(
        &self,
        origin: GeoPoint,
        dest: GeoPoint,
    ) -> BoxFuture<'_, Result<Vec<ItineraryOption>, ProviderError>>;
}

/// Runs both phases against one resolver and its cache.
pub struct ItineraryPlanner {
    resolver: Arc<RouteResolver>,
    source: Arc<dyn ItinerarySource>,
    shapes: Arc<dyn ShapeStore>,
    extractor: ShapeSegmentExtractor,
    engine: Option<Arc<dyn RouteProvider>>,
    planned: Mutex<HashMap<String, ItineraryOption>>,
}

impl ItineraryPlanner {
    pub fn new(
        resolver: Arc<RouteResolver>,
        source: Arc<dyn ItinerarySource>,
        shapes: Arc<dyn ShapeStore>,
        extractor: ShapeSegmentExtractor,
    ) -> Self {
        Self {
            resolver,
            source,
            shapes,
            extractor,
            engine: None,
            planned: Mutex::new(HashMap::new()),
        }
    }

    /// Routing engine used when a bus leg has no usable shape.
    pub fn with_engine(mut self, engine: Arc<dyn RouteProvider>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Phase 1: plan and summarize. Options are remembered for
    /// [`resolve_itinerary`](Self::resolve_itinerary).
    pub async fn plan_summaries(
        &self,
        origin: GeoPoint,
        dest: GeoPoint,
    ) -> Result<Vec<ItinerarySummary>, ResolveError> {
        for point in [origin, dest] {
            if !point.is_valid() {
                return Err(ResolveError::InvalidCoordinates {
                    lat: point.lat,
                    lon: point.lon,
                });
            }
        }

        let options = self
            .source
            .plan(origin, dest)
            .await
            .map_err(|e| {
                warn!("[ItineraryPlanner] {} failed to plan: {}", self.source.name(), e);
                ResolveError::PlanUnavailable {
                    planner: self.source.name().to_string(),
                }
            })?;
        info!(
            "[ItineraryPlanner] {} proposed {} options",
            self.source.name(),
            options.len()
        );

        let summaries = options.iter().map(ItineraryOption::summary).collect();

        let mut planned = self.planned.lock().unwrap_or_else(PoisonError::into_inner);
        if planned.len() + options.len() > MAX_PLANNED_OPTIONS {
            debug!("[ItineraryPlanner] Dropping {} stale planned options", planned.len());
            planned.clear();
        }
        for option in options {
            planned.insert(option.id.clone(), option);
        }

        Ok(summaries)
    }

    /// Phase 2: resolve geometry for a previously planned option.
    pub async fn resolve_itinerary(&self, option_id: &str) -> Result<ResolvedItinerary, ResolveError> {
        let option = self
            .planned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(option_id)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownItinerary(option_id.to_string()))?;
        self.resolve_option(&option).await
    }

    /// Phase 2 for an option the caller already holds.
    pub async fn resolve_option(&self, option: &ItineraryOption) -> Result<ResolvedItinerary, ResolveError> {
        let mut legs = Vec::with_capacity(option.legs.len());
        for leg in &option.legs {
            let geometry = match leg.mode {
                LegMode::Walk => self.resolve_walk(leg).await?,
                LegMode::Bus => self.resolve_bus(leg).await?,
            };
            legs.push(geometry);
        }

        let distance_meters = legs.iter().map(|l| l.payload.distance_meters).sum();
        let hits = legs.iter().filter(|l| l.cache_hit).count();
        debug!(
            "[ItineraryPlanner] Resolved {} ({} legs, {} cached)",
            option.id,
            legs.len(),
            hits
        );

        Ok(ResolvedItinerary {
            option_id: option.id.clone(),
            legs,
            distance_meters,
            duration_seconds: option.duration_seconds,
        })
    }

    async fn resolve_walk(&self, leg: &ItineraryLeg) -> Result<LegGeometry, ResolveError> {
        if haversine_distance(&leg.from, &leg.to) < MIN_LEG_METERS {
            return Ok(in_place(leg));
        }

        let mut chain: Vec<Arc<dyn RouteProvider>> = self.resolver.providers().to_vec();
        chain.push(Arc::new(StraightLineProvider::new(
            self.extractor.speed_for(LegMode::Walk),
        )));

        let resolution = self
            .resolver
            .resolve_keyed(leg.fingerprint(), leg.from, leg.to, &chain)
            .await?;
        Ok(LegGeometry {
            mode: LegMode::Walk,
            route_id: None,
            payload: resolution.payload,
            cache_hit: resolution.cache_hit,
        })
    }

    async fn resolve_bus(&self, leg: &ItineraryLeg) -> Result<LegGeometry, ResolveError> {
        if haversine_distance(&leg.from, &leg.to) < MIN_LEG_METERS {
            return Ok(in_place(leg));
        }

        let key = leg.fingerprint();
        if let Some(payload) = self.resolver.cache().get_key(&key) {
            return Ok(LegGeometry {
                mode: LegMode::Bus,
                route_id: leg.route_id.clone(),
                payload,
                cache_hit: true,
            });
        }

        let engine = self.engine.as_deref();
        let segment = match (&leg.shape_id, &leg.from_stop, &leg.to_stop) {
            (Some(shape_id), Some(from_code), Some(to_code)) => {
                match self
                    .extractor
                    .extract_between_stops(self.shapes.as_ref(), shape_id, from_code, to_code, engine)
                    .await
                {
                    Ok(segment) => segment,
                    Err(e) => {
                        warn!(
                            "[ItineraryPlanner] {} -> {} on {}: {}, using leg coordinates",
                            from_code, to_code, shape_id, e
                        );
                        self.extract_by_coordinates(leg, Some(shape_id.as_str()), engine).await
                    }
                }
            }
            (shape_id, _, _) => {
                self.extract_by_coordinates(leg, shape_id.as_deref(), engine)
                    .await
            }
        };

        let route = match into_route(segment).validate() {
            Ok(route) => route,
            Err(e) => {
                debug!("[ItineraryPlanner] Not caching bus leg {}: {}", key, e);
                return Ok(in_place(leg));
            }
        };

        let payload = self.resolver.store(key, route);
        Ok(LegGeometry {
            mode: LegMode::Bus,
            route_id: leg.route_id.clone(),
            payload,
            cache_hit: false,
        })
    }

    async fn extract_by_coordinates(
        &self,
        leg: &ItineraryLeg,
        shape_id: Option<&str>,
        engine: Option<&dyn RouteProvider>,
    ) -> SegmentExtractionResult {
        let shape = shape_id.and_then(|id| self.shapes.shape_points(id).ok());
        self.extractor
            .extract_or_fallback(shape.as_deref(), leg.from, leg.to, LegMode::Bus, engine)
            .await
    }
}

fn into_route(segment: SegmentExtractionResult) -> ProviderRoute {
    ProviderRoute {
        geometry: segment.polyline,
        distance_meters: segment.distance_meters,
        duration_seconds: segment.duration_seconds,
        source: segment.source.into(),
    }
}

fn in_place(leg: &ItineraryLeg) -> LegGeometry {
    LegGeometry {
        mode: leg.mode,
        route_id: leg.route_id.clone(),
        payload: Arc::new(RoutePayload::new(
            Polyline::new(vec![leg.from, leg.to]),
            0.0,
            0,
            RouteSource::StraightLine,
        )),
        cache_hit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{street_route, Script, ScriptedProvider};
    use crate::resolver::ResolverConfig;
    use crate::segment::InMemoryShapeStore;
    use crate::{CacheConfig, ManualClock, RouteCache};
    use futures::FutureExt;

    struct FixedPlanner {
        result: Result<Vec<ItineraryOption>, ProviderError>,
    }

    impl ItinerarySource for FixedPlanner {
        fn name(&self) -> &str {
            "fixed"
        }

        fn plan(
            &self,
            _origin: GeoPoint,
            _dest: GeoPoint,
        ) -> BoxFuture<'_, Result<Vec<ItineraryOption>, ProviderError>> {
            let result = self.result.clone();
            async move { result }.boxed()
        }
    }

    fn home() -> GeoPoint {
        GeoPoint::new(-33.4372, -70.6506)
    }

    fn stop_a() -> GeoPoint {
        GeoPoint::new(-33.4400, -70.6520)
    }

    fn stop_b() -> GeoPoint {
        GeoPoint::new(-33.4500, -70.6520)
    }

    fn work() -> GeoPoint {
        GeoPoint::new(-33.4510, -70.6560)
    }

    /// Bus line running south along one meridian.
    fn shapes() -> InMemoryShapeStore {
        let shape = (0..30)
            .map(|i| GeoPoint::new(-33.4380 - i as f64 * 0.0005, -70.6520))
            .collect();
        InMemoryShapeStore::new()
            .with_shape("506-I", shape)
            .with_stop("PA1", stop_a())
            .with_stop("PA9", stop_b())
    }

    fn option() -> ItineraryOption {
        ItineraryOption {
            id: "opt-1".to_string(),
            legs: vec![
                ItineraryLeg::walk(home(), stop_a(), 300),
                ItineraryLeg::bus("506", "506-I", stop_a(), stop_b(), 600).with_stops("PA1", "PA9"),
                ItineraryLeg::walk(stop_b(), work(), 240),
            ],
            duration_seconds: 1_200,
        }
    }

    fn planner_with(
        walk_engine: Script,
        plan: Result<Vec<ItineraryOption>, ProviderError>,
    ) -> (ItineraryPlanner, Arc<ScriptedProvider>) {
        let cache = Arc::new(RouteCache::new(
            CacheConfig::default(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        ));
        let engine = Arc::new(ScriptedProvider::new("engine", walk_engine));
        let resolver = Arc::new(RouteResolver::new(cache, vec![engine.clone()], ResolverConfig::default()));
        let planner = ItineraryPlanner::new(
            resolver,
            Arc::new(FixedPlanner { result: plan }),
            Arc::new(shapes()),
            ShapeSegmentExtractor::default(),
        );
        (planner, engine)
    }

    #[test]
    fn test_summary_counts_transfers() {
        let mut opt = option();
        assert_eq!(
            opt.summary(),
            ItinerarySummary {
                option_id: "opt-1".to_string(),
                duration_seconds: 1_200,
                transfers: 0,
                route_ids: vec!["506".to_string()],
            }
        );

        opt.legs.push(ItineraryLeg::bus("D09", "D09-R", stop_b(), work(), 120));
        let summary = opt.summary();
        assert_eq!(summary.transfers, 1);
        assert_eq!(summary.route_ids, vec!["506".to_string(), "D09".to_string()]);
    }

    #[test]
    fn test_leg_keys_are_scoped_by_mode_and_shape() {
        let walk = ItineraryLeg::walk(stop_a(), stop_b(), 0);
        let bus = ItineraryLeg::bus("506", "506-I", stop_a(), stop_b(), 0);
        let other_bus = ItineraryLeg::bus("507", "507-I", stop_a(), stop_b(), 0);

        assert_ne!(walk.fingerprint(), bus.fingerprint());
        assert_ne!(bus.fingerprint(), other_bus.fingerprint());
        assert_ne!(walk.fingerprint(), RouteFingerprint::new(stop_a(), stop_b()));
    }

    #[tokio::test]
    async fn test_plan_summaries_has_no_geometry_work() {
        let (planner, engine) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![option()]));
        let summaries = planner.plan_summaries(home(), work()).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].option_id, "opt-1");
        assert_eq!(engine.calls(), 0);
        assert!(planner.resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_plan_failure_surfaces() {
        let (planner, _) = planner_with(
            Script::Fail(ProviderError::NoRoute),
            Err(ProviderError::Transport("planner down".into())),
        );
        let err = planner.plan_summaries(home(), work()).await.unwrap_err();
        assert_eq!(
            err,
            ResolveError::PlanUnavailable {
                planner: "fixed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_itinerary_builds_every_leg() {
        let walk_route = street_route(home(), stop_a(), 8, RouteSource::Engine);
        let (planner, _) = planner_with(Script::Route(walk_route), Ok(vec![option()]));
        planner.plan_summaries(home(), work()).await.unwrap();

        let resolved = planner.resolve_itinerary("opt-1").await.unwrap();
        assert_eq!(resolved.legs.len(), 3);
        assert_eq!(resolved.legs[0].payload.source, RouteSource::Engine);
        assert_eq!(resolved.legs[1].payload.source, RouteSource::Shape);
        assert_eq!(resolved.legs[1].route_id.as_deref(), Some("506"));
        assert_eq!(resolved.duration_seconds, 1_200);
        assert!(resolved.distance_meters > 0.0);
        assert!(resolved.legs.iter().all(|l| !l.cache_hit));
    }

    #[tokio::test]
    async fn test_second_resolution_is_fully_cached() {
        let walk_route = street_route(home(), stop_a(), 8, RouteSource::Engine);
        let (planner, engine) = planner_with(Script::Route(walk_route), Ok(vec![option()]));
        planner.plan_summaries(home(), work()).await.unwrap();

        planner.resolve_itinerary("opt-1").await.unwrap();
        let calls = engine.calls();
        let again = planner.resolve_itinerary("opt-1").await.unwrap();

        assert!(again.legs.iter().all(|l| l.cache_hit));
        assert_eq!(engine.calls(), calls);
    }

    #[tokio::test]
    async fn test_walk_degrades_to_straight_line() {
        let (planner, _) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![option()]));
        let resolved = planner.resolve_option(&option()).await.unwrap();

        assert_eq!(resolved.legs[0].payload.source, RouteSource::StraightLine);
        assert_eq!(resolved.legs[0].payload.geometry.len(), 2);
        assert!(resolved.is_degraded());
    }

    #[tokio::test]
    async fn test_bus_leg_without_stop_codes_uses_coordinates() {
        let (planner, _) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![]));
        let leg = ItineraryLeg::bus("506", "506-I", stop_b(), stop_a(), 600);
        let option = ItineraryOption {
            id: "reverse".to_string(),
            legs: vec![leg],
            duration_seconds: 600,
        };

        let resolved = planner.resolve_option(&option).await.unwrap();
        // boarding south of alighting on a southbound line
        assert_eq!(resolved.legs[0].payload.source, RouteSource::FullShape);
    }

    #[tokio::test]
    async fn test_unknown_stop_falls_back_to_leg_coordinates() {
        let walk_route = street_route(home(), stop_a(), 8, RouteSource::Engine);
        let (planner, _) = planner_with(Script::Route(walk_route), Ok(vec![]));
        let option = ItineraryOption {
            id: "typo".to_string(),
            legs: vec![
                ItineraryLeg::walk(home(), stop_a(), 300),
                ItineraryLeg::bus("506", "506-I", stop_a(), stop_b(), 600).with_stops("PA1", "XX"),
            ],
            duration_seconds: 900,
        };

        let resolved = planner.resolve_option(&option).await.unwrap();
        assert_eq!(resolved.legs.len(), 2);
        assert_eq!(resolved.legs[0].payload.source, RouteSource::Engine);
        // the shape is still cut using the leg's own coordinates
        assert_eq!(resolved.legs[1].payload.source, RouteSource::Shape);
        assert!(resolved.legs[1].payload.geometry.len() >= 2);
    }

    #[tokio::test]
    async fn test_unknown_stop_and_shape_degrade_to_straight_line() {
        let (planner, _) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![]));
        let leg = ItineraryLeg::bus("506", "missing", stop_a(), stop_b(), 600).with_stops("XX", "YY");
        let option = ItineraryOption {
            id: "lost".to_string(),
            legs: vec![leg],
            duration_seconds: 600,
        };

        let resolved = planner.resolve_option(&option).await.unwrap();
        assert_eq!(resolved.legs[0].payload.source, RouteSource::StraightLine);
        assert_eq!(resolved.legs[0].payload.geometry.points(), &[stop_a(), stop_b()]);
    }

    #[tokio::test]
    async fn test_zero_length_bus_leg_is_not_cached() {
        let (planner, _) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![]));
        let leg = ItineraryLeg::bus("506", "missing", stop_a(), stop_a(), 0);
        let option = ItineraryOption {
            id: "stay".to_string(),
            legs: vec![leg.clone()],
            duration_seconds: 0,
        };

        let resolved = planner.resolve_option(&option).await.unwrap();
        assert_eq!(resolved.legs[0].payload.distance_meters, 0.0);
        assert!(!resolved.legs[0].cache_hit);
        assert_eq!(resolved.legs[0].route_id.as_deref(), Some("506"));
        assert!(planner.resolver.cache().is_empty());
        assert!(planner.resolver.cache().get_key(&leg.fingerprint()).is_none());
    }

    #[tokio::test]
    async fn test_unknown_option_id() {
        let (planner, _) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![]));
        let err = planner.resolve_itinerary("nope").await.unwrap_err();
        assert_eq!(err, ResolveError::UnknownItinerary("nope".to_string()));
    }

    #[tokio::test]
    async fn test_transfer_in_place_needs_no_routing() {
        let (planner, engine) = planner_with(Script::Fail(ProviderError::NoRoute), Ok(vec![]));
        let option = ItineraryOption {
            id: "transfer".to_string(),
            legs: vec![ItineraryLeg::walk(stop_b(), stop_b(), 0)],
            duration_seconds: 0,
        };
        let resolved = planner.resolve_option(&option).await.unwrap();
        assert_eq!(resolved.legs[0].payload.distance_meters, 0.0);
        assert_eq!(engine.calls(), 0);
    }
}
