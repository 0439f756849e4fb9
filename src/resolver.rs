//! # Route Resolver
//!
//! Cache-first route resolution. A miss walks the provider chain in order;
//! the first usable route is simplified, cached and returned.
//!
//! ```text
//! Pending → CacheLookup → Hit → Done
//!                       ↘ Miss → ProviderQuery → Simplify → Store → Done
//! ```
//!
//! Failures are never cached: a chain that fails entirely leaves the cache
//! unchanged, so the next request tries the providers again.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo_utils::meters_to_degrees;
use crate::provider::{query_with_timeout, ProviderRoute, RouteProvider};
use crate::simplify;
use crate::{GeoPoint, Polyline, RouteCache, RouteFingerprint, RoutePayload};

/// Resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Per-provider timeout. Default: 8000 ms
    pub provider_timeout_ms: u64,
    /// Douglas-Peucker tolerance in degrees. Default: 0.0001 (~11 m)
    pub simplify_tolerance: f64,
    /// TTL for resolved routes. `None` uses the cache default.
    pub ttl_secs: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 8_000,
            simplify_tolerance: 0.0001,
            ttl_secs: None,
        }
    }
}

impl ResolverConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Set the simplification tolerance to roughly `meters` at `latitude`.
    pub fn with_tolerance_meters(mut self, meters: f64, latitude: f64) -> Self {
        self.simplify_tolerance = meters_to_degrees(meters, latitude);
        self
    }
}

/// Steps of a single resolution, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    Pending,
    CacheLookup,
    Hit,
    Miss,
    ProviderQuery,
    Simplify,
    Store,
    Done,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("invalid coordinates: ({lat}, {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },
    #[error("no provider could resolve the route ({attempts} tried)")]
    ProviderUnavailable { attempts: usize },
    #[error("itinerary planner {planner} is unavailable")]
    PlanUnavailable { planner: String },
    #[error("unknown itinerary option: {0}")]
    UnknownItinerary(String),
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub payload: Arc<RoutePayload>,
    pub cache_hit: bool,
    pub fingerprint: RouteFingerprint,
}

/// Resolves routes through a shared cache and a provider fallback chain.
pub struct RouteResolver {
    cache: Arc<RouteCache>,
    providers: Vec<Arc<dyn RouteProvider>>,
    config: ResolverConfig,
}

impl RouteResolver {
    pub fn new(
        cache: Arc<RouteCache>,
        providers: Vec<Arc<dyn RouteProvider>>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            cache,
            providers,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<RouteCache> {
        &self.cache
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn providers(&self) -> &[Arc<dyn RouteProvider>] {
        &self.providers
    }

    /// Resolve the route from `origin` to `dest`.
    pub async fn resolve(&self, origin: GeoPoint, dest: GeoPoint) -> Result<Resolution, ResolveError> {
        validate(&origin)?;
        validate(&dest)?;
        let key = RouteFingerprint::new(origin, dest);
        self.resolve_keyed(key, origin, dest, &self.providers).await
    }

    /// Resolve under an explicit key with an explicit provider chain.
    pub async fn resolve_keyed(
        &self,
        key: RouteFingerprint,
        origin: GeoPoint,
        dest: GeoPoint,
        providers: &[Arc<dyn RouteProvider>],
    ) -> Result<Resolution, ResolveError> {
        trace(key, ResolveState::Pending);

        trace(key, ResolveState::CacheLookup);
        if let Some(payload) = self.cache.get_key(&key) {
            trace(key, ResolveState::Hit);
            trace(key, ResolveState::Done);
            return Ok(Resolution {
                payload,
                cache_hit: true,
                fingerprint: key,
            });
        }
        trace(key, ResolveState::Miss);

        trace(key, ResolveState::ProviderQuery);
        let route = self
            .query_chain(providers, origin, dest)
            .await
            .ok_or(ResolveError::ProviderUnavailable {
                attempts: providers.len(),
            })?;

        let payload = self.store(key, route);
        trace(key, ResolveState::Done);
        Ok(Resolution {
            payload,
            cache_hit: false,
            fingerprint: key,
        })
    }

    /// Simplify and cache a route obtained outside the provider chain.
    pub fn store(&self, key: RouteFingerprint, route: ProviderRoute) -> Arc<RoutePayload> {
        trace(key, ResolveState::Simplify);
        let raw_len = route.geometry.len();
        let geometry = Polyline::new(simplify::compress(
            route.geometry.points(),
            self.config.simplify_tolerance,
        ));
        debug!(
            "[RouteResolver] {} simplified {} -> {} points",
            key,
            raw_len,
            geometry.len()
        );
        let payload = RoutePayload::new(
            geometry,
            route.distance_meters,
            route.duration_seconds,
            route.source,
        );

        trace(key, ResolveState::Store);
        let ttl = self
            .config
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.cache.config().default_ttl());
        self.cache.set_key(key, payload, ttl)
    }

    /// First usable route from `providers`, trying each once in order.
    async fn query_chain(
        &self,
        providers: &[Arc<dyn RouteProvider>],
        origin: GeoPoint,
        dest: GeoPoint,
    ) -> Option<ProviderRoute> {
        let timeout = self.config.provider_timeout();
        for provider in providers {
            match query_with_timeout(provider.as_ref(), origin, dest, timeout).await {
                Ok(route) => {
                    info!(
                        "[RouteResolver] {} answered with {} points ({})",
                        provider.name(),
                        route.geometry.len(),
                        route.source
                    );
                    return Some(route);
                }
                Err(e) => warn!("[RouteResolver] {} failed: {}", provider.name(), e),
            }
        }
        None
    }
}

fn validate(point: &GeoPoint) -> Result<(), ResolveError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(ResolveError::InvalidCoordinates {
            lat: point.lat,
            lon: point.lon,
        })
    }
}

fn trace(key: RouteFingerprint, state: ResolveState) {
    debug!("[RouteResolver] {} -> {:?}", key, state);
}
