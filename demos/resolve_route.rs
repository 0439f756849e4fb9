//! Resolve a route twice through the cache, then cut a bus leg from a shape.
//!
//! Run with: cargo run --example resolve_route

use std::sync::Arc;

use futures::FutureExt;
use route_geometry::provider::ProviderFuture;
use route_geometry::{
    CacheConfig, GeoPoint, Polyline, ProviderRoute, ResolverConfig, RouteCache, RouteProvider,
    RouteResolver, RouteSource, ShapeSegmentExtractor, StraightLineProvider, SystemClock,
};

/// Stands in for a routing engine: a dense, slightly curved path.
struct DenseCurveProvider;

impl RouteProvider for DenseCurveProvider {
    fn name(&self) -> &str {
        "dense-curve"
    }

    fn get_route(&self, origin: GeoPoint, dest: GeoPoint) -> ProviderFuture<'_> {
        let points: Vec<GeoPoint> = (0..200)
            .map(|i| {
                let t = i as f64 / 199.0;
                let bend = (t * std::f64::consts::PI).sin() * 0.003;
                GeoPoint::new(
                    origin.lat + (dest.lat - origin.lat) * t + bend,
                    origin.lon + (dest.lon - origin.lon) * t,
                )
            })
            .collect();
        let geometry = Polyline::new(points);
        let distance_meters = geometry.length_meters();
        let route = ProviderRoute {
            geometry,
            distance_meters,
            duration_seconds: (distance_meters / 1.2) as u32,
            source: RouteSource::Engine,
        };
        async move { Ok(route) }.boxed()
    }
}

#[tokio::main]
async fn main() {
    let cache = Arc::new(RouteCache::new(CacheConfig::default(), Arc::new(SystemClock)));
    let providers: Vec<Arc<dyn RouteProvider>> = vec![
        Arc::new(DenseCurveProvider),
        Arc::new(StraightLineProvider::default()),
    ];
    let resolver = RouteResolver::new(cache.clone(), providers, ResolverConfig::default());

    // Plaza de Armas to Estacion Central, Santiago
    let origin = GeoPoint::new(-33.4372, -70.6506);
    let dest = GeoPoint::new(-33.4489, -70.6693);

    println!("Route Resolution\n");
    for attempt in 1..=2 {
        match resolver.resolve(origin, dest).await {
            Ok(resolution) => println!(
                "{}. key {} | cache hit: {} | {} points | {:.0} m | {} s | source {}",
                attempt,
                resolution.fingerprint,
                resolution.cache_hit,
                resolution.payload.geometry.len(),
                resolution.payload.distance_meters,
                resolution.payload.duration_seconds,
                resolution.payload.source,
            ),
            Err(e) => println!("{}. failed: {}", attempt, e),
        }
    }

    match serde_json::to_string_pretty(&cache.metrics()) {
        Ok(json) => println!("\nMetrics:\n{}\n", json),
        Err(e) => println!("\nMetrics unavailable: {}\n", e),
    }

    println!("Segment Extraction\n");
    let shape: Vec<GeoPoint> = (0..4).map(|i| GeoPoint::new(0.0, i as f64)).collect();
    let extractor = ShapeSegmentExtractor::default();
    for (from, to) in [
        (GeoPoint::new(0.0, 0.1), GeoPoint::new(0.0, 2.1)),
        (GeoPoint::new(0.0, 2.1), GeoPoint::new(0.0, 0.1)),
    ] {
        if let Some(leg) = extractor.extract(&shape, from, to) {
            println!(
                "({}, {}) -> ({}, {}): {} points, {:?}",
                from.lat, from.lon, to.lat, to.lon,
                leg.polyline.len(),
                leg.source
            );
        }
    }
}
