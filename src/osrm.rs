//! OSRM routing engine provider.
//!
//! Calls the `route` service with full GeoJSON geometry:
//! `{base_url}/route/v1/{profile}/{lon},{lat};{lon},{lat}?overview=full&geometries=geojson`
//!
//! No retries here. The resolver applies its own timeout and moves on to the
//! next provider when this one fails.

use std::time::Duration;

use futures::FutureExt;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::provider::{ProviderError, ProviderFuture, ProviderRoute, RouteProvider};
use crate::{GeoPoint, Polyline, RouteSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    /// OSRM profile, e.g. `foot` or `car`
    pub profile: String,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "foot".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Routing engine provider backed by an OSRM server.
#[derive(Debug, Clone)]
pub struct OsrmProvider {
    config: OsrmConfig,
    client: Client,
    name: String,
}

impl OsrmProvider {
    pub fn new(config: OsrmConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        let name = format!("osrm:{}", config.profile);

        Ok(Self { config, client, name })
    }

    pub fn config(&self) -> &OsrmConfig {
        &self.config
    }

    fn route_url(&self, origin: GeoPoint, dest: GeoPoint) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            origin.lon,
            origin.lat,
            dest.lon,
            dest.lat
        )
    }

    async fn fetch(&self, origin: GeoPoint, dest: GeoPoint) -> Result<ProviderRoute, ProviderError> {
        let url = self.route_url(origin, dest);
        debug!("[OsrmProvider] GET {}", url);

        let response = self.client.get(&url).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        // OSRM reports "NoRoute" with a 400, so read the body before the status
        match parse_route_response(&body) {
            Err(ProviderError::Parse(_)) if !status.is_success() => {
                Err(ProviderError::Transport(format!("HTTP {}", status)))
            }
            result => result,
        }
    }
}

impl RouteProvider for OsrmProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_route(&self, origin: GeoPoint, dest: GeoPoint) -> ProviderFuture<'_> {
        self.fetch(origin, dest).boxed()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(Duration::ZERO)
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Decode an OSRM `route` response body into the first route.
fn parse_route_response(body: &[u8]) -> Result<ProviderRoute, ProviderError> {
    let response: OsrmRouteResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    match response.code.as_str() {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(ProviderError::NoRoute),
        other => {
            return Err(ProviderError::Transport(format!(
                "{}: {}",
                other,
                response.message.unwrap_or_default()
            )))
        }
    }

    let route = response.routes.into_iter().next().ok_or(ProviderError::NoRoute)?;
    Ok(ProviderRoute {
        geometry: Polyline::from_lon_lat(&route.geometry.coordinates),
        distance_meters: route.distance,
        duration_seconds: route.duration.max(0.0).round() as u32,
        source: RouteSource::Engine,
    })
}
