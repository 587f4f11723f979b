//! OSRM-backed [`RouteProvider`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{LatLng, Polyline, RouteError, RouteProvider};
use reqwest::Client;

use super::osrm::RouteResponse;
use crate::http::{ClientBuildError, build_client, normalise_base_url};

/// Default user agent for OSRM requests.
pub const DEFAULT_USER_AGENT: &str = "dispatch-routing/0.1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const MICRODEGREES_PER_DEGREE: f64 = 1_000_000.0;

/// Configuration for [`OsrmRouteProvider`].
#[derive(Debug, Clone)]
pub struct OsrmRouteProviderConfig {
    /// Base URL for the OSRM service (e.g., `"http://localhost:5000"`).
    pub base_url: String,
    /// OSRM routing profile.
    pub profile: String,
    /// Request timeout duration.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for OsrmRouteProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_owned(),
            profile: "driving".to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl OsrmRouteProviderConfig {
    /// Create a new configuration with the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the routing profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Polyline lookups against OSRM's Route API.
///
/// Requests ask for the full overview geometry in GeoJSON so the response can
/// be converted to microdegree points without decoding an encoded polyline.
#[derive(Debug, Clone)]
pub struct OsrmRouteProvider {
    client: Client,
    base_url: String,
    config: OsrmRouteProviderConfig,
}

impl OsrmRouteProvider {
    /// Create a new provider with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client fails
    /// to build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientBuildError> {
        Self::with_config(OsrmRouteProviderConfig::new(base_url))
    }

    /// Create a new provider with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client fails
    /// to build.
    pub fn with_config(config: OsrmRouteProviderConfig) -> Result<Self, ClientBuildError> {
        let base_url = normalise_base_url(&config.base_url)?;
        let client = build_client(&config.user_agent, config.timeout, Some(config.timeout))?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Build the Route API URL: `{base}/route/v1/{profile}/{lng,lat;...}`.
    fn build_route_url(&self, points: &[LatLng]) -> String {
        let coords = points
            .iter()
            .map(|point| {
                format!(
                    "{},{}",
                    format_degrees(point.lng_e6),
                    format_degrees(point.lat_e6)
                )
            })
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson",
            self.base_url, self.config.profile, coords
        )
    }

    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &str) -> RouteError {
        if error.is_timeout() {
            return RouteError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.config.timeout.as_secs(),
            };
        }
        if let Some(status) = error.status() {
            return RouteError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        RouteError::Network {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

fn format_degrees(microdegrees: i32) -> String {
    format!("{:.6}", f64::from(microdegrees) / MICRODEGREES_PER_DEGREE)
}

fn to_microdegrees(degrees: f64, limit: f64) -> Option<i32> {
    if !degrees.is_finite() || degrees.abs() > limit {
        return None;
    }
    let scaled = (degrees * MICRODEGREES_PER_DEGREE).round();
    // Bounded by `limit`, so the cast cannot truncate.
    Some(scaled as i32)
}

/// Convert an OSRM response into a polyline of the best route.
fn convert_response(response: RouteResponse) -> Result<Polyline, RouteError> {
    if !response.is_ok() {
        return Err(RouteError::Service {
            code: response.code,
            message: response.message.unwrap_or_default(),
        });
    }
    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| RouteError::Parse {
            message: "OSRM response contains no routes".to_owned(),
        })?;
    route
        .geometry
        .coordinates
        .iter()
        .map(|pair| {
            let [lng, lat] = pair.as_slice() else {
                return Err(RouteError::Parse {
                    message: format!("expected [lon, lat], got {} values", pair.len()),
                });
            };
            match (to_microdegrees(*lat, 90.0), to_microdegrees(*lng, 180.0)) {
                (Some(lat_e6), Some(lng_e6)) => Ok(LatLng { lat_e6, lng_e6 }),
                _ => Err(RouteError::Parse {
                    message: format!("coordinate [{lng}, {lat}] is out of range"),
                }),
            }
        })
        .collect()
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn route_polyline(
        &self,
        points: &[LatLng],
        tags: &BTreeMap<String, String>,
    ) -> Result<Polyline, RouteError> {
        if points.len() < 2 {
            return Err(RouteError::InsufficientPoints {
                count: points.len(),
            });
        }
        let url = self.build_route_url(points);
        log::debug!("requesting route for {} points {tags:?}", points.len());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?
            .error_for_status()
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;
        let body: RouteResponse = response.json().await.map_err(|err| RouteError::Parse {
            message: err.to_string(),
        })?;
        convert_response(body)
    }
}
