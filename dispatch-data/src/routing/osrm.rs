//! OSRM API response types for the Route service.
//!
//! Only the fields the engine reads are modelled. Geometries are requested as
//! GeoJSON so coordinates arrive as plain `[lon, lat]` arrays.
//!
//! See: <http://project-osrm.org/docs/v5.24.0/api/#route-service>

use serde::Deserialize;

/// OSRM Route API response.
#[derive(Debug, Deserialize)]
pub struct RouteResponse {
    /// Status code from OSRM; `"Ok"` on success, e.g. `"NoRoute"` otherwise.
    pub code: String,

    /// Optional error message when `code` is not `"Ok"`.
    pub message: Option<String>,

    /// Alternative routes, best first.
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl RouteResponse {
    /// Check if the response indicates success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == "Ok"
    }
}

/// One route through the requested waypoints.
#[derive(Debug, Deserialize)]
pub struct Route {
    /// Route geometry.
    pub geometry: Geometry,
}

/// GeoJSON `LineString` geometry.
#[derive(Debug, Deserialize)]
pub struct Geometry {
    /// Coordinates as `[lon, lat]` arrays. Other lengths are rejected by the
    /// provider rather than during deserialisation.
    pub coordinates: Vec<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialise_route_with_geometry() {
        let json = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[-104.99, 39.74], [-104.98, 39.75]]
                },
                "duration": 90.2,
                "distance": 1204.0
            }],
            "waypoints": []
        }"#;

        let response: RouteResponse = serde_json::from_str(json).expect("should deserialise");

        assert!(response.is_ok());
        let route = response.routes.first().expect("one route");
        assert_eq!(route.geometry.coordinates.len(), 2);
    }

    #[test]
    fn deserialise_error_without_routes() {
        let json = r#"{"code": "NoRoute", "message": "Impossible route between points"}"#;

        let response: RouteResponse = serde_json::from_str(json).expect("should deserialise");

        assert!(!response.is_ok());
        assert!(response.routes.is_empty());
        assert_eq!(
            response.message.as_deref(),
            Some("Impossible route between points")
        );
    }
}
