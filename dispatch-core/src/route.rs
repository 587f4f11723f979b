use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vrp::Location;

/// A coordinate in integer microdegrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in microdegrees.
    pub lat_e6: i32,
    /// Longitude in microdegrees.
    pub lng_e6: i32,
}

impl From<&Location> for LatLng {
    fn from(location: &Location) -> Self {
        Self {
            lat_e6: location.latitude_e6,
            lng_e6: location.longitude_e6,
        }
    }
}

/// A road-network path through a sequence of points.
pub type Polyline = Vec<LatLng>;

/// Errors returned by a [`RouteProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Fewer than two points were supplied.
    #[error("route requires at least two points, got {count}")]
    InsufficientPoints {
        /// Number of points supplied.
        count: usize,
    },
    /// Request timed out.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// URL of the request.
        url: String,
        /// Configured timeout.
        timeout_secs: u64,
    },
    /// Service returned a non-success HTTP status.
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        /// URL of the request.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Error detail.
        message: String,
    },
    /// Network failure before a response arrived.
    #[error("network error for {url}: {message}")]
    Network {
        /// URL of the request.
        url: String,
        /// Error detail.
        message: String,
    },
    /// Response body could not be decoded.
    #[error("failed to parse route response: {message}")]
    Parse {
        /// Error detail.
        message: String,
    },
    /// Service answered with an error code.
    #[error("routing service error {code}: {message}")]
    Service {
        /// Service status code.
        code: String,
        /// Service message.
        message: String,
    },
}

/// Road-network polyline lookups.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Return the driving path through `points` in order.
    ///
    /// `tags` are forwarded for monitoring.
    async fn route_polyline(
        &self,
        points: &[LatLng],
        tags: &BTreeMap<String, String>,
    ) -> Result<Polyline, RouteError>;
}
