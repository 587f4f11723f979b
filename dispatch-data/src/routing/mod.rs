//! Road polylines from an OSRM routing service.
//!
//! [`OsrmRouteProvider`] implements [`dispatch_core::RouteProvider`] on top of
//! OSRM's Route API. The solve pipeline uses it to attach a driving path to
//! each shift team route it persists.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use dispatch_core::{LatLng, RouteProvider};
//! use dispatch_data::routing::{OsrmRouteProvider, OsrmRouteProviderConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OsrmRouteProviderConfig::new("http://localhost:5000")
//!     .with_timeout(Duration::from_secs(10));
//! let provider = OsrmRouteProvider::with_config(config)?;
//! let points = [
//!     LatLng { lat_e6: 39_739_236, lng_e6: -104_990_251 },
//!     LatLng { lat_e6: 39_750_000, lng_e6: -104_980_000 },
//! ];
//! let polyline = provider.route_polyline(&points, &BTreeMap::new()).await?;
//! println!("{} points", polyline.len());
//! # Ok(())
//! # }
//! ```

mod osrm;
mod provider;

pub use osrm::{Geometry, Route, RouteResponse};
pub use provider::{DEFAULT_USER_AGENT, OsrmRouteProvider, OsrmRouteProviderConfig};
