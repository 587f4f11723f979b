//! Reference adapters for the dispatch engine's collaborator traits.
//!
//! Responsibilities:
//! - Resolve road polylines through an OSRM service ([`routing`]).
//! - Stream solutions from an HTTP optimizer speaking NDJSON ([`optimizer`]).
//! - Persist runs, schedules, region snapshots and probe sets in SQLite
//!   ([`store`]).
//! - Load region settings from a JSON file ([`settings`]).
//!
//! Boundaries:
//! - Do not encode dispatch rules; those live in `dispatch-core` and the
//!   orchestration crates.
//! - Keep blocking SQLite work off async executors via `spawn_blocking`.
//!
//! Invariants:
//! - Every adapter is `Send + Sync` and safe to share behind an `Arc`.
//! - No global mutable state.

#![forbid(unsafe_code)]

mod http;
pub mod optimizer;
pub mod routing;
pub mod settings;
pub mod store;

pub use http::ClientBuildError;
pub use optimizer::{HttpOptimizerClient, HttpOptimizerClientConfig};
pub use routing::{OsrmRouteProvider, OsrmRouteProviderConfig};
pub use settings::JsonSettingsService;
pub use store::{RegionSnapshot, RunSummary, SCHEMA_VERSION, SqliteLogisticsStore};
