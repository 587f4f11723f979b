//! Continuous scheduling for the dispatch engine.
//!
//! [`Runner`] polls region settings, expands them into one run instance per
//! region and service date, and keeps a task alive per instance. Schedule
//! instances re-optimize a region whenever new data arrives or the current
//! schedule goes stale; availability instances probe how much capacity is
//! left by injecting synthetic visits into the same problem.
//!
//! Instances stop on their own once a settings poll no longer produces their
//! key. The whole runner stops through its
//! [`CancellationToken`](tokio_util::sync::CancellationToken).

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod availability;
mod constraints;
mod instances;
mod metrics;
mod runner;
mod schedule;
mod staleness;

use dispatch_availability::AvailabilityError;
use dispatch_core::{SettingsError, StoreError};
use dispatch_solver::SolveError;
use thiserror::Error;

pub use availability::{ResolveAvailabilityVisitsParams, ResolvedAvailabilityVisits};
pub use constraints::{
    ConstraintConfig, DEFAULT_HARD_LATENESS_THRESHOLD_MS, VisitLatenessToleranceOverridesParams,
};
pub use instances::{AvailabilityConfigs, InstanceMaps, ScheduleConfigs, new_instance_keys};
pub use metrics::{METRICS_TARGET, RunMetrics, RunResult, SolutionMetrics};
pub use runner::{DEFAULT_SETTINGS_POLL_INTERVAL, Runner};
pub use staleness::StalenessChecker;

/// Errors raised while discovering instances or running one.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The logistics store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The solve pipeline failed to start.
    #[error(transparent)]
    Solve(#[from] SolveError),
    /// Probe injection or time-window probing failed.
    #[error(transparent)]
    Availability(#[from] AvailabilityError),
    /// A region names a time zone chrono-tz does not know.
    #[error("service region {service_region_id} has unknown time zone {name}")]
    InvalidTimeZone {
        /// The region.
        service_region_id: i64,
        /// The configured zone name.
        name: String,
    },
    /// Availability is configured for a region without optimizer settings.
    #[error("availability settings for region {service_region_id} have no optimizer settings")]
    InconsistentSettings {
        /// The region.
        service_region_id: i64,
    },
    /// Settings name an optimizer config row that does not exist.
    #[error("optimizer config {config_id} not found")]
    MissingOptimizerConfig {
        /// The missing row.
        config_id: i64,
    },
    /// Availability settings list no attribute categories.
    #[error("availability settings have no attributes")]
    NoAttributes,
    /// Configured attribute variants are missing from the store.
    #[error("unknown availability attributes: {}", names.join(", "))]
    MissingAttributes {
        /// Qualified names that were not found.
        names: Vec<String>,
    },
}
