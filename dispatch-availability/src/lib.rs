//! Availability probing for the dispatch engine.
//!
//! Availability is measured by injecting synthetic probe visits into a real
//! routing problem and reading back which of them the optimizer could place.
//! This crate synthesises probe sets from attribute categories, locations and
//! durations, decides whether a stored probe set can be reused, injects probes
//! into problems, derives region availability statuses from stored results,
//! and answers time-window availability questions through a
//! [`FeasibilitySolver`](dispatch_solver::FeasibilitySolver).

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod attributes;
mod probes;
mod status;
mod time_window;

use dispatch_solver::SolveError;
use thiserror::Error;

pub use attributes::{attribute_combinations, attribute_names_by_category};
pub use probes::{
    AvailabilityProbeParams, DEFAULT_ACUITY_LEVEL, MAX_UNASSIGNED_PRIORITY_LEVEL,
    add_availability_visits_to_problem, are_equal_visits, build_availability_vrp_visits,
    generate_simple_availability_visits, to_simple_availability_visits,
};
pub use status::{AvailabilityStatus, ServiceRegionAvailabilityResult, availability_statuses};
pub use time_window::{
    RECOMMENDED_PROBE_ID, ServiceDateAvailability, ServiceDateInput, TIME_WINDOW_SET_KEY,
    TimeWindowAvailability, TimeWindowAvailabilityParams, TimeWindowStatus, UtcTimeWindow,
    clamp_time, is_feasible_solution, possible_time_windows, recommended_time_window,
    time_window_availabilities,
};

/// Errors raised while building or solving availability problems.
#[derive(Debug, Error)]
pub enum AvailabilityError {
    /// A visit already carries a priority above the supported maximum.
    #[error("visit {visit_id} has invalid unassigned priority {level}")]
    InvalidPriority {
        /// Offending visit.
        visit_id: i64,
        /// Its priority level.
        level: u32,
    },
    /// Time-window probing needs exactly one template visit.
    #[error("expected exactly one check visit, found {count}")]
    UnexpectedVisitCount {
        /// Template visits present.
        count: usize,
    },
    /// Time-window probing needs exactly one location.
    #[error("expected exactly one check location, found {count}")]
    UnexpectedLocationCount {
        /// Locations present.
        count: usize,
    },
    /// A stored timestamp is outside the representable range.
    #[error("timestamp {timestamp_sec} is out of range")]
    InvalidTimestamp {
        /// Offending timestamp in seconds.
        timestamp_sec: i64,
    },
    /// A probe problem could not be solved.
    #[error(transparent)]
    Solve(#[from] SolveError),
}
