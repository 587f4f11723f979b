//! Facade crate for the dispatch engine.
//!
//! This crate re-exports the core domain types, the solve pipeline and the
//! availability probes, and exposes the continuous runner and the SQLite-backed
//! adapters behind feature flags.

#![forbid(unsafe_code)]

pub use dispatch_core::{
    AllSettings, OptimizerClient, OptimizerError, RegionStore, RouteProvider, RunInstanceKey,
    RunStore, SettingsService, SolveVrpRequest, SolveVrpResponse, StoreError, ValidationConfig,
    VrpDescription, VrpProblem, VrpScore, VrpSolution,
};

pub use dispatch_solver::{
    FeasibilityOutcome, FeasibilitySolver, FeasibilityTree, SolveError, SolveVrpParams, VrpSolver,
};

pub use dispatch_availability::{
    AvailabilityError, AvailabilityStatus, TimeWindowAvailability, availability_statuses,
    time_window_availabilities,
};

#[cfg(feature = "runner")]
pub use dispatch_runner::{Runner, RunnerError};

#[cfg(feature = "store-sqlite")]
pub use dispatch_data::{
    HttpOptimizerClient, JsonSettingsService, OsrmRouteProvider, RegionSnapshot,
    SqliteLogisticsStore,
};
