//! Core domain model for the dispatch engine.
//!
//! Responsibilities:
//! - Define the routing problem exchanged with the external optimizer.
//! - Define region settings, run records and availability probe records.
//! - Declare the seams to the optimizer, the logistics store, the settings
//!   source and the road-routing service.
//! - Check problems for structural defects before submission.
//!
//! Boundaries:
//! - No I/O; adapters live in `dispatch-data`.
//! - Orchestration lives in `dispatch-solver`, `dispatch-availability` and
//!   `dispatch-runner`.

#![forbid(unsafe_code)]

pub mod availability;
pub mod constraint;
pub mod optimizer;
pub mod route;
pub mod run;
pub mod settings;
pub mod store;
pub mod validation;
pub mod vrp;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

pub use availability::{
    Attribute, AvailabilityVisit, AvailabilityVisitAttributes, AvailabilityVisitIdMap,
    SimpleAvailabilityVisit,
};
pub use constraint::{
    ClinicalUrgencyConfig, DepotLateArrivalConstraintConfig, ExponentialPolicy,
    LateArrivalConstraintConfig, LinearOffsetPolicy, OpportunityCostConfig,
    VisitLatenessTolerance, VrpConstraintConfig, WorkDistributionConstraintConfig,
};
pub use optimizer::{OptimizerClient, OptimizerError, SolutionStream};
pub use route::{LatLng, Polyline, RouteError, RouteProvider};
pub use run::{
    NewOptimizerRun, OptimizerConfig, OptimizerRun, OptimizerRunType, RunErrorSource,
    RunInstanceKey, ServiceRegion,
};
pub use settings::{
    AllSettings, AvailabilityAttribute, AvailabilitySettings, AvailabilitySettingsConfig,
    CapacitySettings, OptimizerSettings, SettingsConfig, SettingsError, SettingsService,
};
pub use store::{
    AddOptimizerRunParams, CheckFeasibilityData, CheckFeasibilityDiagnostics,
    CheckFeasibilityVisit, NewInfo, NewInfoParams, RegionStore, RunStore, ServiceRegionVrpData,
    ServiceRegionVrpDataParams, StoreError, UnrequestedRestBreakConfig, VrpProblemData,
    VrpProblemParams, WriteScheduleParams,
};
pub use validation::{
    ProblemValidator, ValidationConfig, ValidationError, ValidationIssue, ValidationSeverity,
    default_problem_validators,
};
pub use vrp::{
    Location, RestBreak, RouteStop, ShiftTeam, ShiftTeamRoute, SolveVrpRequest, SolveVrpResponse,
    TerminationType, TimeWindow, UnassignedVisit, Visit, VisitPriority, VrpConfig,
    VrpDescription, VrpProblem, VrpScore, VrpSolution,
};
