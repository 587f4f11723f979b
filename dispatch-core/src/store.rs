//! Persistence contracts used by the solve pipeline and the runner.
//!
//! Implementations live outside the core; `dispatch-data` ships a SQLite
//! store and [`crate::test_support`] an in-memory one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use thiserror::Error;

use crate::availability::{
    AvailabilityVisit, AvailabilityVisitAttributes, AvailabilityVisitIdMap, Attribute,
    SimpleAvailabilityVisit,
};
use crate::constraint::VrpConstraintConfig;
use crate::run::{
    NewOptimizerRun, OptimizerConfig, OptimizerRun, OptimizerRunType, RunErrorSource,
    ServiceRegion,
};
use crate::settings::{CapacitySettings, OptimizerSettings};
use crate::vrp::{
    Location, RestBreak, TimeWindow, UnassignedVisit, Visit, VrpDescription, VrpProblem,
    VrpSolution,
};

/// Length of breaks added for teams that did not request one.
pub const DEFAULT_UNREQUESTED_REST_BREAK_DURATION_SEC: i64 = 30 * 60;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The problem has no shift teams and no visits.
    #[error("nothing to solve for VRP")]
    EmptyDescription,
    /// A referenced record does not exist.
    #[error("{what} {id} not found")]
    NotFound {
        /// Kind of record.
        what: &'static str,
        /// Identifier looked up.
        id: i64,
    },
    /// The storage backend failed.
    #[error("store operation '{operation}' failed")]
    Backend {
        /// Operation being performed.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A stored payload could not be encoded or decoded.
    #[error("failed to serialise {what}")]
    Serialization {
        /// Payload being processed.
        what: &'static str,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Stored data is inconsistent.
    #[error("invalid stored data: {message}")]
    InvalidData {
        /// Description of the inconsistency.
        message: String,
    },
}

/// Arguments for [`RunStore::add_optimizer_run`].
#[derive(Debug, Clone, Copy)]
pub struct AddOptimizerRunParams<'a> {
    /// Run details from the problem builder.
    pub run: &'a NewOptimizerRun,
    /// Why the optimizer is invoked.
    pub run_type: OptimizerRunType,
    /// Constraint configuration sent with the request.
    pub constraint_config: Option<&'a VrpConstraintConfig>,
    /// Region settings in force.
    pub optimizer_settings: Option<&'a OptimizerSettings>,
}

/// Arguments for [`RunStore::write_schedule_for_solution`].
#[derive(Debug, Clone, Copy)]
pub struct WriteScheduleParams<'a> {
    /// Region of the run.
    pub service_region_id: i64,
    /// Run that produced the solution.
    pub optimizer_run_id: i64,
    /// Optimizer version reported with the solution.
    pub optimizer_version: &'a str,
    /// The solution.
    pub solution: &'a VrpSolution,
    /// Probe id mapping for availability runs; empty otherwise.
    pub availability_visit_ids: &'a AvailabilityVisitIdMap,
    /// Unassigned visits of the problem before solving.
    pub previous_unassigned_visits: &'a [UnassignedVisit],
}

/// Run ledger operations needed by the solve pipeline.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Record a run before any of its solutions are written.
    async fn add_optimizer_run(
        &self,
        params: AddOptimizerRunParams<'_>,
    ) -> Result<OptimizerRun, StoreError>;

    /// Record a non-fatal error against a run.
    async fn add_optimizer_run_error(
        &self,
        optimizer_run_id: i64,
        source: RunErrorSource,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Persist a solution as a schedule and return the schedule id.
    async fn write_schedule_for_solution(
        &self,
        params: WriteScheduleParams<'_>,
    ) -> Result<i64, StoreError>;
}

/// Arguments for [`RegionStore::has_new_info_since_last_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewInfoParams {
    /// Region.
    pub service_region_id: i64,
    /// Date.
    pub service_date: NaiveDate,
    /// Newest snapshot the caller may use.
    pub latest_snapshot_timestamp_sec: i64,
}

/// Result of [`RegionStore::has_new_info_since_last_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInfo {
    /// Whether region data changed since the last schedule run.
    pub has_new_info: bool,
    /// The last schedule run, if any.
    pub last_run: Option<OptimizerRun>,
    /// Region time zone.
    pub time_zone: Tz,
}

/// Description of a visit a caller wants checked or probed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckFeasibilityVisit {
    /// Region the visit belongs to.
    pub market_id: i64,
    /// Requested arrival window.
    pub arrival_time_window: Option<TimeWindow>,
    /// Requested service duration.
    pub service_duration_sec: Option<i64>,
    /// Required attribute names.
    pub required_attributes: Vec<String>,
    /// Visit location; canonical locations are used when absent.
    pub location: Option<Location>,
}

/// Arguments for [`RegionStore::service_region_vrp_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRegionVrpDataParams {
    /// Region.
    pub service_region_id: i64,
    /// Date.
    pub service_date: NaiveDate,
    /// Newest snapshot to read.
    pub snapshot_timestamp_sec: i64,
    /// Visit to check, for feasibility and availability runs.
    pub check_feasibility_visit: Option<CheckFeasibilityVisit>,
    /// Shift team capacity limits.
    pub capacity_settings: Vec<CapacitySettings>,
    /// Horizon day the capacity limits apply to.
    pub horizon_day: Option<u32>,
}

/// Template visits and locations for a feasibility or availability check.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckFeasibilityData {
    /// Template visits.
    pub visits: Vec<Visit>,
    /// Candidate locations.
    pub locations: Vec<Location>,
}

/// Region data needed to build a problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRegionVrpData {
    /// Region.
    pub service_region_id: i64,
    /// Date.
    pub service_date: NaiveDate,
    /// Region open hours on that date.
    pub open_hours: TimeWindow,
    /// Snapshot the data was read at.
    pub snapshot_timestamp_sec: i64,
    /// Check visit data, when a check visit was requested.
    pub check_feasibility_data: Option<CheckFeasibilityData>,
    /// Capacity limits to apply.
    pub capacity_settings: Vec<CapacitySettings>,
    /// Horizon day the capacity limits apply to.
    pub horizon_day: Option<u32>,
}

/// Adds a break for teams without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrequestedRestBreakConfig {
    /// Length of the added break.
    pub duration_sec: i64,
}

impl Default for UnrequestedRestBreakConfig {
    fn default() -> Self {
        Self {
            duration_sec: DEFAULT_UNREQUESTED_REST_BREAK_DURATION_SEC,
        }
    }
}

/// Arguments for [`RegionStore::create_vrp_problem`].
#[derive(Debug, Clone, PartialEq)]
pub struct VrpProblemParams {
    /// Region data.
    pub vrp_data: ServiceRegionVrpData,
    /// Oldest distance data accepted.
    pub earliest_distance_timestamp_sec: i64,
    /// Add unrequested rest breaks when set.
    pub unrequested_rest_break: Option<UnrequestedRestBreakConfig>,
}

/// Diagnostics about the schedule a check problem was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckFeasibilityDiagnostics {
    /// Schedule whose routes were pinned into the problem.
    pub schedule_id: Option<i64>,
    /// Visits newly unassigned compared with that schedule.
    pub unassigned_visits_diff: i64,
}

/// A built problem and the run it will be recorded under.
#[derive(Debug, Clone, PartialEq)]
pub struct VrpProblemData {
    /// The problem.
    pub problem: VrpProblem,
    /// Run details.
    pub optimizer_run: NewOptimizerRun,
    /// Present when the problem was built for a check visit.
    pub check_feasibility_diagnostics: Option<CheckFeasibilityDiagnostics>,
}

/// Region-level store operations used by the runner.
#[async_trait]
pub trait RegionStore: RunStore {
    /// Load optimizer config rows by id.
    async fn optimizer_configs_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<OptimizerConfig>, StoreError>;

    /// Load a region.
    async fn service_region(&self, service_region_id: i64) -> Result<ServiceRegion, StoreError>;

    /// Whether region data changed since the last schedule run.
    async fn has_new_info_since_last_run(&self, params: NewInfoParams)
    -> Result<NewInfo, StoreError>;

    /// Whether a schedule run finished after the last availability run.
    async fn has_new_schedule_since_last_availability_run(
        &self,
        service_region_id: i64,
        service_date: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Read the region data needed to build a problem.
    async fn service_region_vrp_data(
        &self,
        params: ServiceRegionVrpDataParams,
    ) -> Result<ServiceRegionVrpData, StoreError>;

    /// Build a problem; fails with [`StoreError::EmptyDescription`] when there
    /// is nothing to solve.
    async fn create_vrp_problem(&self, params: VrpProblemParams)
    -> Result<VrpProblemData, StoreError>;

    /// The most recently generated probe set of a region.
    async fn latest_availability_visits(
        &self,
        service_region_id: i64,
    ) -> Result<Vec<AvailabilityVisit>, StoreError>;

    /// Attributes of stored probe visits.
    async fn availability_visit_attributes(
        &self,
        visit_ids: &[i64],
    ) -> Result<AvailabilityVisitAttributes, StoreError>;

    /// Look up attributes by name; unknown names are omitted.
    async fn attributes_for_names(&self, names: &[String]) -> Result<Vec<Attribute>, StoreError>;

    /// Store a new probe set and its attribute links in one transaction.
    async fn add_availability_visits(
        &self,
        service_region_id: i64,
        visits: &[SimpleAvailabilityVisit],
    ) -> Result<Vec<AvailabilityVisit>, StoreError>;

    /// Planned arrival per visit id in a stored schedule.
    async fn visit_arrival_timestamps_for_schedule(
        &self,
        schedule_id: i64,
    ) -> Result<BTreeMap<i64, i64>, StoreError>;
}

/// Add a break to each team that has none, when it still fits in the shift.
///
/// A break fits when the later of `now` and the shift start is before the
/// shift end minus the break duration. `now` defaults to the description's
/// capture time, and to the shift start when that is also unknown.
pub fn add_unrequested_rest_breaks(
    description: &mut VrpDescription,
    config: UnrequestedRestBreakConfig,
) {
    let now = description.current_timestamp_sec;
    let mut next_id = description
        .rest_breaks
        .iter()
        .map(|rest_break| rest_break.id)
        .max()
        .unwrap_or(0);
    let mut added = Vec::new();
    for team in &description.shift_teams {
        let has_break = description
            .rest_breaks
            .iter()
            .any(|rest_break| rest_break.shift_team_id == team.id);
        if has_break {
            continue;
        }
        let window = team.available_time_window;
        let earliest = now.map_or(window.start_timestamp_sec, |now| {
            now.max(window.start_timestamp_sec)
        });
        if earliest >= window.end_timestamp_sec - config.duration_sec {
            continue;
        }
        next_id += 1;
        added.push(RestBreak {
            id: next_id,
            shift_team_id: team.id,
            location_id: None,
            start_timestamp_sec: None,
            duration_sec: config.duration_sec,
            unrequested: true,
        });
    }
    description.rest_breaks.extend(added);
}
