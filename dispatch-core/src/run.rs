//! Optimizer runs and the keys that identify scheduled instances.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::vrp::TimeWindow;

/// Why the optimizer was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerRunType {
    /// A caller asked whether new work fits.
    FeasibilityCheck,
    /// Continuous re-optimization of a region schedule.
    ServiceRegionSchedule,
    /// Continuous availability probing of a region.
    ServiceRegionAvailability,
}

impl OptimizerRunType {
    /// Stable name stored with each run.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeasibilityCheck => "feasibility_check",
            Self::ServiceRegionSchedule => "service_region_schedule",
            Self::ServiceRegionAvailability => "service_region_availability",
        }
    }
}

impl fmt::Display for OptimizerRunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that produced a run-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunErrorSource {
    /// Persisting a solution failed.
    LogisticsWrite,
    /// The optimizer stream failed.
    Optimizer,
}

impl RunErrorSource {
    /// Identifier stored with each run error.
    #[must_use]
    pub const fn id(self) -> i64 {
        match self {
            Self::LogisticsWrite => 1,
            Self::Optimizer => 2,
        }
    }

    /// Inverse of [`RunErrorSource::id`].
    #[must_use]
    pub const fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::LogisticsWrite),
            2 => Some(Self::Optimizer),
            _ => None,
        }
    }
}

/// Run details assembled while building a problem, before the run is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOptimizerRun {
    /// Region being solved.
    pub service_region_id: i64,
    /// Date being solved.
    pub service_date: NaiveDate,
    /// Region open hours on that date.
    pub open_hours: TimeWindow,
    /// Oldest distance data accepted.
    pub earliest_distance_timestamp_sec: i64,
    /// Newest distance data accepted.
    pub latest_distance_timestamp_sec: i64,
    /// Snapshot the problem was built from.
    pub snapshot_timestamp_sec: i64,
    /// Optimizer config row used.
    pub optimizer_config_id: i64,
    /// Version of the service that built the problem.
    pub service_version: String,
}

/// A stored optimizer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerRun {
    /// Store-assigned identifier.
    pub id: i64,
    /// Why the optimizer was invoked.
    pub run_type: OptimizerRunType,
    /// Region being solved.
    pub service_region_id: i64,
    /// Date being solved.
    pub service_date: NaiveDate,
    /// Region open hours on that date.
    pub open_hours: TimeWindow,
    /// Oldest distance data accepted.
    pub earliest_distance_timestamp_sec: i64,
    /// Newest distance data accepted.
    pub latest_distance_timestamp_sec: i64,
    /// Snapshot the problem was built from.
    pub snapshot_timestamp_sec: i64,
    /// Optimizer config row used.
    pub optimizer_config_id: i64,
    /// Version of the service that built the problem.
    pub service_version: String,
}

impl OptimizerRun {
    /// Attach a store id and run type to a new run.
    #[must_use]
    pub fn from_new(id: i64, run_type: OptimizerRunType, run: &NewOptimizerRun) -> Self {
        Self {
            id,
            run_type,
            service_region_id: run.service_region_id,
            service_date: run.service_date,
            open_hours: run.open_hours,
            earliest_distance_timestamp_sec: run.earliest_distance_timestamp_sec,
            latest_distance_timestamp_sec: run.latest_distance_timestamp_sec,
            snapshot_timestamp_sec: run.snapshot_timestamp_sec,
            optimizer_config_id: run.optimizer_config_id,
            service_version: run.service_version.clone(),
        }
    }
}

/// A stored optimizer configuration row.
///
/// Missing fields deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Identifier.
    pub id: i64,
    /// Free-form version label.
    pub config_version: String,
    /// Search time limit.
    pub termination_duration_ms: i64,
    /// Revenue attributed to each served visit.
    pub per_visit_revenue_usd_cents: i64,
    /// Hourly cost of an advanced practice provider.
    pub app_hourly_cost_usd_cents: i64,
    /// Hourly cost of a technician.
    pub dhmt_hourly_cost_usd_cents: i64,
    /// Stream intermediate infeasible solutions.
    pub include_intermediate_infeasible_solutions: bool,
}

/// A geographic service region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegion {
    /// Identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// IANA time zone, e.g. `America/Denver`.
    pub iana_time_zone_name: String,
}

/// Identity of a continuously scheduled unit of work.
///
/// Schedule instances leave `horizon_day` empty; availability instances carry
/// the offset from the region's current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunInstanceKey {
    /// Region.
    pub service_region_id: i64,
    /// Date in UTC-normalised form.
    pub service_date: NaiveDate,
    /// Offset from the region's current date.
    pub horizon_day: Option<u32>,
}

impl fmt::Display for RunInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.service_region_id,
            self.service_date.format("%Y-%m-%d")
        )
    }
}
