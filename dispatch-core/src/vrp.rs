//! Routing problem vocabulary shared with the external optimizer.
//!
//! The optimizer treats these types as an opaque contract: the engine builds
//! [`VrpDescription`]s, submits them inside a [`SolveVrpRequest`], and reads
//! back [`VrpSolution`]s. Timestamps are Unix seconds; coordinates are stored
//! as integer microdegrees (E6) so they survive JSON round trips unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constraint::VrpConstraintConfig;

/// A geographic point known to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Unique identifier.
    pub id: i64,
    /// Latitude in microdegrees.
    pub latitude_e6: i32,
    /// Longitude in microdegrees.
    pub longitude_e6: i32,
}

/// A closed interval of Unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start_timestamp_sec: i64,
    /// Inclusive end.
    pub end_timestamp_sec: i64,
}

impl TimeWindow {
    /// Construct a window from its bounds.
    #[must_use]
    pub const fn new(start_timestamp_sec: i64, end_timestamp_sec: i64) -> Self {
        Self {
            start_timestamp_sec,
            end_timestamp_sec,
        }
    }

    /// Length of the window in seconds.
    #[must_use]
    pub const fn duration_sec(&self) -> i64 {
        self.end_timestamp_sec - self.start_timestamp_sec
    }
}

/// Highest unassigned priority level the optimizer accepts.
pub const MAX_UNASSIGNED_PRIORITY_LEVEL: u32 = 9;

/// Relative importance of keeping a visit assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitPriority {
    /// Level in `1..=9`; higher levels are dropped last.
    pub unassigned_priority_level: u32,
}

/// A unit of work to be placed on a shift team route.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Visit {
    /// Unique identifier. Synthetic probe visits use negative ids.
    pub id: i64,
    /// Identifier of the visit [`Location`].
    pub location_id: i64,
    /// Window in which the team must arrive.
    #[serde(default)]
    pub arrival_time_window: Option<TimeWindow>,
    /// Time spent on scene.
    pub service_duration_sec: i64,
    /// Additional setup time added to the service duration.
    #[serde(default)]
    pub extra_setup_duration_sec: i64,
    /// Attribute names a shift team must carry to serve the visit.
    #[serde(default)]
    pub required_attributes: Vec<String>,
    /// Visits sharing a key are mutually exclusive; at most one is assigned.
    #[serde(default)]
    pub overlap_set_key: Option<String>,
    /// Whether the optimizer may drop the visit without penalty.
    #[serde(default)]
    pub is_expendable: bool,
    /// Unassigned priority, when set.
    #[serde(default)]
    pub priority: Option<VisitPriority>,
    /// Clinical acuity level, when known.
    #[serde(default)]
    pub acuity_level: Option<i64>,
}

/// A break taken by a shift team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestBreak {
    /// Unique identifier.
    pub id: i64,
    /// Team taking the break.
    pub shift_team_id: i64,
    /// Fixed location, when the break was requested at a place.
    #[serde(default)]
    pub location_id: Option<i64>,
    /// Fixed start, when the break was requested at a time.
    #[serde(default)]
    pub start_timestamp_sec: Option<i64>,
    /// Length of the break.
    pub duration_sec: i64,
    /// Set for breaks the engine adds on the team's behalf.
    #[serde(default)]
    pub unrequested: bool,
}

/// A single stop on a shift team route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteStop {
    /// The team serves a visit.
    Visit {
        /// Visit served at this stop.
        visit_id: i64,
        /// Planned arrival.
        arrival_timestamp_sec: i64,
        /// Whether the optimizer must keep this stop in place.
        #[serde(default)]
        pinned: bool,
    },
    /// The team takes a rest break.
    RestBreak {
        /// Break taken at this stop.
        rest_break_id: i64,
        /// Planned start.
        start_timestamp_sec: i64,
        /// Whether the optimizer must keep this stop in place.
        #[serde(default)]
        pinned: bool,
    },
}

impl RouteStop {
    /// Visit identifier for visit stops.
    #[must_use]
    pub const fn visit_id(&self) -> Option<i64> {
        match self {
            Self::Visit { visit_id, .. } => Some(*visit_id),
            Self::RestBreak { .. } => None,
        }
    }

    /// Whether the stop is pinned.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        match self {
            Self::Visit { pinned, .. } | Self::RestBreak { pinned, .. } => *pinned,
        }
    }
}

/// Ordered stops planned for one shift team.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShiftTeamRoute {
    /// Stops in travel order.
    pub stops: Vec<RouteStop>,
}

/// A fleet unit available to perform visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTeam {
    /// Unique identifier.
    pub id: i64,
    /// Location the team departs from and returns to.
    pub depot_location_id: i64,
    /// Working window.
    pub available_time_window: TimeWindow,
    /// Attribute names the team carries.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Current route, absent when the team has no plan yet.
    #[serde(default)]
    pub route: Option<ShiftTeamRoute>,
}

/// A visit the solution leaves unserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedVisit {
    /// The visit.
    pub visit_id: i64,
    /// Whether the visit was pinned as unassigned.
    #[serde(default)]
    pub pinned: bool,
}

/// Everything the optimizer needs to know about a region and date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VrpDescription {
    /// Available shift teams.
    #[serde(default)]
    pub shift_teams: Vec<ShiftTeam>,
    /// Visits to place.
    #[serde(default)]
    pub visits: Vec<Visit>,
    /// Every location referenced by teams and visits.
    #[serde(default)]
    pub locations: Vec<Location>,
    /// Rest breaks, requested or not.
    #[serde(default)]
    pub rest_breaks: Vec<RestBreak>,
    /// Visits currently unassigned.
    #[serde(default)]
    pub unassigned_visits: Vec<UnassignedVisit>,
    /// Wall-clock time the description was captured.
    #[serde(default)]
    pub current_timestamp_sec: Option<i64>,
}

impl VrpDescription {
    /// Find a location by id.
    #[must_use]
    pub fn location(&self, id: i64) -> Option<&Location> {
        self.locations.iter().find(|location| location.id == id)
    }

    /// Whether there is nothing for the optimizer to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shift_teams.is_empty() && self.visits.is_empty()
    }

    /// Count stops pinned in place across all routes.
    #[must_use]
    pub fn pinned_visit_count(&self) -> usize {
        self.shift_teams
            .iter()
            .filter_map(|team| team.route.as_ref())
            .flat_map(|route| route.stops.iter())
            .filter(|stop| stop.visit_id().is_some() && stop.is_pinned())
            .count()
    }
}

/// A problem submitted to the optimizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VrpProblem {
    /// The problem content.
    pub description: VrpDescription,
}

/// Score of a solution as reported by the optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VrpScore {
    /// Whether the optimizer considers the score trustworthy.
    pub is_valid: bool,
    /// Hard constraint violations; zero when none are broken.
    pub hard_score: i64,
    /// Penalty for unassigned visits; zero when all are placed.
    pub unassigned_visits_score: i64,
    /// Soft objective value.
    #[serde(default)]
    pub soft_score: i64,
    /// Human-readable breakdown of the score.
    #[serde(default)]
    pub debug_explanation: Option<String>,
}

/// A solution proposed by the optimizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VrpSolution {
    /// Score of the solution.
    pub score: VrpScore,
    /// Description with routes and unassigned visits filled in.
    pub description: VrpDescription,
}

/// One message of the optimizer's solution stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolveVrpResponse {
    /// The solution.
    pub solution: VrpSolution,
    /// Version of the optimizer that produced it.
    #[serde(default)]
    pub optimizer_version: String,
}

/// How the optimizer decides to stop searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationType {
    /// Let the optimizer pick.
    #[default]
    Unspecified,
    /// Search for the full termination duration and return the best result.
    BestForTime,
    /// Stop at the first feasible solution.
    FirstFeasible,
}

/// Solver configuration sent alongside a problem.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VrpConfig {
    /// Hard limit on search time.
    #[serde(default)]
    pub termination_duration_ms: Option<i64>,
    /// Stop when the score does not improve for this long.
    #[serde(default)]
    pub unimproved_score_termination_duration_ms: Option<i64>,
    /// Revenue attributed to each served visit.
    #[serde(default)]
    pub per_visit_revenue_usd_cents: Option<i64>,
    /// Hourly cost of an advanced practice provider.
    #[serde(default)]
    pub app_hourly_cost_usd_cents: Option<i64>,
    /// Hourly cost of a technician.
    #[serde(default)]
    pub dhmt_hourly_cost_usd_cents: Option<i64>,
    /// Termination strategy.
    #[serde(default)]
    pub termination_type: TerminationType,
    /// Stream improving solutions as they are found.
    #[serde(default)]
    pub include_intermediate_solutions: bool,
    /// Stream intermediate solutions even when infeasible.
    #[serde(default)]
    pub include_intermediate_infeasible_solutions: bool,
    /// Constraint tuning.
    #[serde(default)]
    pub constraint_config: Option<VrpConstraintConfig>,
}

/// A complete request to the optimizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolveVrpRequest {
    /// Problem to solve.
    pub problem: VrpProblem,
    /// Solver configuration.
    #[serde(default)]
    pub config: VrpConfig,
    /// Free-form tags forwarded to optimizer monitoring.
    #[serde(default)]
    pub monitoring_tags: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stop(visit_id: i64, pinned: bool) -> RouteStop {
        RouteStop::Visit {
            visit_id,
            arrival_timestamp_sec: 0,
            pinned,
        }
    }

    #[rstest]
    fn pinned_visit_count_ignores_rest_breaks() {
        let description = VrpDescription {
            shift_teams: vec![ShiftTeam {
                id: 1,
                depot_location_id: 1,
                available_time_window: TimeWindow::new(0, 10),
                attributes: Vec::new(),
                route: Some(ShiftTeamRoute {
                    stops: vec![
                        stop(1, true),
                        stop(2, false),
                        RouteStop::RestBreak {
                            rest_break_id: 3,
                            start_timestamp_sec: 0,
                            pinned: true,
                        },
                    ],
                }),
            }],
            ..VrpDescription::default()
        };
        assert_eq!(description.pinned_visit_count(), 1);
    }

    #[rstest]
    fn route_stop_serialises_with_kind_tag() {
        let json = serde_json::to_value(stop(7, false)).expect("serialise stop");
        assert_eq!(json["kind"], "visit");
        assert_eq!(json["visit_id"], 7);
    }
}
