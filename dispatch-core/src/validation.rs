//! Structural checks applied to a problem before it is submitted.
//!
//! A [`ValidationConfig`] holds a set of [`ProblemValidator`]s. Each validator
//! reports [`ValidationIssue`]s; fatal issues always reject the problem while
//! recoverable ones reject it only when
//! [`ValidationConfig::fail_on_recoverable_error`] is set.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::vrp::{RouteStop, VrpDescription};

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// The optimizer can still produce a meaningful answer.
    Recoverable,
    /// The problem cannot be solved as described.
    Fatal,
}

/// A single finding reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Name of the reporting validator.
    pub validator: &'static str,
    /// Whether the finding rejects the problem on its own.
    pub severity: ValidationSeverity,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    fn fatal(validator: &'static str, message: String) -> Self {
        Self {
            validator,
            severity: ValidationSeverity::Fatal,
            message,
        }
    }

    fn recoverable(validator: &'static str, message: String) -> Self {
        Self {
            validator,
            severity: ValidationSeverity::Recoverable,
            message,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.validator, self.message)
    }
}

/// The problem was rejected.
#[derive(Debug, Clone, Error)]
#[error("problem rejected by validation: {}", render(.issues))]
pub struct ValidationError {
    /// Every issue found, recoverable ones included.
    pub issues: Vec<ValidationIssue>,
}

fn render(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A check over a problem description.
pub trait ProblemValidator: Send + Sync {
    /// Short name used in issue reports.
    fn name(&self) -> &'static str;

    /// Inspect `description` and report what is wrong with it.
    fn validate(&self, description: &VrpDescription) -> Vec<ValidationIssue>;
}

/// Which validators run and how strictly their findings are applied.
#[derive(Clone)]
pub struct ValidationConfig {
    /// Reject problems with recoverable issues too.
    pub fail_on_recoverable_error: bool,
    /// Validators applied in order.
    pub validators: Vec<Arc<dyn ProblemValidator>>,
}

impl fmt::Debug for ValidationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.validators.iter().map(|v| v.name()).collect();
        f.debug_struct("ValidationConfig")
            .field("fail_on_recoverable_error", &self.fail_on_recoverable_error)
            .field("validators", &names)
            .finish()
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fail_on_recoverable_error: false,
            validators: default_problem_validators(),
        }
    }
}

impl ValidationConfig {
    /// A configuration that accepts every problem.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            fail_on_recoverable_error: false,
            validators: Vec::new(),
        }
    }

    /// Run every validator over `description`.
    ///
    /// Returns the recoverable issues that were tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] with every issue when a fatal issue is
    /// found, or a recoverable one while `fail_on_recoverable_error` is set.
    pub fn validate(
        &self,
        description: &VrpDescription,
    ) -> Result<Vec<ValidationIssue>, ValidationError> {
        let issues: Vec<_> = self
            .validators
            .iter()
            .flat_map(|validator| {
                let found = validator.validate(description);
                if !found.is_empty() {
                    log::debug!("{} reported {} issues", validator.name(), found.len());
                }
                found
            })
            .collect();
        let rejected = issues.iter().any(|issue| {
            issue.severity == ValidationSeverity::Fatal || self.fail_on_recoverable_error
        });
        if rejected {
            log::warn!("rejecting problem with {} validation issues", issues.len());
            Err(ValidationError { issues })
        } else {
            Ok(issues)
        }
    }
}

/// Validators applied when nothing else is configured.
#[must_use]
pub fn default_problem_validators() -> Vec<Arc<dyn ProblemValidator>> {
    vec![
        Arc::new(UniqueIds),
        Arc::new(KnownLocations),
        Arc::new(KnownReferences),
        Arc::new(OrderedTimeWindows),
    ]
}

fn duplicates(kind: &str, ids: impl IntoIterator<Item = i64>) -> Option<String> {
    let mut seen = BTreeSet::new();
    let repeated: BTreeSet<_> = ids.into_iter().filter(|id| !seen.insert(*id)).collect();
    if repeated.is_empty() {
        None
    } else {
        Some(format!("duplicate {kind} ids {repeated:?}"))
    }
}

/// Rejects repeated team, visit, location and rest-break ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueIds;

impl ProblemValidator for UniqueIds {
    fn name(&self) -> &'static str {
        "unique_ids"
    }

    fn validate(&self, description: &VrpDescription) -> Vec<ValidationIssue> {
        [
            duplicates("shift team", description.shift_teams.iter().map(|t| t.id)),
            duplicates("visit", description.visits.iter().map(|v| v.id)),
            duplicates("location", description.locations.iter().map(|l| l.id)),
            duplicates("rest break", description.rest_breaks.iter().map(|b| b.id)),
        ]
        .into_iter()
        .flatten()
        .map(|message| ValidationIssue::fatal(self.name(), message))
        .collect()
    }
}

/// Rejects depots, visits and breaks that point at unknown locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownLocations;

impl ProblemValidator for KnownLocations {
    fn name(&self) -> &'static str {
        "known_locations"
    }

    fn validate(&self, description: &VrpDescription) -> Vec<ValidationIssue> {
        let known: BTreeSet<_> = description.locations.iter().map(|l| l.id).collect();
        let mut issues = Vec::new();
        let mut check = |owner: String, location_id: i64| {
            if !known.contains(&location_id) {
                issues.push(ValidationIssue::fatal(
                    self.name(),
                    format!("{owner} references unknown location {location_id}"),
                ));
            }
        };
        for team in &description.shift_teams {
            check(format!("shift team {}", team.id), team.depot_location_id);
        }
        for visit in &description.visits {
            check(format!("visit {}", visit.id), visit.location_id);
        }
        for rest_break in &description.rest_breaks {
            if let Some(location_id) = rest_break.location_id {
                check(format!("rest break {}", rest_break.id), location_id);
            }
        }
        issues
    }
}

/// Rejects routes, breaks and unassigned entries naming unknown records.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownReferences;

impl ProblemValidator for KnownReferences {
    fn name(&self) -> &'static str {
        "known_references"
    }

    fn validate(&self, description: &VrpDescription) -> Vec<ValidationIssue> {
        let teams: BTreeSet<_> = description.shift_teams.iter().map(|t| t.id).collect();
        let visits: BTreeSet<_> = description.visits.iter().map(|v| v.id).collect();
        let breaks: BTreeSet<_> = description.rest_breaks.iter().map(|b| b.id).collect();
        let mut issues = Vec::new();

        for rest_break in &description.rest_breaks {
            if !teams.contains(&rest_break.shift_team_id) {
                issues.push(ValidationIssue::fatal(
                    self.name(),
                    format!(
                        "rest break {} belongs to unknown shift team {}",
                        rest_break.id, rest_break.shift_team_id
                    ),
                ));
            }
        }
        for team in &description.shift_teams {
            let stops = team.route.iter().flat_map(|route| route.stops.iter());
            for stop in stops {
                let missing = match stop {
                    RouteStop::Visit { visit_id, .. } => {
                        (!visits.contains(visit_id)).then(|| format!("visit {visit_id}"))
                    }
                    RouteStop::RestBreak { rest_break_id, .. } => {
                        (!breaks.contains(rest_break_id))
                            .then(|| format!("rest break {rest_break_id}"))
                    }
                };
                if let Some(missing) = missing {
                    issues.push(ValidationIssue::fatal(
                        self.name(),
                        format!("route of shift team {} stops at unknown {missing}", team.id),
                    ));
                }
            }
        }
        for unassigned in &description.unassigned_visits {
            if !visits.contains(&unassigned.visit_id) {
                issues.push(ValidationIssue::recoverable(
                    self.name(),
                    format!("unassigned entry for unknown visit {}", unassigned.visit_id),
                ));
            }
        }
        issues
    }
}

/// Flags inverted windows and negative durations.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedTimeWindows;

impl ProblemValidator for OrderedTimeWindows {
    fn name(&self) -> &'static str {
        "ordered_time_windows"
    }

    fn validate(&self, description: &VrpDescription) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for team in &description.shift_teams {
            if team.available_time_window.duration_sec() < 0 {
                issues.push(ValidationIssue::recoverable(
                    self.name(),
                    format!("shift team {} has an inverted availability window", team.id),
                ));
            }
        }
        for visit in &description.visits {
            if visit
                .arrival_time_window
                .is_some_and(|window| window.duration_sec() < 0)
            {
                issues.push(ValidationIssue::recoverable(
                    self.name(),
                    format!("visit {} has an inverted arrival window", visit.id),
                ));
            }
            if visit.service_duration_sec < 0 || visit.extra_setup_duration_sec < 0 {
                issues.push(ValidationIssue::fatal(
                    self.name(),
                    format!("visit {} has a negative duration", visit.id),
                ));
            }
        }
        for rest_break in &description.rest_breaks {
            if rest_break.duration_sec < 0 {
                issues.push(ValidationIssue::fatal(
                    self.name(),
                    format!("rest break {} has a negative duration", rest_break.id),
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrp::{
        Location, RestBreak, ShiftTeam, ShiftTeamRoute, TimeWindow, UnassignedVisit, Visit,
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn description() -> VrpDescription {
        let location = |id| Location {
            id,
            latitude_e6: 39_739_236,
            longitude_e6: -104_990_251,
        };
        VrpDescription {
            shift_teams: vec![ShiftTeam {
                id: 1,
                depot_location_id: 10,
                available_time_window: TimeWindow::new(0, 3_600),
                attributes: Vec::new(),
                route: Some(ShiftTeamRoute {
                    stops: vec![RouteStop::Visit {
                        visit_id: 2,
                        arrival_timestamp_sec: 600,
                        pinned: false,
                    }],
                }),
            }],
            visits: vec![Visit {
                id: 2,
                location_id: 20,
                service_duration_sec: 900,
                ..Visit::default()
            }],
            locations: vec![location(10), location(20)],
            ..VrpDescription::default()
        }
    }

    #[rstest]
    fn default_validators_accept_a_consistent_problem(description: VrpDescription) {
        let tolerated = ValidationConfig::default()
            .validate(&description)
            .expect("problem is consistent");
        assert!(tolerated.is_empty(), "{tolerated:?}");
    }

    #[rstest]
    fn unknown_depot_locations_are_fatal(mut description: VrpDescription) {
        description.shift_teams[0].depot_location_id = 99;
        let err = ValidationConfig::default()
            .validate(&description)
            .expect_err("depot is unknown");
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].validator, "known_locations");
        assert!(err.to_string().contains("unknown location 99"), "{err}");
    }

    #[rstest]
    fn duplicate_visits_are_fatal(mut description: VrpDescription) {
        let copy = description.visits[0].clone();
        description.visits.push(copy);
        let issues = UniqueIds.validate(&description);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ValidationSeverity::Fatal);
    }

    #[rstest]
    fn dangling_route_stops_and_breaks_are_reported(mut description: VrpDescription) {
        description.rest_breaks.push(RestBreak {
            id: 7,
            shift_team_id: 3,
            location_id: None,
            start_timestamp_sec: None,
            duration_sec: 1_800,
            unrequested: true,
        });
        if let Some(route) = description.shift_teams[0].route.as_mut() {
            route.stops.push(RouteStop::RestBreak {
                rest_break_id: 8,
                start_timestamp_sec: 1_200,
                pinned: false,
            });
        }
        let issues = KnownReferences.validate(&description);
        let messages: Vec<_> = issues.iter().map(|issue| issue.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "rest break 7 belongs to unknown shift team 3",
                "route of shift team 1 stops at unknown rest break 8",
            ]
        );
    }

    #[rstest]
    #[case(false, true)]
    #[case(true, false)]
    fn recoverable_issues_follow_the_strictness_flag(
        mut description: VrpDescription,
        #[case] fail_on_recoverable_error: bool,
        #[case] accepted: bool,
    ) {
        description.unassigned_visits.push(UnassignedVisit {
            visit_id: 404,
            pinned: false,
        });
        let config = ValidationConfig {
            fail_on_recoverable_error,
            ..ValidationConfig::default()
        };
        let outcome = config.validate(&description);
        assert_eq!(outcome.is_ok(), accepted, "{outcome:?}");
        if let Ok(tolerated) = outcome {
            assert_eq!(tolerated[0].severity, ValidationSeverity::Recoverable);
        }
    }

    #[rstest]
    fn inverted_windows_are_recoverable_but_negative_durations_are_not(
        mut description: VrpDescription,
    ) {
        description.shift_teams[0].available_time_window = TimeWindow::new(3_600, 0);
        let tolerated = ValidationConfig::default()
            .validate(&description)
            .expect("inverted windows are tolerated");
        assert_eq!(tolerated.len(), 1);

        description.visits[0].service_duration_sec = -1;
        assert!(ValidationConfig::default().validate(&description).is_err());
    }

    #[rstest]
    fn disabled_configuration_accepts_anything(mut description: VrpDescription) {
        description.locations.clear();
        assert!(ValidationConfig::disabled().validate(&description).is_ok());
    }
}
