//! Arrival time-window availability for a single check visit.
//!
//! For each service date the check visit is cloned once per candidate window
//! and every clone is added to the date's problem under a shared overlap set,
//! so the optimizer places at most one of them. Probe `-1` always covers the
//! whole bookable span; where the optimizer puts it becomes the recommended
//! window.

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Timelike, Utc};
use dispatch_core::{OptimizerRunType, RouteStop, ServiceRegionVrpData, TimeWindow, VrpSolution};
use dispatch_solver::{
    FeasibilitySolver, SolveError, SolveVrpInput, SolveVrpParams, WrappedSolveVrpResponse,
};
use futures_util::future::try_join_all;

use crate::AvailabilityError;

/// Overlap set shared by the window probes of one date.
pub const TIME_WINDOW_SET_KEY: &str = "tw-availability-set";

/// Probe covering the whole bookable span.
pub const RECOMMENDED_PROBE_ID: i64 = -1;

/// A window between two UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtcTimeWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// End.
    pub end: DateTime<Utc>,
}

impl UtcTimeWindow {
    /// Window from `start` to `end`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    fn to_vrp(self) -> TimeWindow {
        TimeWindow::new(self.start.timestamp(), self.end.timestamp())
    }

    fn same_hours(&self, other: &Self) -> bool {
        self.start.hour() == other.start.hour() && self.end.hour() == other.end.hour()
    }
}

/// Outcome for one candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindowStatus {
    /// The probe for this window was not placed.
    Unavailable,
    /// The probe for this window was placed.
    Available,
    /// The window centred on where the whole-span probe was placed.
    Recommended,
}

/// A candidate window and its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindowAvailability {
    /// The window.
    pub time_window: UtcTimeWindow,
    /// Its outcome.
    pub status: TimeWindowStatus,
}

/// Windows offered on one service date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDateAvailability {
    /// The date.
    pub service_date: NaiveDate,
    /// Offered windows; empty when nothing can be offered.
    pub time_windows: Vec<TimeWindowAvailability>,
}

/// Problem inputs for one service date.
#[derive(Debug, Clone)]
pub struct ServiceDateInput {
    /// The date.
    pub service_date: NaiveDate,
    /// Region data with the check visit; dates without it offer nothing.
    pub vrp_data: Option<ServiceRegionVrpData>,
    /// Problem the probes are added to.
    pub solve_input: SolveVrpInput,
}

/// Arguments for [`time_window_availabilities`].
#[derive(Debug, Clone)]
pub struct TimeWindowAvailabilityParams {
    /// Dates in the order results are returned.
    pub dates: Vec<ServiceDateInput>,
    /// Length of each offered window.
    pub duration: TimeDelta,
    /// Earliest bookable instant.
    pub start: DateTime<Utc>,
    /// Latest bookable instant, when limited.
    pub limit_end: Option<DateTime<Utc>>,
}

/// Clamp `instant` into `[min, max]`, ignoring absent bounds.
#[must_use]
pub fn clamp_time(
    instant: DateTime<Utc>,
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match (min, max) {
        (Some(lower), _) if instant < lower => lower,
        (_, Some(upper)) if instant > upper => upper,
        _ => instant,
    }
}

fn round_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_round(TimeDelta::hours(1))
        .unwrap_or(instant)
}

/// Candidate windows between `start` and `end`, both rounded to the hour.
///
/// The whole span comes first, followed by one window of `duration` per hour
/// until a window would end after `end`.
#[must_use]
pub fn possible_time_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration: TimeDelta,
) -> Vec<UtcTimeWindow> {
    let span_start = round_to_hour(start);
    let span_end = round_to_hour(end);
    let mut windows = vec![UtcTimeWindow::new(span_start, span_end)];
    let mut current = span_start;
    while current < span_end {
        let window_end = current + duration;
        if window_end > span_end {
            break;
        }
        windows.push(UtcTimeWindow::new(current, window_end));
        current += TimeDelta::hours(1);
    }
    windows
}

/// Valid with no hard violations, leaving only probes or pinned visits
/// unassigned.
#[must_use]
pub fn is_feasible_solution(solution: &VrpSolution, probe_ids: &[i64]) -> bool {
    let score = &solution.score;
    score.is_valid
        && score.hard_score == 0
        && solution
            .description
            .unassigned_visits
            .iter()
            .all(|visit| visit.pinned || probe_ids.contains(&visit.visit_id))
}

/// Window of `duration` centred on `arrival`, kept within the bookable span
/// and rounded to the hour.
#[must_use]
pub fn recommended_time_window(
    duration: TimeDelta,
    arrival: DateTime<Utc>,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> UtcTimeWindow {
    let start = (arrival - duration / 2).max(earliest);
    let end = (start + duration).min(latest);
    UtcTimeWindow::new(round_to_hour(start), round_to_hour(end))
}

fn utc(timestamp_sec: i64) -> Result<DateTime<Utc>, AvailabilityError> {
    DateTime::from_timestamp(timestamp_sec, 0)
        .ok_or(AvailabilityError::InvalidTimestamp { timestamp_sec })
}

struct DatePlan {
    probe_ids: Vec<i64>,
    windows: Vec<(i64, TimeWindowAvailability)>,
    open_hours_end: DateTime<Utc>,
    solve_params: SolveVrpParams,
}

fn plan_date(
    input: &ServiceDateInput,
    params: &TimeWindowAvailabilityParams,
) -> Result<Option<DatePlan>, AvailabilityError> {
    let Some(vrp_data) = input.vrp_data.as_ref() else {
        return Ok(None);
    };
    let Some(check) = vrp_data.check_feasibility_data.as_ref() else {
        return Ok(None);
    };
    let [template] = check.visits.as_slice() else {
        return Err(AvailabilityError::UnexpectedVisitCount {
            count: check.visits.len(),
        });
    };
    let [location] = check.locations.as_slice() else {
        return Err(AvailabilityError::UnexpectedLocationCount {
            count: check.locations.len(),
        });
    };

    let open_start = utc(vrp_data.open_hours.start_timestamp_sec)?;
    let open_end = utc(vrp_data.open_hours.end_timestamp_sec)?;
    let start = clamp_time(params.start, Some(open_start), None);
    let end = clamp_time(open_end, Some(open_start), params.limit_end);

    let mut request = input.solve_input.request.clone();
    let mut probe_ids = Vec::new();
    let mut windows = Vec::new();
    for (window, ordinal) in possible_time_windows(start, end, params.duration)
        .into_iter()
        .zip(1_i64..)
    {
        let probe_id = -ordinal;
        let mut probe = template.clone();
        probe.id = probe_id;
        probe.location_id = location.id;
        probe.arrival_time_window = Some(window.to_vrp());
        probe.overlap_set_key = Some(TIME_WINDOW_SET_KEY.to_owned());
        request.problem.description.visits.push(probe);
        probe_ids.push(probe_id);
        windows.push((
            probe_id,
            TimeWindowAvailability {
                time_window: window,
                status: TimeWindowStatus::Unavailable,
            },
        ));
    }

    let solve_params = SolveVrpParams::new(
        OptimizerRunType::FeasibilityCheck,
        request,
        input.solve_input.optimizer_run.clone(),
    )
    .with_optimizer_settings(input.solve_input.optimizer_settings.clone())
    .with_write_to_database(true);

    Ok(Some(DatePlan {
        probe_ids,
        windows,
        open_hours_end: open_end,
        solve_params,
    }))
}

async fn solve_plan(
    plan: Option<&DatePlan>,
    solver: &dyn FeasibilitySolver,
) -> Result<Option<WrappedSolveVrpResponse>, SolveError> {
    let Some(plan) = plan else {
        return Ok(None);
    };
    let mut responses = solver.solve_vrp(plan.solve_params.clone()).await?;
    responses
        .recv()
        .await
        .map(Some)
        .ok_or(SolveError::EmptyResponse)
}

fn offered_windows(
    mut plan: DatePlan,
    solution: &VrpSolution,
    params: &TimeWindowAvailabilityParams,
) -> Vec<TimeWindowAvailability> {
    let mut recommended = None;
    let stops = solution
        .description
        .shift_teams
        .iter()
        .filter_map(|team| team.route.as_ref())
        .flat_map(|route| route.stops.iter());
    for stop in stops {
        let RouteStop::Visit {
            visit_id,
            arrival_timestamp_sec,
            ..
        } = stop
        else {
            continue;
        };
        let Some((_, availability)) = plan.windows.iter_mut().find(|(id, _)| id == visit_id)
        else {
            continue;
        };
        availability.status = TimeWindowStatus::Available;
        if *visit_id == RECOMMENDED_PROBE_ID {
            let Some(arrival) = DateTime::from_timestamp(*arrival_timestamp_sec, 0) else {
                log::warn!("ignoring recommended probe arrival {arrival_timestamp_sec}");
                continue;
            };
            let window = recommended_time_window(
                params.duration,
                arrival,
                params.start,
                plan.open_hours_end,
            );
            availability.status = TimeWindowStatus::Recommended;
            availability.time_window = window;
            recommended = Some(window);
        }
    }

    plan.windows
        .into_iter()
        .map(|(_, availability)| availability)
        .filter(|availability| {
            recommended.is_none_or(|window| {
                availability.status == TimeWindowStatus::Recommended
                    || !availability.time_window.same_hours(&window)
            })
        })
        .collect()
}

/// Offered arrival windows for the check visit on each date.
///
/// Dates are solved concurrently. A date whose problem has no check visit, or
/// whose solution is infeasible, is returned without windows.
///
/// # Errors
///
/// Returns [`AvailabilityError::UnexpectedVisitCount`] or
/// [`AvailabilityError::UnexpectedLocationCount`] when a date's check data is
/// not a single visit at a single location, and [`AvailabilityError::Solve`]
/// when any date cannot be solved.
pub async fn time_window_availabilities(
    params: &TimeWindowAvailabilityParams,
    solver: &dyn FeasibilitySolver,
) -> Result<Vec<ServiceDateAvailability>, AvailabilityError> {
    let plans = params
        .dates
        .iter()
        .map(|input| plan_date(input, params))
        .collect::<Result<Vec<_>, _>>()?;
    let responses =
        try_join_all(plans.iter().map(|plan| solve_plan(plan.as_ref(), solver))).await?;

    Ok(params
        .dates
        .iter()
        .zip(plans.into_iter().zip(responses))
        .map(|(input, outcome)| {
            let time_windows = match outcome {
                (Some(plan), Some(wrapped))
                    if is_feasible_solution(&wrapped.response.solution, &plan.probe_ids) =>
                {
                    offered_windows(plan, &wrapped.response.solution, params)
                }
                _ => {
                    log::debug!("no time windows offered on {}", input.service_date);
                    Vec::new()
                }
            };
            ServiceDateAvailability {
                service_date: input.service_date,
                time_windows,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dispatch_core::{UnassignedVisit, VrpDescription, VrpScore};
    use rstest::rstest;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 1, hour, minute, 0)
            .single()
            .expect("valid instant")
    }

    fn window(start_hour: u32, end_hour: u32) -> UtcTimeWindow {
        UtcTimeWindow::new(at(start_hour, 0), at(end_hour, 0))
    }

    #[rstest]
    #[case::exact(at(7, 0))]
    #[case::rounds_down(at(7, 15))]
    #[case::just_under_half(at(6, 31))]
    fn windows_cover_each_hour_after_the_whole_span(#[case] start: DateTime<Utc>) {
        let windows = possible_time_windows(start, at(15, 0), TimeDelta::hours(4));
        assert_eq!(
            windows,
            vec![
                window(7, 15),
                window(7, 11),
                window(8, 12),
                window(9, 13),
                window(10, 14),
                window(11, 15),
            ]
        );
    }

    #[rstest]
    fn half_hour_rounds_up() {
        let windows = possible_time_windows(at(6, 30), at(9, 30), TimeDelta::hours(2));
        assert_eq!(windows, vec![window(7, 10), window(7, 9), window(8, 10)]);
    }

    #[rstest]
    fn span_shorter_than_duration_offers_only_the_span() {
        let windows = possible_time_windows(at(8, 0), at(10, 0), TimeDelta::hours(4));
        assert_eq!(windows, vec![window(8, 10)]);
    }

    #[rstest]
    #[case::below(at(6, 0), at(8, 0))]
    #[case::within(at(9, 0), at(9, 0))]
    #[case::above(at(18, 0), at(16, 0))]
    fn clamps_into_bounds(#[case] instant: DateTime<Utc>, #[case] expected: DateTime<Utc>) {
        assert_eq!(clamp_time(instant, Some(at(8, 0)), Some(at(16, 0))), expected);
    }

    #[rstest]
    fn clamp_ignores_missing_bounds() {
        assert_eq!(clamp_time(at(3, 0), None, None), at(3, 0));
    }

    #[rstest]
    #[case::centred(at(12, 0), window(10, 14))]
    #[case::early_arrival(at(8, 30), window(8, 12))]
    #[case::late_arrival(at(15, 0), window(13, 16))]
    fn recommended_window_stays_in_span(
        #[case] arrival: DateTime<Utc>,
        #[case] expected: UtcTimeWindow,
    ) {
        let recommended =
            recommended_time_window(TimeDelta::hours(4), arrival, at(8, 0), at(16, 0));
        assert_eq!(recommended, expected);
    }

    fn solution(is_valid: bool, hard_score: i64, unassigned: &[(i64, bool)]) -> VrpSolution {
        VrpSolution {
            score: VrpScore {
                is_valid,
                hard_score,
                ..VrpScore::default()
            },
            description: VrpDescription {
                unassigned_visits: unassigned
                    .iter()
                    .map(|(visit_id, pinned)| UnassignedVisit {
                        visit_id: *visit_id,
                        pinned: *pinned,
                    })
                    .collect(),
                ..VrpDescription::default()
            },
        }
    }

    #[rstest]
    #[case::clean(solution(true, 0, &[]), true)]
    #[case::invalid(solution(false, 0, &[]), false)]
    #[case::hard_violation(solution(true, 5, &[]), false)]
    #[case::unassigned_probe(solution(true, 0, &[(-2, false)]), true)]
    #[case::unassigned_pinned(solution(true, 0, &[(40, true)]), true)]
    #[case::unassigned_real_visit(solution(true, 0, &[(40, false)]), false)]
    fn feasibility_tolerates_probes_and_pinned_visits(
        #[case] candidate: VrpSolution,
        #[case] expected: bool,
    ) {
        assert_eq!(is_feasible_solution(&candidate, &[-1, -2, -3]), expected);
    }
}
