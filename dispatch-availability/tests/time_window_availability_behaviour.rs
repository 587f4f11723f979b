//! Behavioural tests for [`time_window_availabilities`].
//!
//! The scripted optimizer answers each request by routing every probe visit
//! found in it, or by reporting a hard violation.

use std::cell::RefCell;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use dispatch_availability::{
    AvailabilityError, ServiceDateAvailability, ServiceDateInput, TimeWindowAvailabilityParams,
    TimeWindowStatus, time_window_availabilities,
};
use dispatch_core::test_support::{ScriptedOptimizer, scored_response};
use dispatch_core::{
    CheckFeasibilityData, Location, NewOptimizerRun, RouteStop, ServiceRegionVrpData, ShiftTeam,
    ShiftTeamRoute, SolveVrpRequest, TimeWindow, Visit,
};
use dispatch_solver::{SolveVrpInput, VrpSolver};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

const HOUR_SEC: i64 = 3_600;

type Outcome = RefCell<Option<Result<Vec<ServiceDateAvailability>, AvailabilityError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptimizerBehaviour {
    PlaceProbes,
    HardViolation,
}

#[derive(Debug, Clone)]
struct Setup {
    open_start_hour: u32,
    open_end_hour: u32,
    dates: u32,
    duration_hours: i64,
    behaviour: OptimizerBehaviour,
    template_visits: usize,
    date_without_check: Option<usize>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            open_start_hour: 8,
            open_end_hour: 16,
            dates: 1,
            duration_hours: 4,
            behaviour: OptimizerBehaviour::PlaceProbes,
            template_visits: 1,
            date_without_check: None,
        }
    }
}

#[fixture]
fn setup() -> RefCell<Setup> {
    RefCell::new(Setup::default())
}

#[fixture]
fn outcome() -> Outcome {
    RefCell::new(None)
}

#[fixture]
fn calls() -> RefCell<usize> {
    RefCell::new(0)
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).expect("valid date")
}

fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).expect("valid time"))
}

fn routed_probes(request: &SolveVrpRequest) -> ShiftTeamRoute {
    let stops = request
        .problem
        .description
        .visits
        .iter()
        .filter(|visit| visit.id < 0)
        .filter_map(|visit| {
            visit.arrival_time_window.map(|window| RouteStop::Visit {
                visit_id: visit.id,
                arrival_timestamp_sec: window.start_timestamp_sec + 2 * HOUR_SEC,
                pinned: false,
            })
        })
        .collect();
    ShiftTeamRoute { stops }
}

fn optimizer(behaviour: OptimizerBehaviour) -> ScriptedOptimizer {
    ScriptedOptimizer::with_responder(move |request| {
        let response = match behaviour {
            OptimizerBehaviour::HardViolation => scored_response(true, 10, 0),
            OptimizerBehaviour::PlaceProbes => {
                let mut response = scored_response(true, 0, 0);
                response.solution.description.shift_teams = vec![ShiftTeam {
                    id: 1,
                    depot_location_id: 1,
                    available_time_window: TimeWindow::new(0, 0),
                    attributes: Vec::new(),
                    route: Some(routed_probes(request)),
                }];
                response
            }
        };
        Ok(vec![Ok(response)])
    })
}

fn date_input(setup: &Setup, index: usize, date: NaiveDate) -> ServiceDateInput {
    let open_hours = TimeWindow::new(
        at(date, setup.open_start_hour).timestamp(),
        at(date, setup.open_end_hour).timestamp(),
    );
    let check = (setup.date_without_check != Some(index)).then(|| CheckFeasibilityData {
        visits: (0..setup.template_visits)
            .map(|_| Visit {
                service_duration_sec: 1_800,
                ..Visit::default()
            })
            .collect(),
        locations: vec![Location {
            id: 3,
            latitude_e6: 0,
            longitude_e6: 0,
        }],
    });
    ServiceDateInput {
        service_date: date,
        vrp_data: Some(ServiceRegionVrpData {
            service_region_id: 1,
            service_date: date,
            open_hours,
            snapshot_timestamp_sec: open_hours.start_timestamp_sec,
            check_feasibility_data: check,
            capacity_settings: Vec::new(),
            horizon_day: None,
        }),
        solve_input: SolveVrpInput {
            request: SolveVrpRequest::default(),
            optimizer_run: NewOptimizerRun {
                service_region_id: 1,
                service_date: date,
                open_hours,
                earliest_distance_timestamp_sec: 0,
                latest_distance_timestamp_sec: 0,
                snapshot_timestamp_sec: 0,
                optimizer_config_id: 1,
                service_version: "test".to_owned(),
            },
            optimizer_settings: None,
        },
    }
}

fn availability_for(outcome: &Outcome, date_number: usize) -> ServiceDateAvailability {
    let borrowed = outcome.borrow();
    let dates = match borrowed.as_ref() {
        Some(Ok(dates)) => dates,
        other => panic!("expected availabilities, got {other:?}"),
    };
    dates
        .get(date_number - 1)
        .cloned()
        .expect("date present in results")
}

// --- Given steps ---

#[given("open hours from {start} to {end} on {count} dates")]
fn open_hours(#[from(setup)] setup: &RefCell<Setup>, start: u32, end: u32, count: u32) {
    let mut current = setup.borrow_mut();
    current.open_start_hour = start;
    current.open_end_hour = end;
    current.dates = count;
}

#[given("a window length of {hours} hours")]
fn window_length(#[from(setup)] setup: &RefCell<Setup>, hours: i64) {
    setup.borrow_mut().duration_hours = hours;
}

#[given("an optimizer that places every probe two hours into its window")]
fn placing_optimizer(#[from(setup)] setup: &RefCell<Setup>) {
    setup.borrow_mut().behaviour = OptimizerBehaviour::PlaceProbes;
}

#[given("an optimizer that reports a hard violation")]
fn violating_optimizer(#[from(setup)] setup: &RefCell<Setup>) {
    setup.borrow_mut().behaviour = OptimizerBehaviour::HardViolation;
}

#[given("date {number} has no check data")]
fn missing_check(#[from(setup)] setup: &RefCell<Setup>, number: usize) {
    setup.borrow_mut().date_without_check = Some(number - 1);
}

#[given("the check data holds two template visits")]
fn two_templates(#[from(setup)] setup: &RefCell<Setup>) {
    setup.borrow_mut().template_visits = 2;
}

// --- When steps ---

#[when("time-window availability is computed")]
fn compute(
    #[from(setup)] setup: &RefCell<Setup>,
    #[from(outcome)] outcome: &Outcome,
    #[from(calls)] calls: &RefCell<usize>,
) {
    let current = setup.borrow().clone();
    let dates = (0..current.dates)
        .map(|offset| {
            let date = base_date() + Days::new(u64::from(offset));
            let index = usize::try_from(offset).expect("small offset");
            date_input(&current, index, date)
        })
        .collect();
    let params = TimeWindowAvailabilityParams {
        dates,
        duration: TimeDelta::hours(current.duration_hours),
        start: at(base_date(), current.open_start_hour),
        limit_end: None,
    };
    let client = Arc::new(optimizer(current.behaviour));
    let solver = VrpSolver::new(client.clone());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds");
    let result = runtime.block_on(time_window_availabilities(&params, &solver));
    *calls.borrow_mut() = client.call_count();
    *outcome.borrow_mut() = Some(result);
}

// --- Then steps ---

#[then("every date offers {count} windows")]
fn every_date_offers(#[from(outcome)] outcome: &Outcome, count: usize) {
    let borrowed = outcome.borrow();
    let Some(Ok(dates)) = borrowed.as_ref() else {
        panic!("expected availabilities, got {borrowed:?}");
    };
    assert!(!dates.is_empty());
    for date in dates {
        assert_eq!(date.time_windows.len(), count, "windows on {}", date.service_date);
    }
}

#[then("date {number} offers {count} windows")]
fn date_offers(#[from(outcome)] outcome: &Outcome, number: usize, count: usize) {
    assert_eq!(availability_for(outcome, number).time_windows.len(), count);
}

#[then("date {number} offers nothing")]
fn date_offers_none(#[from(outcome)] outcome: &Outcome, number: usize) {
    assert!(availability_for(outcome, number).time_windows.is_empty());
}

#[then("the first window runs from {start} to {end} and is recommended")]
fn first_window(#[from(outcome)] outcome: &Outcome, start: u32, end: u32) {
    let borrowed = outcome.borrow();
    let Some(Ok(dates)) = borrowed.as_ref() else {
        panic!("expected availabilities, got {borrowed:?}");
    };
    for date in dates {
        let first = date.time_windows.first().expect("a window is offered");
        assert_eq!(first.status, TimeWindowStatus::Recommended);
        assert_eq!(first.time_window.start, at(date.service_date, start));
        assert_eq!(first.time_window.end, at(date.service_date, end));
    }
}

#[then("the other windows are available and start hourly from {hour}")]
fn other_windows(#[from(outcome)] outcome: &Outcome, hour: u32) {
    let borrowed = outcome.borrow();
    let Some(Ok(dates)) = borrowed.as_ref() else {
        panic!("expected availabilities, got {borrowed:?}");
    };
    for date in dates {
        let starts: Vec<u32> = date
            .time_windows
            .iter()
            .skip(1)
            .inspect(|window| assert_eq!(window.status, TimeWindowStatus::Available))
            .map(|window| window.time_window.start.hour())
            .collect();
        let expected: Vec<u32> = (hour..).take(starts.len()).collect();
        assert_eq!(starts, expected);
    }
}

#[then("the optimizer was called {count} time")]
fn optimizer_calls(#[from(calls)] calls: &RefCell<usize>, count: usize) {
    assert_eq!(*calls.borrow(), count);
}

#[then("the computation fails because of the visit count")]
fn fails_on_visit_count(#[from(outcome)] outcome: &Outcome) {
    let borrowed = outcome.borrow();
    assert!(
        matches!(
            borrowed.as_ref(),
            Some(Err(AvailabilityError::UnexpectedVisitCount { count: 2 }))
        ),
        "expected UnexpectedVisitCount, got {borrowed:?}"
    );
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($fn_name:ident, $title:literal) => {
        #[scenario(path = "tests/features/time_window_availability.feature", name = $title)]
        fn $fn_name(setup: RefCell<Setup>, outcome: Outcome, calls: RefCell<usize>) {
            let _ = (setup, outcome, calls);
        }
    };
}

register_scenario!(all_placed, "every probe is placed");
register_scenario!(infeasible_date, "an infeasible date offers nothing");
register_scenario!(missing_check_data, "a date without check data is skipped");
register_scenario!(ambiguous_check_data, "ambiguous check data is rejected");
