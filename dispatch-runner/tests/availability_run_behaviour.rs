//! Behavioural tests for availability runs over an in-memory region.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dispatch_core::test_support::{
    MemoryRegionStore, RegionFixture, ScriptedOptimizer, StaticSettingsService, scored_response,
};
use dispatch_core::{
    AllSettings, Attribute, AvailabilityAttribute, AvailabilitySettings,
    AvailabilitySettingsConfig, CheckFeasibilityData, Location, OptimizerConfig,
    OptimizerSettings, ServiceRegion, ShiftTeam, SolveVrpRequest, TimeWindow, Visit,
    VrpDescription,
};
use dispatch_runner::{RunResult, Runner, RunnerError};
use dispatch_solver::VrpSolver;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

const REGION_ID: i64 = 5;
const OPEN_START: i64 = 1_717_250_400;
const OPEN_END: i64 = OPEN_START + 8 * 3_600;

struct RunOutcome {
    result: Result<Option<RunResult>, RunnerError>,
    requests: Vec<SolveVrpRequest>,
    stored_sets: usize,
}

type OutcomeCell = RefCell<Option<RunOutcome>>;

#[fixture]
fn region() -> RefCell<RegionFixture> {
    RefCell::new(RegionFixture::default())
}

#[fixture]
fn config() -> RefCell<Option<AvailabilitySettingsConfig>> {
    RefCell::new(None)
}

#[fixture]
fn outcome() -> OutcomeCell {
    RefCell::new(None)
}

fn location(id: i64) -> Location {
    Location {
        id,
        latitude_e6: 39_739_236,
        longitude_e6: -104_990_251,
    }
}

fn snapshot() -> DateTime<Utc> {
    Utc.timestamp_opt(OPEN_START, 0)
        .single()
        .expect("valid instant")
}

fn last_request(outcome: &OutcomeCell) -> SolveVrpRequest {
    outcome
        .borrow()
        .as_ref()
        .and_then(|run| run.requests.last().cloned())
        .expect("the optimizer should have been called")
}

// --- Given steps ---

#[given("a region with two check locations and one scheduled visit")]
fn region_with_visit(#[from(region)] region: &RefCell<RegionFixture>) {
    let visit = Visit {
        id: 1,
        location_id: 20,
        arrival_time_window: Some(TimeWindow::new(OPEN_START, OPEN_END)),
        service_duration_sec: 1_800,
        ..Visit::default()
    };
    *region.borrow_mut() = RegionFixture {
        regions: BTreeMap::from([(
            REGION_ID,
            ServiceRegion {
                id: REGION_ID,
                name: "Denver".to_owned(),
                iana_time_zone_name: "America/Denver".to_owned(),
            },
        )]),
        has_new_schedule: true,
        open_hours: TimeWindow::new(OPEN_START, OPEN_END),
        description: VrpDescription {
            shift_teams: vec![ShiftTeam {
                id: 1,
                depot_location_id: 10,
                available_time_window: TimeWindow::new(OPEN_START, OPEN_END),
                attributes: Vec::new(),
                route: None,
            }],
            visits: vec![visit.clone()],
            locations: vec![location(10), location(20)],
            ..VrpDescription::default()
        },
        check_feasibility_data: Some(CheckFeasibilityData {
            visits: vec![visit],
            locations: vec![location(30), location(31)],
        }),
        attributes: vec![
            Attribute {
                id: 1,
                name: "service_name:acute".to_owned(),
            },
            Attribute {
                id: 2,
                name: "service_name:bridge".to_owned(),
            },
        ],
        ..RegionFixture::default()
    };
}

#[given("availability settings probing two service names")]
fn two_service_names(#[from(config)] config: &RefCell<Option<AvailabilitySettingsConfig>>) {
    *config.borrow_mut() = Some(AvailabilitySettingsConfig {
        service_region_id: REGION_ID,
        settings: AvailabilitySettings {
            attributes: vec![AvailabilityAttribute {
                name: "service_name".to_owned(),
                variants: vec!["acute".to_owned(), "bridge".to_owned()],
            }],
            min_visit_duration_sec: 900,
            max_visit_duration_sec: 1_800,
            optimizer_config_id: 3,
            ..AvailabilitySettings::default()
        },
        optimizer_settings: OptimizerSettings::default(),
        optimizer_config: OptimizerConfig {
            id: 3,
            termination_duration_ms: 1_000,
            ..OptimizerConfig::default()
        },
    });
}

#[given("the service name variant {variant} is configured")]
fn extra_variant(
    #[from(config)] config: &RefCell<Option<AvailabilitySettingsConfig>>,
    variant: String,
) {
    let mut guard = config.borrow_mut();
    let settings = guard.as_mut().expect("settings must be initialised");
    if let Some(category) = settings.settings.attributes.first_mut() {
        category.variants.push(variant);
    }
}

#[given("late availability visits are allowed")]
fn late_allowed(#[from(config)] config: &RefCell<Option<AvailabilitySettingsConfig>>) {
    let mut guard = config.borrow_mut();
    let settings = guard.as_mut().expect("settings must be initialised");
    settings.settings.allow_late_availability_visits = true;
}

#[given("no schedule was written since the last availability run")]
fn no_new_schedule(#[from(region)] region: &RefCell<RegionFixture>) {
    region.borrow_mut().has_new_schedule = false;
}

// --- When steps ---

#[when("the availability run executes {count} times")]
fn run_availability(
    #[from(region)] region: &RefCell<RegionFixture>,
    #[from(config)] config: &RefCell<Option<AvailabilitySettingsConfig>>,
    #[from(outcome)] outcome: &OutcomeCell,
    count: usize,
) {
    let guard = config.borrow();
    let config = guard.as_ref().expect("settings must be initialised");
    let store = Arc::new(MemoryRegionStore::new(region.borrow().clone()));
    let optimizer = Arc::new(ScriptedOptimizer::with_responses(vec![scored_response(
        true, 0, 0,
    )]));
    let solver = VrpSolver::new(optimizer.clone()).with_store(store.clone());
    let runner = Runner::new(
        store.clone(),
        Arc::new(StaticSettingsService::new(AllSettings::default())),
        Arc::new(solver),
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds");

    let mut result = Ok(None);
    for _ in 0..count {
        result = runtime.block_on(runner.run_availability(
            config,
            snapshot().date_naive(),
            snapshot(),
            Some(0),
        ));
    }
    *outcome.borrow_mut() = Some(RunOutcome {
        result,
        requests: optimizer.requests(),
        stored_sets: store.with_fixture(|fixture| fixture.added_visit_sets),
    });
}

// --- Then steps ---

#[then("the optimizer received {count} visits")]
fn then_visit_count(#[from(outcome)] outcome: &OutcomeCell, count: usize) {
    assert_eq!(last_request(outcome).problem.description.visits.len(), count);
}

#[then("the scheduled visit outranks every probe")]
fn then_priorities(#[from(outcome)] outcome: &OutcomeCell) {
    let request = last_request(outcome);
    let visits = &request.problem.description.visits;
    let scheduled = visits
        .iter()
        .find(|visit| visit.id == 1)
        .expect("scheduled visit present");
    assert_eq!(
        scheduled
            .priority
            .map(|priority| priority.unassigned_priority_level),
        Some(1)
    );
    assert!(
        visits
            .iter()
            .filter(|visit| visit.id < 0)
            .all(|probe| probe.priority.is_none())
    );
}

#[then("every probe is barred from late depot arrival")]
fn then_probes_barred(#[from(outcome)] outcome: &OutcomeCell) {
    let request = last_request(outcome);
    let mut probe_ids: Vec<i64> = request
        .problem
        .description
        .visits
        .iter()
        .map(|visit| visit.id)
        .filter(|id| *id < 0)
        .collect();
    probe_ids.sort_unstable();
    let mut barred = request
        .config
        .constraint_config
        .and_then(|config| config.depot_late_arrival)
        .map(|depot| depot.disallowed_late_arrival_visit_ids)
        .unwrap_or_default();
    barred.sort_unstable();
    assert_eq!(barred, probe_ids);
}

#[then("no probe is barred from late depot arrival")]
fn then_none_barred(#[from(outcome)] outcome: &OutcomeCell) {
    let barred = last_request(outcome)
        .config
        .constraint_config
        .and_then(|config| config.depot_late_arrival)
        .map(|depot| depot.disallowed_late_arrival_visit_ids)
        .unwrap_or_default();
    assert!(barred.is_empty());
}

#[then("{count} probe sets were stored")]
fn then_sets_stored(#[from(outcome)] outcome: &OutcomeCell, count: usize) {
    let borrowed = outcome.borrow();
    let run = borrowed.as_ref().expect("run must have executed");
    assert_eq!(run.stored_sets, count);
}

#[then("the run was skipped")]
fn then_skipped(#[from(outcome)] outcome: &OutcomeCell) {
    let borrowed = outcome.borrow();
    let run = borrowed.as_ref().expect("run must have executed");
    assert!(matches!(run.result, Ok(None)), "expected a skipped run");
    assert!(run.requests.is_empty());
}

#[then("the run fails naming {name}")]
fn then_missing_attribute(#[from(outcome)] outcome: &OutcomeCell, name: String) {
    let borrowed = outcome.borrow();
    let run = borrowed.as_ref().expect("run must have executed");
    match &run.result {
        Err(RunnerError::MissingAttributes { names }) => assert_eq!(names, &[name]),
        other => panic!("expected missing attributes, got {:?}", other.as_ref().err()),
    }
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($fn_name:ident, $title:literal) => {
        #[scenario(path = "tests/features/availability_run.feature", name = $title)]
        fn $fn_name(
            region: RefCell<RegionFixture>,
            config: RefCell<Option<AvailabilitySettingsConfig>>,
            outcome: OutcomeCell,
        ) {
            let _ = (region, config, outcome);
        }
    };
}

register_scenario!(probes_injected, "probes are injected into the region problem");
register_scenario!(probes_reused, "an unchanged probe set is reused");
register_scenario!(late_probes_allowed, "late probes may be allowed");
register_scenario!(nothing_new, "nothing new since the last availability run");
register_scenario!(unknown_variants, "unknown attribute variants are rejected");
