//! Behavioural tests for [`add_unrequested_rest_breaks`].

use std::cell::RefCell;

use dispatch_core::store::add_unrequested_rest_breaks;
use dispatch_core::{RestBreak, ShiftTeam, TimeWindow, UnrequestedRestBreakConfig, VrpDescription};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[fixture]
fn description() -> RefCell<VrpDescription> {
    RefCell::new(VrpDescription::default())
}

// --- Given steps ---

#[given("a shift team working from {start} to {end}")]
fn shift_team(#[from(description)] description: &RefCell<VrpDescription>, start: i64, end: i64) {
    description.borrow_mut().shift_teams.push(ShiftTeam {
        id: 1,
        depot_location_id: 1,
        available_time_window: TimeWindow::new(start, end),
        attributes: Vec::new(),
        route: None,
    });
}

#[given("the description was captured at {now}")]
fn captured_at(#[from(description)] description: &RefCell<VrpDescription>, now: i64) {
    description.borrow_mut().current_timestamp_sec = Some(now);
}

#[given("the team requested a break")]
fn requested_break(#[from(description)] description: &RefCell<VrpDescription>) {
    description.borrow_mut().rest_breaks.push(RestBreak {
        id: 7,
        shift_team_id: 1,
        location_id: Some(1),
        start_timestamp_sec: Some(4_000),
        duration_sec: 900,
        unrequested: false,
    });
}

// --- When steps ---

#[when("unrequested rest breaks are added")]
fn add_breaks(#[from(description)] description: &RefCell<VrpDescription>) {
    add_unrequested_rest_breaks(
        &mut description.borrow_mut(),
        UnrequestedRestBreakConfig::default(),
    );
}

// --- Then steps ---

#[then("the rest break count is {count}")]
fn break_count(#[from(description)] description: &RefCell<VrpDescription>, count: usize) {
    assert_eq!(description.borrow().rest_breaks.len(), count);
}

#[then("no break is marked unrequested")]
fn none_unrequested(#[from(description)] description: &RefCell<VrpDescription>) {
    assert!(
        description
            .borrow()
            .rest_breaks
            .iter()
            .all(|rest_break| !rest_break.unrequested)
    );
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($fn_name:ident, $title:literal) => {
        #[scenario(path = "tests/features/unrequested_rest_breaks.feature", name = $title)]
        fn $fn_name(description: RefCell<VrpDescription>) {
            let _ = description;
        }
    };
}

register_scenario!(adding_break_early, "adding a break early in the shift");
register_scenario!(skipping_late_break, "skipping a break that no longer fits");
register_scenario!(keeping_requested_break, "keeping a requested break");
