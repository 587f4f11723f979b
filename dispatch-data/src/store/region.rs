//! Region snapshots and the problems built from them.

use chrono::{NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use dispatch_core::{
    CapacitySettings, CheckFeasibilityData, CheckFeasibilityDiagnostics, CheckFeasibilityVisit,
    Location, NewInfo, NewInfoParams, NewOptimizerRun, OptimizerConfig, ServiceRegion,
    ServiceRegionVrpData, ServiceRegionVrpDataParams, StoreError, TimeWindow, Visit,
    VrpDescription, VrpProblem, VrpProblemData, VrpProblemParams, store::add_unrequested_rest_breaks,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::runs::{format_date, last_schedule_run, latest_schedule};
use super::{backend, serialization};

/// Id of the template visit returned with check-feasibility data.
///
/// Callers clone the template and assign their own ids before injecting it.
pub const CHECK_FEASIBILITY_TEMPLATE_VISIT_ID: i64 = 0;

/// Region state captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    /// Region.
    pub service_region_id: i64,
    /// Date the snapshot plans for.
    pub service_date: NaiveDate,
    /// Capture time.
    pub snapshot_timestamp_sec: i64,
    /// Region open hours on the date.
    pub open_hours: TimeWindow,
    /// Teams, visits and current routes.
    pub description: VrpDescription,
    /// Canonical locations used for feasibility checks and probes.
    #[serde(default)]
    pub check_locations: Vec<Location>,
}

struct SnapshotRow {
    snapshot_timestamp_sec: i64,
    open_hours: TimeWindow,
    description: String,
    check_locations: String,
}

impl SnapshotRow {
    fn description(&self) -> Result<VrpDescription, StoreError> {
        serde_json::from_str(&self.description).map_err(serialization("region description"))
    }

    fn check_locations(&self) -> Result<Vec<Location>, StoreError> {
        serde_json::from_str(&self.check_locations).map_err(serialization("check locations"))
    }
}

pub(super) fn upsert_service_region(
    connection: &mut Connection,
    region: &ServiceRegion,
) -> Result<(), StoreError> {
    connection
        .execute(
            "INSERT INTO service_regions (id, name, iana_time_zone_name) VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    iana_time_zone_name = excluded.iana_time_zone_name",
            params![region.id, region.name, region.iana_time_zone_name],
        )
        .map(|_| ())
        .map_err(backend("upsert service region"))
}

pub(super) fn upsert_optimizer_config(
    connection: &mut Connection,
    config: &OptimizerConfig,
) -> Result<(), StoreError> {
    connection
        .execute(
            "INSERT INTO optimizer_configs (
                id, config_version, termination_duration_ms, per_visit_revenue_usd_cents,
                app_hourly_cost_usd_cents, dhmt_hourly_cost_usd_cents,
                include_intermediate_infeasible_solutions
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                config_version = excluded.config_version,
                termination_duration_ms = excluded.termination_duration_ms,
                per_visit_revenue_usd_cents = excluded.per_visit_revenue_usd_cents,
                app_hourly_cost_usd_cents = excluded.app_hourly_cost_usd_cents,
                dhmt_hourly_cost_usd_cents = excluded.dhmt_hourly_cost_usd_cents,
                include_intermediate_infeasible_solutions =
                    excluded.include_intermediate_infeasible_solutions",
            params![
                config.id,
                config.config_version,
                config.termination_duration_ms,
                config.per_visit_revenue_usd_cents,
                config.app_hourly_cost_usd_cents,
                config.dhmt_hourly_cost_usd_cents,
                config.include_intermediate_infeasible_solutions,
            ],
        )
        .map(|_| ())
        .map_err(backend("upsert optimizer config"))
}

pub(super) fn add_region_snapshot(
    connection: &mut Connection,
    snapshot: &RegionSnapshot,
) -> Result<i64, StoreError> {
    service_region(connection, snapshot.service_region_id)?;
    let description =
        serde_json::to_string(&snapshot.description).map_err(serialization("region description"))?;
    let check_locations = serde_json::to_string(&snapshot.check_locations)
        .map_err(serialization("check locations"))?;
    connection
        .execute(
            "INSERT INTO region_snapshots (
                service_region_id, service_date, snapshot_timestamp_sec,
                open_start_timestamp_sec, open_end_timestamp_sec, description, check_locations
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.service_region_id,
                format_date(snapshot.service_date),
                snapshot.snapshot_timestamp_sec,
                snapshot.open_hours.start_timestamp_sec,
                snapshot.open_hours.end_timestamp_sec,
                description,
                check_locations,
            ],
        )
        .map_err(backend("insert region snapshot"))?;
    Ok(connection.last_insert_rowid())
}

pub(super) fn optimizer_configs_by_ids(
    connection: &mut Connection,
    ids: &[i64],
) -> Result<Vec<OptimizerConfig>, StoreError> {
    let mut statement = connection
        .prepare(
            "SELECT id, config_version, termination_duration_ms, per_visit_revenue_usd_cents,
                app_hourly_cost_usd_cents, dhmt_hourly_cost_usd_cents,
                include_intermediate_infeasible_solutions
                FROM optimizer_configs WHERE id = ?1",
        )
        .map_err(backend("prepare optimizer config query"))?;
    let mut configs = Vec::with_capacity(ids.len());
    for id in ids {
        let found = statement
            .query_row([id], |row| {
                Ok(OptimizerConfig {
                    id: row.get(0)?,
                    config_version: row.get(1)?,
                    termination_duration_ms: row.get(2)?,
                    per_visit_revenue_usd_cents: row.get(3)?,
                    app_hourly_cost_usd_cents: row.get(4)?,
                    dhmt_hourly_cost_usd_cents: row.get(5)?,
                    include_intermediate_infeasible_solutions: row.get(6)?,
                })
            })
            .optional()
            .map_err(backend("query optimizer config"))?;
        configs.extend(found);
    }
    Ok(configs)
}

pub(super) fn service_region(
    connection: &Connection,
    service_region_id: i64,
) -> Result<ServiceRegion, StoreError> {
    connection
        .query_row(
            "SELECT id, name, iana_time_zone_name FROM service_regions WHERE id = ?1",
            [service_region_id],
            |row| {
                Ok(ServiceRegion {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    iana_time_zone_name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(backend("query service region"))?
        .ok_or(StoreError::NotFound {
            what: "service region",
            id: service_region_id,
        })
}

fn time_zone(region: &ServiceRegion) -> Result<Tz, StoreError> {
    region
        .iana_time_zone_name
        .parse()
        .map_err(|_| StoreError::InvalidData {
            message: format!(
                "region {} has unknown time zone {:?}",
                region.id, region.iana_time_zone_name
            ),
        })
}

/// Midnight-to-midnight bounds of `date` in the region's time zone.
fn local_day(time_zone: Tz, date: NaiveDate) -> Result<TimeWindow, StoreError> {
    let midnight = |day: NaiveDate| {
        time_zone
            .from_local_datetime(&day.and_time(NaiveTime::MIN))
            .earliest()
            .map(|instant| instant.timestamp())
    };
    match (midnight(date), date.succ_opt().and_then(midnight)) {
        (Some(start), Some(end)) => Ok(TimeWindow::new(start, end)),
        _ => Err(StoreError::InvalidData {
            message: format!("cannot resolve {date} in {time_zone}"),
        }),
    }
}

/// Newest snapshot for a region and date captured at or before `at_sec`.
fn latest_snapshot(
    connection: &Connection,
    service_region_id: i64,
    service_date: NaiveDate,
    at_sec: i64,
) -> Result<Option<SnapshotRow>, StoreError> {
    connection
        .query_row(
            "SELECT snapshot_timestamp_sec, open_start_timestamp_sec, open_end_timestamp_sec,
                description, check_locations
                FROM region_snapshots
                WHERE service_region_id = ?1 AND service_date = ?2
                    AND snapshot_timestamp_sec <= ?3
                ORDER BY snapshot_timestamp_sec DESC, id DESC LIMIT 1",
            params![service_region_id, format_date(service_date), at_sec],
            |row| {
                Ok(SnapshotRow {
                    snapshot_timestamp_sec: row.get(0)?,
                    open_hours: TimeWindow::new(row.get(1)?, row.get(2)?),
                    description: row.get(3)?,
                    check_locations: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(backend("query region snapshot"))
}

pub(super) fn has_new_info_since_last_run(
    connection: &mut Connection,
    params: NewInfoParams,
) -> Result<NewInfo, StoreError> {
    let region = service_region(connection, params.service_region_id)?;
    let time_zone = time_zone(&region)?;
    let snapshot = latest_snapshot(
        connection,
        params.service_region_id,
        params.service_date,
        params.latest_snapshot_timestamp_sec,
    )?;
    let last_run = last_schedule_run(connection, params.service_region_id, params.service_date)?;
    let has_new_info = match (&snapshot, &last_run) {
        (Some(snapshot), Some(run)) => snapshot.snapshot_timestamp_sec > run.snapshot_timestamp_sec,
        (Some(_), None) => true,
        (None, _) => false,
    };
    Ok(NewInfo {
        has_new_info,
        last_run,
        time_zone,
    })
}

fn template_visit(
    check: &CheckFeasibilityVisit,
    location_id: i64,
    open_hours: TimeWindow,
) -> Visit {
    Visit {
        id: CHECK_FEASIBILITY_TEMPLATE_VISIT_ID,
        location_id,
        arrival_time_window: Some(check.arrival_time_window.unwrap_or(open_hours)),
        service_duration_sec: check.service_duration_sec.unwrap_or_default(),
        required_attributes: check.required_attributes.clone(),
        ..Visit::default()
    }
}

pub(super) fn service_region_vrp_data(
    connection: &mut Connection,
    params: ServiceRegionVrpDataParams,
) -> Result<ServiceRegionVrpData, StoreError> {
    let region = service_region(connection, params.service_region_id)?;
    let snapshot = latest_snapshot(
        connection,
        params.service_region_id,
        params.service_date,
        params.snapshot_timestamp_sec,
    )?;
    let open_hours = match &snapshot {
        Some(row) => row.open_hours,
        None => local_day(time_zone(&region)?, params.service_date)?,
    };

    let check_feasibility_data = match &params.check_feasibility_visit {
        None => None,
        Some(check) => {
            let locations = match (check.location, &snapshot) {
                (Some(location), _) => vec![location],
                (None, Some(row)) => row.check_locations()?,
                (None, None) => Vec::new(),
            };
            locations.first().map(|first| CheckFeasibilityData {
                visits: vec![template_visit(check, first.id, open_hours)],
                locations: locations.clone(),
            })
        }
    };

    Ok(ServiceRegionVrpData {
        service_region_id: params.service_region_id,
        service_date: params.service_date,
        open_hours,
        snapshot_timestamp_sec: params.snapshot_timestamp_sec,
        check_feasibility_data,
        capacity_settings: params.capacity_settings,
        horizon_day: params.horizon_day,
    })
}

/// Shorten the shifts of teams covered by a capacity limit.
///
/// The first matching setting wins. A team offered `p` percent keeps the first
/// `p` percent of its available window.
fn apply_capacity_settings(
    description: &mut VrpDescription,
    settings: &[CapacitySettings],
    horizon_day: Option<u32>,
) {
    let Some(day) = horizon_day else {
        return;
    };
    for team in &mut description.shift_teams {
        let Some(percent) = settings
            .iter()
            .find(|setting| setting.applies_to(&team.attributes))
            .map(|setting| setting.percent_for_horizon_day(day))
        else {
            continue;
        };
        if percent >= 100 {
            continue;
        }
        let window = &mut team.available_time_window;
        let kept = window
            .duration_sec()
            .saturating_mul(i64::from(percent))
            .checked_div(100)
            .unwrap_or_default();
        window.end_timestamp_sec = window.start_timestamp_sec.saturating_add(kept);
    }
}

pub(super) fn create_vrp_problem(
    connection: &mut Connection,
    params: VrpProblemParams,
    service_version: &str,
) -> Result<VrpProblemData, StoreError> {
    let data = params.vrp_data;
    let Some(snapshot) = latest_snapshot(
        connection,
        data.service_region_id,
        data.service_date,
        data.snapshot_timestamp_sec,
    )?
    else {
        return Err(StoreError::EmptyDescription);
    };
    let mut description = snapshot.description()?;
    if description.is_empty() {
        return Err(StoreError::EmptyDescription);
    }
    description
        .current_timestamp_sec
        .get_or_insert(snapshot.snapshot_timestamp_sec);
    apply_capacity_settings(&mut description, &data.capacity_settings, data.horizon_day);

    let check_feasibility_diagnostics = match &data.check_feasibility_data {
        None => None,
        Some(check) => {
            for location in &check.locations {
                if description.location(location.id).is_none() {
                    description.locations.push(*location);
                }
            }
            let latest = latest_schedule(connection, data.service_region_id, data.service_date)?;
            Some(CheckFeasibilityDiagnostics {
                schedule_id: latest.map(|(schedule_id, _)| schedule_id),
                unassigned_visits_diff: latest.map(|(_, diff)| diff).unwrap_or_default(),
            })
        }
    };
    if let Some(config) = params.unrequested_rest_break {
        add_unrequested_rest_breaks(&mut description, config);
    }

    Ok(VrpProblemData {
        problem: VrpProblem { description },
        optimizer_run: NewOptimizerRun {
            service_region_id: data.service_region_id,
            service_date: data.service_date,
            open_hours: data.open_hours,
            earliest_distance_timestamp_sec: params.earliest_distance_timestamp_sec,
            latest_distance_timestamp_sec: data.snapshot_timestamp_sec,
            snapshot_timestamp_sec: snapshot.snapshot_timestamp_sec,
            optimizer_config_id: 0,
            service_version: service_version.to_owned(),
        },
        check_feasibility_diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::{ShiftTeam, TimeWindow};
    use rstest::rstest;

    fn team(attributes: &[&str]) -> ShiftTeam {
        ShiftTeam {
            id: 1,
            depot_location_id: 1,
            available_time_window: TimeWindow::new(0, 36_000),
            attributes: attributes.iter().map(|name| (*name).to_owned()).collect(),
            route: None,
        }
    }

    fn limits() -> Vec<CapacitySettings> {
        vec![CapacitySettings {
            shift_team_attributes: vec!["virtual".to_owned()],
            capacity_percent_for_horizon_days: vec![100, 50, 25],
        }]
    }

    #[rstest]
    #[case(&["virtual"], Some(1), 18_000)]
    #[case(&["virtual"], Some(2), 9_000)]
    #[case(&["virtual"], Some(0), 36_000)]
    #[case(&["virtual"], Some(7), 36_000)]
    #[case(&["virtual"], None, 36_000)]
    #[case(&["acute"], Some(1), 36_000)]
    fn capacity_limits_shorten_matching_shifts(
        #[case] attributes: &[&str],
        #[case] horizon_day: Option<u32>,
        #[case] expected_end: i64,
    ) {
        let mut description = VrpDescription {
            shift_teams: vec![team(attributes)],
            ..VrpDescription::default()
        };
        apply_capacity_settings(&mut description, &limits(), horizon_day);
        let end = description
            .shift_teams
            .first()
            .map(|team| team.available_time_window.end_timestamp_sec);
        assert_eq!(end, Some(expected_end));
    }

    #[rstest]
    fn local_day_follows_the_region_zone() {
        let tz: Tz = "America/Denver".parse().expect("known zone");
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
        let window = local_day(tz, date).expect("resolvable day");
        // 2024-06-01T06:00:00Z to 2024-06-02T06:00:00Z.
        assert_eq!(window, TimeWindow::new(1_717_221_600, 1_717_308_000));
    }

    #[rstest]
    fn template_visit_defaults_to_open_hours() {
        let check = CheckFeasibilityVisit {
            market_id: 5,
            required_attributes: vec!["service_name:acute".to_owned()],
            ..CheckFeasibilityVisit::default()
        };
        let visit = template_visit(&check, 30, TimeWindow::new(10, 20));
        assert_eq!(visit.id, CHECK_FEASIBILITY_TEMPLATE_VISIT_ID);
        assert_eq!(visit.location_id, 30);
        assert_eq!(visit.arrival_time_window, Some(TimeWindow::new(10, 20)));
        assert_eq!(visit.required_attributes, vec!["service_name:acute".to_owned()]);
    }
}
