//! Run ledger: runs, run errors and written schedules.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use dispatch_core::{
    AddOptimizerRunParams, NewOptimizerRun, OptimizerRun, OptimizerRunType, RouteStop,
    RunErrorSource, StoreError, TimeWindow, VrpScore, WriteScheduleParams,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{DATE_FORMAT, backend, serialization};

const RUN_COLUMNS: &str = "id, run_type, service_region_id, service_date, \
    open_start_timestamp_sec, open_end_timestamp_sec, earliest_distance_timestamp_sec, \
    latest_distance_timestamp_sec, snapshot_timestamp_sec, optimizer_config_id, service_version";

const RUN_TYPES: [OptimizerRunType; 3] = [
    OptimizerRunType::FeasibilityCheck,
    OptimizerRunType::ServiceRegionSchedule,
    OptimizerRunType::ServiceRegionAvailability,
];

/// A stored run with counts of what it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// The run.
    pub run: OptimizerRun,
    /// Schedules written for the run.
    pub schedule_count: i64,
    /// Errors recorded against the run.
    pub error_count: i64,
    /// Score of the last schedule written, if any.
    pub latest_score: Option<VrpScore>,
}

/// Owned copy of [`AddOptimizerRunParams`] that can cross into a blocking task.
pub(super) struct NewRunRow {
    run: NewOptimizerRun,
    run_type: OptimizerRunType,
    constraint_config: Option<String>,
    optimizer_settings: Option<String>,
}

impl NewRunRow {
    pub(super) fn from_params(params: AddOptimizerRunParams<'_>) -> Result<Self, StoreError> {
        let constraint_config = params
            .constraint_config
            .map(serde_json::to_string)
            .transpose()
            .map_err(serialization("constraint config"))?;
        let optimizer_settings = params
            .optimizer_settings
            .map(serde_json::to_string)
            .transpose()
            .map_err(serialization("optimizer settings"))?;
        Ok(Self {
            run: params.run.clone(),
            run_type: params.run_type,
            constraint_config,
            optimizer_settings,
        })
    }
}

struct ScheduleVisitRow {
    visit_id: i64,
    shift_team_id: i64,
    arrival_timestamp_sec: i64,
    availability_visit_id: Option<i64>,
}

/// Owned copy of a solution ready to be written.
pub(super) struct ScheduleRow {
    optimizer_run_id: i64,
    service_region_id: i64,
    optimizer_version: String,
    score: VrpScore,
    newly_unassigned_visits: i64,
    solution: String,
    visits: Vec<ScheduleVisitRow>,
}

impl ScheduleRow {
    pub(super) fn from_params(params: WriteScheduleParams<'_>) -> Result<Self, StoreError> {
        let solution = serde_json::to_string(params.solution).map_err(serialization("solution"))?;
        let previously_unassigned: BTreeSet<i64> = params
            .previous_unassigned_visits
            .iter()
            .map(|visit| visit.visit_id)
            .collect();
        let newly_unassigned = params
            .solution
            .description
            .unassigned_visits
            .iter()
            .filter(|visit| !previously_unassigned.contains(&visit.visit_id))
            .count();
        let visits = params
            .solution
            .description
            .shift_teams
            .iter()
            .filter_map(|team| team.route.as_ref().map(|route| (team.id, route)))
            .flat_map(|(shift_team_id, route)| {
                route.stops.iter().filter_map(move |stop| match stop {
                    RouteStop::Visit {
                        visit_id,
                        arrival_timestamp_sec,
                        ..
                    } => Some(ScheduleVisitRow {
                        visit_id: *visit_id,
                        shift_team_id,
                        arrival_timestamp_sec: *arrival_timestamp_sec,
                        availability_visit_id: params.availability_visit_ids.get(visit_id).copied(),
                    }),
                    RouteStop::RestBreak { .. } => None,
                })
            })
            .collect();
        Ok(Self {
            optimizer_run_id: params.optimizer_run_id,
            service_region_id: params.service_region_id,
            optimizer_version: params.optimizer_version.to_owned(),
            score: params.solution.score.clone(),
            newly_unassigned_visits: i64::try_from(newly_unassigned).unwrap_or(i64::MAX),
            solution,
            visits,
        })
    }
}

struct RunRow {
    id: i64,
    run_type: String,
    service_region_id: i64,
    service_date: String,
    open_start_timestamp_sec: i64,
    open_end_timestamp_sec: i64,
    earliest_distance_timestamp_sec: i64,
    latest_distance_timestamp_sec: i64,
    snapshot_timestamp_sec: i64,
    optimizer_config_id: i64,
    service_version: String,
}

impl RunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_type: row.get(1)?,
            service_region_id: row.get(2)?,
            service_date: row.get(3)?,
            open_start_timestamp_sec: row.get(4)?,
            open_end_timestamp_sec: row.get(5)?,
            earliest_distance_timestamp_sec: row.get(6)?,
            latest_distance_timestamp_sec: row.get(7)?,
            snapshot_timestamp_sec: row.get(8)?,
            optimizer_config_id: row.get(9)?,
            service_version: row.get(10)?,
        })
    }

    fn into_run(self) -> Result<OptimizerRun, StoreError> {
        let run_type = RUN_TYPES
            .into_iter()
            .find(|candidate| candidate.as_str() == self.run_type)
            .ok_or_else(|| StoreError::InvalidData {
                message: format!("run {} has unknown type {:?}", self.id, self.run_type),
            })?;
        Ok(OptimizerRun {
            id: self.id,
            run_type,
            service_region_id: self.service_region_id,
            service_date: parse_date(&self.service_date)?,
            open_hours: TimeWindow::new(self.open_start_timestamp_sec, self.open_end_timestamp_sec),
            earliest_distance_timestamp_sec: self.earliest_distance_timestamp_sec,
            latest_distance_timestamp_sec: self.latest_distance_timestamp_sec,
            snapshot_timestamp_sec: self.snapshot_timestamp_sec,
            optimizer_config_id: self.optimizer_config_id,
            service_version: self.service_version,
        })
    }
}

pub(super) fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|err| StoreError::InvalidData {
        message: format!("invalid stored date {value:?}: {err}"),
    })
}

pub(super) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(super) fn add_optimizer_run(
    connection: &mut Connection,
    row: NewRunRow,
) -> Result<OptimizerRun, StoreError> {
    let run = &row.run;
    connection
        .execute(
            "INSERT INTO optimizer_runs (
                run_type, service_region_id, service_date,
                open_start_timestamp_sec, open_end_timestamp_sec,
                earliest_distance_timestamp_sec, latest_distance_timestamp_sec,
                snapshot_timestamp_sec, optimizer_config_id, service_version,
                constraint_config, optimizer_settings
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.run_type.as_str(),
                run.service_region_id,
                format_date(run.service_date),
                run.open_hours.start_timestamp_sec,
                run.open_hours.end_timestamp_sec,
                run.earliest_distance_timestamp_sec,
                run.latest_distance_timestamp_sec,
                run.snapshot_timestamp_sec,
                run.optimizer_config_id,
                run.service_version,
                row.constraint_config,
                row.optimizer_settings,
            ],
        )
        .map_err(backend("insert optimizer run"))?;
    let id = connection.last_insert_rowid();
    Ok(OptimizerRun::from_new(id, row.run_type, run))
}

pub(super) fn add_optimizer_run_error(
    connection: &mut Connection,
    optimizer_run_id: i64,
    source: RunErrorSource,
    message: &str,
) -> Result<(), StoreError> {
    connection
        .execute(
            "INSERT INTO optimizer_run_errors (optimizer_run_id, error_source_id, message)
                VALUES (?1, ?2, ?3)",
            params![optimizer_run_id, source.id(), message],
        )
        .map(|_| ())
        .map_err(backend("insert optimizer run error"))
}

pub(super) fn run_errors(
    connection: &mut Connection,
    optimizer_run_id: i64,
) -> Result<Vec<(RunErrorSource, String)>, StoreError> {
    let mut statement = connection
        .prepare(
            "SELECT error_source_id, message FROM optimizer_run_errors
                WHERE optimizer_run_id = ?1 ORDER BY id",
        )
        .map_err(backend("prepare run error query"))?;
    let rows = statement
        .query_map([optimizer_run_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(backend("query run errors"))?;
    rows.map(|row| {
        let (source_id, message) = row.map_err(backend("read run error"))?;
        let source = RunErrorSource::from_id(source_id).ok_or_else(|| StoreError::InvalidData {
            message: format!("unknown run error source {source_id}"),
        })?;
        Ok((source, message))
    })
    .collect()
}

pub(super) fn write_schedule(
    connection: &mut Connection,
    row: ScheduleRow,
) -> Result<i64, StoreError> {
    let transaction = connection
        .transaction()
        .map_err(backend("begin schedule transaction"))?;
    transaction
        .execute(
            "INSERT INTO schedules (
                optimizer_run_id, service_region_id, optimizer_version, is_valid,
                hard_score, unassigned_visits_score, soft_score,
                newly_unassigned_visits, solution
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.optimizer_run_id,
                row.service_region_id,
                row.optimizer_version,
                row.score.is_valid,
                row.score.hard_score,
                row.score.unassigned_visits_score,
                row.score.soft_score,
                row.newly_unassigned_visits,
                row.solution,
            ],
        )
        .map_err(backend("insert schedule"))?;
    let schedule_id = transaction.last_insert_rowid();
    {
        let mut insert = transaction
            .prepare(
                "INSERT OR REPLACE INTO schedule_visits (
                    schedule_id, visit_id, shift_team_id, arrival_timestamp_sec,
                    availability_visit_id
                ) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(backend("prepare schedule visit insert"))?;
        for visit in &row.visits {
            insert
                .execute(params![
                    schedule_id,
                    visit.visit_id,
                    visit.shift_team_id,
                    visit.arrival_timestamp_sec,
                    visit.availability_visit_id,
                ])
                .map_err(backend("insert schedule visit"))?;
        }
    }
    transaction
        .commit()
        .map_err(backend("commit schedule transaction"))?;
    Ok(schedule_id)
}

pub(super) fn visit_arrival_timestamps(
    connection: &mut Connection,
    schedule_id: i64,
) -> Result<BTreeMap<i64, i64>, StoreError> {
    let mut statement = connection
        .prepare(
            "SELECT visit_id, arrival_timestamp_sec FROM schedule_visits WHERE schedule_id = ?1",
        )
        .map_err(backend("prepare arrival query"))?;
    let rows = statement
        .query_map([schedule_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(backend("query arrivals"))?;
    rows.collect::<rusqlite::Result<_>>()
        .map_err(backend("read arrival"))
}

/// Latest schedule run for a region and date.
pub(super) fn last_schedule_run(
    connection: &Connection,
    service_region_id: i64,
    service_date: NaiveDate,
) -> Result<Option<OptimizerRun>, StoreError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM optimizer_runs
            WHERE service_region_id = ?1 AND service_date = ?2 AND run_type = ?3
            ORDER BY id DESC LIMIT 1"
    );
    connection
        .query_row(
            &sql,
            params![
                service_region_id,
                format_date(service_date),
                OptimizerRunType::ServiceRegionSchedule.as_str()
            ],
            RunRow::read,
        )
        .optional()
        .map_err(backend("query last schedule run"))?
        .map(RunRow::into_run)
        .transpose()
}

/// Id and newly unassigned count of the latest schedule written by a schedule
/// run for a region and date.
pub(super) fn latest_schedule(
    connection: &Connection,
    service_region_id: i64,
    service_date: NaiveDate,
) -> Result<Option<(i64, i64)>, StoreError> {
    connection
        .query_row(
            "SELECT s.id, s.newly_unassigned_visits FROM schedules s
                JOIN optimizer_runs r ON r.id = s.optimizer_run_id
                WHERE r.service_region_id = ?1 AND r.service_date = ?2 AND r.run_type = ?3
                ORDER BY s.id DESC LIMIT 1",
            params![
                service_region_id,
                format_date(service_date),
                OptimizerRunType::ServiceRegionSchedule.as_str()
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(backend("query latest schedule"))
}

pub(super) fn has_new_schedule_since_last_availability_run(
    connection: &mut Connection,
    service_region_id: i64,
    service_date: NaiveDate,
) -> Result<bool, StoreError> {
    let date = format_date(service_date);
    let last_schedule_run: Option<i64> = connection
        .query_row(
            "SELECT MAX(r.id) FROM optimizer_runs r
                JOIN schedules s ON s.optimizer_run_id = r.id
                WHERE r.service_region_id = ?1 AND r.service_date = ?2 AND r.run_type = ?3",
            params![
                service_region_id,
                date,
                OptimizerRunType::ServiceRegionSchedule.as_str()
            ],
            |row| row.get(0),
        )
        .map_err(backend("query last schedule run id"))?;
    let last_availability_run: Option<i64> = connection
        .query_row(
            "SELECT MAX(id) FROM optimizer_runs
                WHERE service_region_id = ?1 AND service_date = ?2 AND run_type = ?3",
            params![
                service_region_id,
                date,
                OptimizerRunType::ServiceRegionAvailability.as_str()
            ],
            |row| row.get(0),
        )
        .map_err(backend("query last availability run id"))?;
    Ok(match (last_schedule_run, last_availability_run) {
        (Some(schedule), Some(availability)) => schedule > availability,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

pub(super) fn recent_runs(
    connection: &mut Connection,
    service_region_id: Option<i64>,
    limit: usize,
) -> Result<Vec<RunSummary>, StoreError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS},
            (SELECT COUNT(*) FROM schedules s WHERE s.optimizer_run_id = optimizer_runs.id),
            (SELECT COUNT(*) FROM optimizer_run_errors e
                WHERE e.optimizer_run_id = optimizer_runs.id)
            FROM optimizer_runs
            WHERE ?1 IS NULL OR service_region_id = ?1
            ORDER BY id DESC LIMIT ?2"
    );
    let row_limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Vec<(RunRow, i64, i64)> = {
        let mut statement = connection
            .prepare(&sql)
            .map_err(backend("prepare recent runs query"))?;
        let mapped = statement
            .query_map(params![service_region_id, row_limit], |row| {
                Ok((RunRow::read(row)?, row.get(11)?, row.get(12)?))
            })
            .map_err(backend("query recent runs"))?;
        mapped
            .collect::<rusqlite::Result<_>>()
            .map_err(backend("read recent run"))?
    };
    rows.into_iter()
        .map(|(row, schedule_count, error_count)| {
            let run = row.into_run()?;
            let latest_score = latest_score(connection, run.id)?;
            Ok(RunSummary {
                run,
                schedule_count,
                error_count,
                latest_score,
            })
        })
        .collect()
}

fn latest_score(
    connection: &Connection,
    optimizer_run_id: i64,
) -> Result<Option<VrpScore>, StoreError> {
    connection
        .query_row(
            "SELECT is_valid, hard_score, unassigned_visits_score, soft_score FROM schedules
                WHERE optimizer_run_id = ?1 ORDER BY id DESC LIMIT 1",
            [optimizer_run_id],
            |row| {
                Ok(VrpScore {
                    is_valid: row.get(0)?,
                    hard_score: row.get(1)?,
                    unassigned_visits_score: row.get(2)?,
                    soft_score: row.get(3)?,
                    debug_explanation: None,
                })
            },
        )
        .optional()
        .map_err(backend("query latest score"))
}
