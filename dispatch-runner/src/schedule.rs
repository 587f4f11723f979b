//! One schedule run for one region and date.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use dispatch_core::{
    NewInfoParams, OptimizerRunType, ServiceRegionVrpDataParams, SettingsConfig, SolveVrpRequest,
    StoreError, TerminationType, VrpConfig, VrpProblemData, VrpProblemParams,
};
use dispatch_solver::{
    SERVICE_DATE_FORMAT, SERVICE_DATE_TAG, SERVICE_REGION_TAG, SOLVE_VRP_USE_TAG, SolveVrpParams,
    SolveVrpUse, WrappedSolveVrpResponse,
};

use crate::RunnerError;
use crate::constraints::ConstraintConfig;
use crate::metrics::RunResult;
use crate::runner::Runner;
use crate::staleness::StalenessChecker;

pub(crate) fn monitoring_tags(
    service_region_id: i64,
    service_date: NaiveDate,
    solve_use: SolveVrpUse,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_REGION_TAG.to_owned(), service_region_id.to_string()),
        (
            SERVICE_DATE_TAG.to_owned(),
            service_date.format(SERVICE_DATE_FORMAT).to_string(),
        ),
        (SOLVE_VRP_USE_TAG.to_owned(), solve_use.as_str().to_owned()),
    ])
}

pub(crate) const fn positive(value: i64) -> Option<i64> {
    if value > 0 { Some(value) } else { None }
}

impl Runner {
    /// Map "nothing to solve" and rejected problems to `None`.
    pub(crate) fn problem_or_none(
        &self,
        created: Result<VrpProblemData, StoreError>,
    ) -> Result<Option<VrpProblemData>, StoreError> {
        let data = match created {
            Ok(data) => data,
            Err(StoreError::EmptyDescription) => return Ok(None),
            Err(err) => return Err(err),
        };
        let run = &data.optimizer_run;
        match self.validation.validate(&data.problem.description) {
            Ok(tolerated) => {
                for issue in tolerated {
                    log::warn!(
                        "problem for [{}, {}]: {issue}",
                        run.service_region_id,
                        run.service_date
                    );
                }
                Ok(Some(data))
            }
            Err(err) => {
                log::warn!(
                    "nothing to solve for [{}, {}]: {err}",
                    run.service_region_id,
                    run.service_date
                );
                Ok(None)
            }
        }
    }

    /// Re-optimize a region's schedule for one date.
    ///
    /// Returns `None` when there is no new information and the current
    /// schedule is not stale, or when the region has nothing to solve or its
    /// problem fails validation.
    ///
    /// # Errors
    ///
    /// Fails when the store fails or the solve cannot start.
    pub async fn run_schedule(
        &self,
        config: &SettingsConfig,
        service_date: NaiveDate,
        latest_snapshot: DateTime<Utc>,
    ) -> Result<Option<RunResult>, RunnerError> {
        let settings = &config.settings;
        let service_region_id = config.service_region_id;
        let snapshot_timestamp_sec = latest_snapshot.timestamp();

        let info = self
            .store
            .has_new_info_since_last_run(NewInfoParams {
                service_region_id,
                service_date,
                latest_snapshot_timestamp_sec: snapshot_timestamp_sec,
            })
            .await?;
        if !info.has_new_info {
            let checker = StalenessChecker {
                current_day_schedule_max_staleness_sec: settings
                    .current_day_schedule_max_staleness_sec,
                service_date,
                latest_snapshot_timestamp: latest_snapshot,
                time_zone: info.time_zone,
            };
            if !checker.should_force_recompute(info.last_run.as_ref()) {
                return Ok(None);
            }
            log::info!("recomputing stale schedule for [{service_region_id}, {service_date}]");
        }

        let vrp_data = self
            .store
            .service_region_vrp_data(ServiceRegionVrpDataParams {
                service_region_id,
                service_date,
                snapshot_timestamp_sec,
                check_feasibility_visit: None,
                capacity_settings: Vec::new(),
                horizon_day: None,
            })
            .await?;
        let created = self
            .store
            .create_vrp_problem(VrpProblemParams {
                vrp_data,
                earliest_distance_timestamp_sec: snapshot_timestamp_sec
                    .saturating_sub(settings.distance_validity_sec),
                unrequested_rest_break: None,
            })
            .await;
        let Some(problem_data) = self.problem_or_none(created)? else {
            return Ok(None);
        };

        let mut optimizer_run = problem_data.optimizer_run;
        optimizer_run.optimizer_config_id = config.config.id;
        let original_description = problem_data.problem.description.clone();
        let request = SolveVrpRequest {
            problem: problem_data.problem,
            config: VrpConfig {
                termination_duration_ms: Some(config.termination_duration_ms()),
                unimproved_score_termination_duration_ms: positive(
                    settings.optimizer_unimproved_score_termination_duration_ms,
                ),
                per_visit_revenue_usd_cents: Some(config.config.per_visit_revenue_usd_cents),
                app_hourly_cost_usd_cents: Some(config.config.app_hourly_cost_usd_cents),
                dhmt_hourly_cost_usd_cents: Some(config.config.dhmt_hourly_cost_usd_cents),
                termination_type: TerminationType::BestForTime,
                include_intermediate_solutions: false,
                include_intermediate_infeasible_solutions: false,
                constraint_config: Some(
                    ConstraintConfig::default()
                        .with_optimizer_settings(settings)
                        .into_inner(),
                ),
            },
            monitoring_tags: monitoring_tags(
                service_region_id,
                service_date,
                SolveVrpUse::Schedule,
            ),
        };

        let params = SolveVrpParams::new(
            OptimizerRunType::ServiceRegionSchedule,
            request,
            optimizer_run,
        )
        .with_optimizer_settings(Some(settings.clone()))
        .with_write_to_database(true);
        let responses = self.collect_responses(params).await?;
        Ok(Some(RunResult {
            original_description,
            responses,
        }))
    }

    pub(crate) async fn collect_responses(
        &self,
        params: SolveVrpParams,
    ) -> Result<Vec<WrappedSolveVrpResponse>, RunnerError> {
        let mut receiver = self.solver.solve_vrp(params).await?;
        let mut responses = Vec::new();
        while let Some(response) = receiver.recv().await {
            log::debug!(
                "received solution with hard score {} and {} unassigned visits",
                response.response.solution.score.hard_score,
                response.response.solution.description.unassigned_visits.len()
            );
            responses.push(response);
        }
        Ok(responses)
    }
}
