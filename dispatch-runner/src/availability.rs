//! One availability run for one region and horizon day.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use dispatch_availability::{
    AvailabilityProbeParams, add_availability_visits_to_problem, are_equal_visits,
    attribute_combinations, attribute_names_by_category, build_availability_vrp_visits,
    generate_simple_availability_visits, to_simple_availability_visits,
};
use dispatch_core::{
    AvailabilityAttribute, AvailabilitySettingsConfig, AvailabilityVisitIdMap,
    CheckFeasibilityVisit, OptimizerRunType, ServiceRegionVrpDataParams, SolveVrpRequest,
    TerminationType, TimeWindow, UnrequestedRestBreakConfig, Visit, VrpConfig, VrpProblemParams,
};
use dispatch_solver::{SolveVrpParams, SolveVrpUse};

use crate::RunnerError;
use crate::constraints::{ConstraintConfig, VisitLatenessToleranceOverridesParams};
use crate::metrics::RunResult;
use crate::runner::Runner;
use crate::schedule::{monitoring_tags, positive};

/// Inputs for [`Runner::resolve_availability_visits`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveAvailabilityVisitsParams<'a> {
    /// Region the probes belong to.
    pub service_region_id: i64,
    /// Attribute categories to combine.
    pub attributes: &'a [AvailabilityAttribute],
    /// Candidate probe locations.
    pub location_ids: &'a [i64],
    /// Probe durations.
    pub durations_sec: &'a [i64],
    /// Arrival window given to every probe.
    pub open_hours: TimeWindow,
    /// Setup time added to every probe.
    pub extra_setup_duration_sec: i64,
    /// Whether probes may be dropped without penalty.
    pub expendable: bool,
}

/// Probe visits ready for injection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedAvailabilityVisits {
    /// Problem visits with negated ids.
    pub visits: Vec<Visit>,
    /// Probe id to stored id.
    pub id_map: AvailabilityVisitIdMap,
}

impl Runner {
    /// Produce the probe visits for a region, reusing the stored set when it
    /// still matches the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::MissingAttributes`] when a configured variant is
    /// unknown to the store, and store errors otherwise.
    pub async fn resolve_availability_visits(
        &self,
        params: ResolveAvailabilityVisitsParams<'_>,
    ) -> Result<ResolvedAvailabilityVisits, RunnerError> {
        let mut groups = Vec::with_capacity(params.attributes.len());
        for names in attribute_names_by_category(params.attributes) {
            let found = self.store.attributes_for_names(&names).await?;
            if found.len() != names.len() {
                let missing = names
                    .into_iter()
                    .filter(|name| !found.iter().any(|attribute| &attribute.name == name))
                    .collect();
                return Err(RunnerError::MissingAttributes { names: missing });
            }
            groups.push(found);
        }

        let generated = generate_simple_availability_visits(
            params.location_ids,
            &attribute_combinations(&groups),
            params.durations_sec,
        );
        let latest = self
            .store
            .latest_availability_visits(params.service_region_id)
            .await?;
        let latest_ids: Vec<i64> = latest.iter().map(|visit| visit.id).collect();
        let latest_attributes = self.store.availability_visit_attributes(&latest_ids).await?;

        let (stored, attributes) = if are_equal_visits(
            &generated,
            &to_simple_availability_visits(&latest, &latest_attributes),
        ) {
            (latest, latest_attributes)
        } else {
            log::info!(
                "storing {} new availability visits for region {}",
                generated.len(),
                params.service_region_id
            );
            let created = self
                .store
                .add_availability_visits(params.service_region_id, &generated)
                .await?;
            let created_ids: Vec<i64> = created.iter().map(|visit| visit.id).collect();
            let created_attributes = self
                .store
                .availability_visit_attributes(&created_ids)
                .await?;
            (created, created_attributes)
        };

        let (visits, id_map) = build_availability_vrp_visits(AvailabilityProbeParams {
            visits: &stored,
            attributes: &attributes,
            open_hours: params.open_hours,
            extra_setup_duration_sec: params.extra_setup_duration_sec,
            expendable: params.expendable,
        });
        Ok(ResolvedAvailabilityVisits { visits, id_map })
    }

    /// Probe a region's remaining capacity on one horizon day.
    ///
    /// Returns `None` when no schedule was written since the last availability
    /// run, when the region has no check data, or when it has nothing to
    /// solve.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::NoAttributes`] for settings without attribute
    /// categories; store, injection and solve failures otherwise.
    pub async fn run_availability(
        &self,
        config: &AvailabilitySettingsConfig,
        service_date: NaiveDate,
        latest_snapshot: DateTime<Utc>,
        horizon_day: Option<u32>,
    ) -> Result<Option<RunResult>, RunnerError> {
        let settings = &config.settings;
        let optimizer_settings = &config.optimizer_settings;
        if settings.attributes.is_empty() {
            return Err(RunnerError::NoAttributes);
        }
        let service_region_id = config.service_region_id;
        if !self
            .store
            .has_new_schedule_since_last_availability_run(service_region_id, service_date)
            .await?
        {
            return Ok(None);
        }

        let snapshot_timestamp_sec = latest_snapshot.timestamp();
        let vrp_data = self
            .store
            .service_region_vrp_data(ServiceRegionVrpDataParams {
                service_region_id,
                service_date,
                snapshot_timestamp_sec,
                check_feasibility_visit: Some(CheckFeasibilityVisit {
                    market_id: service_region_id,
                    ..CheckFeasibilityVisit::default()
                }),
                capacity_settings: settings.capacity_settings.clone(),
                horizon_day,
            })
            .await?;
        let Some(check) = &vrp_data.check_feasibility_data else {
            log::debug!("no check data for region {service_region_id} on {service_date}");
            return Ok(None);
        };
        let location_ids: Vec<i64> = check.locations.iter().map(|location| location.id).collect();
        let durations_sec = settings.visit_durations_sec();
        let probes = self
            .resolve_availability_visits(ResolveAvailabilityVisitsParams {
                service_region_id,
                attributes: &settings.attributes,
                location_ids: &location_ids,
                durations_sec: &durations_sec,
                open_hours: vrp_data.open_hours,
                extra_setup_duration_sec: optimizer_settings.visit_extra_setup_duration_sec,
                expendable: settings.allow_expendable_availability_visits,
            })
            .await?;

        let created = self
            .store
            .create_vrp_problem(VrpProblemParams {
                vrp_data,
                earliest_distance_timestamp_sec: snapshot_timestamp_sec
                    .saturating_sub(optimizer_settings.distance_validity_sec),
                unrequested_rest_break: Some(UnrequestedRestBreakConfig::default()),
            })
            .await;
        let Some(problem_data) = self.problem_or_none(created)? else {
            return Ok(None);
        };
        let arrivals = match problem_data
            .check_feasibility_diagnostics
            .and_then(|diagnostics| diagnostics.schedule_id)
        {
            Some(schedule_id) => {
                self.store
                    .visit_arrival_timestamps_for_schedule(schedule_id)
                    .await?
            }
            None => BTreeMap::new(),
        };

        let mut problem = problem_data.problem;
        let previous_unassigned_visits = problem.description.unassigned_visits.clone();
        let probe_ids = add_availability_visits_to_problem(&mut problem, probes.visits)?;
        let original_description = problem.description.clone();

        let mut constraints =
            ConstraintConfig::default().with_optimizer_settings(optimizer_settings);
        if !settings.allow_late_availability_visits {
            constraints = constraints.with_disallowed_late_arrival_visit_ids(&probe_ids);
        }
        if let Some(threshold_ms) =
            optimizer_settings.feasibility_check_lateness_threshold_override_ms
        {
            let overrides = VisitLatenessToleranceOverridesParams {
                visits: &problem.description.visits,
                availability_visit_ids: &probe_ids,
                visit_arrival_timestamps: &arrivals,
                default_lateness_threshold_ms: threshold_ms,
                shift_team_start_buffer_sec: optimizer_settings
                    .feasibility_shift_team_start_buffer_sec,
            };
            constraints = constraints.with_visit_lateness_tolerance_overrides(overrides);
        }

        let optimizer_config = &config.optimizer_config;
        let mut optimizer_run = problem_data.optimizer_run;
        optimizer_run.optimizer_config_id = optimizer_config.id;
        let request = SolveVrpRequest {
            problem,
            config: VrpConfig {
                termination_duration_ms: Some(config.termination_duration_ms()),
                unimproved_score_termination_duration_ms: positive(
                    settings.optimizer_unimproved_score_termination_duration_ms,
                ),
                per_visit_revenue_usd_cents: Some(optimizer_config.per_visit_revenue_usd_cents),
                app_hourly_cost_usd_cents: Some(optimizer_config.app_hourly_cost_usd_cents),
                dhmt_hourly_cost_usd_cents: Some(optimizer_config.dhmt_hourly_cost_usd_cents),
                termination_type: TerminationType::BestForTime,
                include_intermediate_solutions: false,
                include_intermediate_infeasible_solutions: false,
                constraint_config: Some(constraints.into_inner()),
            },
            monitoring_tags: monitoring_tags(
                service_region_id,
                service_date,
                SolveVrpUse::Availability,
            ),
        };
        if self.availability_debug {
            match serde_json::to_string(&request) {
                Ok(json) => log::info!(
                    "availability request for [{service_region_id}, {service_date}]: {json}"
                ),
                Err(err) => log::warn!("failed to serialise availability request: {err}"),
            }
        }

        let params = SolveVrpParams::new(
            OptimizerRunType::ServiceRegionAvailability,
            request,
            optimizer_run,
        )
        .with_optimizer_settings(Some(optimizer_settings.clone()))
        .with_availability_visits(probes.id_map, previous_unassigned_visits)
        .with_write_to_database(true);
        let responses = self.collect_responses(params).await?;
        Ok(Some(RunResult {
            original_description,
            responses,
        }))
    }
}
