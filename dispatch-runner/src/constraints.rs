//! Layered constraint configuration for schedule and availability runs.
//!
//! Each `with_*` method borrows its receiver and returns a new value; the
//! receiver is never modified.

use std::collections::BTreeMap;

use dispatch_core::{
    ClinicalUrgencyConfig, DepotLateArrivalConstraintConfig, ExponentialPolicy,
    LateArrivalConstraintConfig, LinearOffsetPolicy, OptimizerSettings, VisitLatenessTolerance,
    Visit, VrpConstraintConfig, WorkDistributionConstraintConfig,
};

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

/// Hard lateness threshold for visits and depot returns.
pub const DEFAULT_HARD_LATENESS_THRESHOLD_MS: i64 = 30 * MINUTE_MS;

const LATE_ARRIVAL_COST_USD_MILLS_PER_MS: f32 = 0.0835;
const URGENCY_COST_USD_MILLS_PER_MS: f32 = 0.0833;
const DEPOT_COST_USD_MILLS_PER_MS: f32 = 0.0833;
const FULL_QUEUE_VALUE_LIMIT_USD_MILLS: u64 = 250_000;

/// Inputs for [`ConstraintConfig::with_visit_lateness_tolerance_overrides`].
#[derive(Debug, Clone, Copy)]
pub struct VisitLatenessToleranceOverridesParams<'a> {
    /// Visits of the problem.
    pub visits: &'a [Visit],
    /// Injected probe ids; each gets the default threshold.
    pub availability_visit_ids: &'a [i64],
    /// Planned arrivals by visit id from the last schedule.
    pub visit_arrival_timestamps: &'a BTreeMap<i64, i64>,
    /// Threshold applied when a visit is not already late.
    pub default_lateness_threshold_ms: i64,
    /// Extra start-of-shift time added to every planned arrival.
    pub shift_team_start_buffer_sec: i64,
}

/// A [`VrpConstraintConfig`] with layering helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintConfig(VrpConstraintConfig);

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self(VrpConstraintConfig {
            late_arrival: Some(LateArrivalConstraintConfig {
                hard_lateness_threshold_ms: DEFAULT_HARD_LATENESS_THRESHOLD_MS,
                linear_offset_policy: LinearOffsetPolicy {
                    linear_offset_cost_usd_mills_per_ms: LATE_ARRIVAL_COST_USD_MILLS_PER_MS,
                    offset_prior_to_time_window_end_ms: HOUR_MS,
                },
                visit_lateness_tolerance_overrides: Vec::new(),
            }),
            work_distribution: Some(WorkDistributionConstraintConfig {
                exponential_policy: ExponentialPolicy {
                    base_numerator: 2,
                    base_denominator: 1,
                    full_queue_value_limit_usd_mills: FULL_QUEUE_VALUE_LIMIT_USD_MILLS,
                },
            }),
            clinical_urgency: Some(ClinicalUrgencyConfig {
                higher_level_value_wins: LinearOffsetPolicy {
                    linear_offset_cost_usd_mills_per_ms: URGENCY_COST_USD_MILLS_PER_MS,
                    offset_prior_to_time_window_end_ms: HOUR_MS,
                },
            }),
            depot_late_arrival: Some(DepotLateArrivalConstraintConfig {
                hard_lateness_threshold_ms: DEFAULT_HARD_LATENESS_THRESHOLD_MS,
                linear_offset_policy: LinearOffsetPolicy {
                    linear_offset_cost_usd_mills_per_ms: DEPOT_COST_USD_MILLS_PER_MS,
                    offset_prior_to_time_window_end_ms: HOUR_MS,
                },
                disallowed_late_arrival_visit_ids: Vec::new(),
            }),
            opportunity_cost: None,
        })
    }
}

impl From<VrpConstraintConfig> for ConstraintConfig {
    fn from(config: VrpConstraintConfig) -> Self {
        Self(config)
    }
}

impl ConstraintConfig {
    /// Borrow the wrapped configuration.
    #[must_use]
    pub const fn as_config(&self) -> &VrpConstraintConfig {
        &self.0
    }

    /// Unwrap into the configuration sent to the optimizer.
    #[must_use]
    pub fn into_inner(self) -> VrpConstraintConfig {
        self.0
    }

    /// Replace the sections the region settings configure.
    #[must_use]
    pub fn with_optimizer_settings(&self, settings: &OptimizerSettings) -> Self {
        let mut config = self.0.clone();
        if let Some(urgency) = settings.clinical_urgency_config() {
            config.clinical_urgency = Some(urgency);
        }
        if let Some(distribution) = settings.work_distribution_config() {
            config.work_distribution = Some(distribution);
        }
        if let Some(opportunity) = settings.opportunity_cost_config() {
            config.opportunity_cost = Some(opportunity);
        }
        Self(config)
    }

    /// Forbid the given visits from making a team late to its depot.
    ///
    /// Has no effect without a depot late arrival section.
    #[must_use]
    pub fn with_disallowed_late_arrival_visit_ids(&self, visit_ids: &[i64]) -> Self {
        let mut config = self.0.clone();
        if let Some(depot) = config.depot_late_arrival.as_mut() {
            depot.disallowed_late_arrival_visit_ids = visit_ids.to_vec();
        }
        Self(config)
    }

    /// Replace the per-visit lateness thresholds.
    ///
    /// Probes get the default threshold. A visit whose shifted planned arrival
    /// already passes its window end keeps exactly that lateness as its
    /// threshold; other visits with a window and a planned arrival get the
    /// default. Visits missing either are left to the section default.
    #[must_use]
    pub fn with_visit_lateness_tolerance_overrides(
        &self,
        params: VisitLatenessToleranceOverridesParams<'_>,
    ) -> Self {
        let default_ms = params.default_lateness_threshold_ms;
        let probes = params
            .availability_visit_ids
            .iter()
            .map(|visit_id| VisitLatenessTolerance {
                visit_id: *visit_id,
                hard_lateness_threshold_ms: default_ms,
            });
        let visits = params.visits.iter().filter_map(|visit| {
            let window_end = visit.arrival_time_window?.end_timestamp_sec;
            let arrival = params.visit_arrival_timestamps.get(&visit.id)?;
            let shifted = arrival.saturating_add(params.shift_team_start_buffer_sec);
            let hard_lateness_threshold_ms = if shifted > window_end {
                (shifted - window_end).saturating_mul(1000)
            } else {
                default_ms
            };
            Some(VisitLatenessTolerance {
                visit_id: visit.id,
                hard_lateness_threshold_ms,
            })
        });
        let overrides: Vec<_> = probes.chain(visits).collect();

        let mut config = self.0.clone();
        let late_arrival = config
            .late_arrival
            .get_or_insert_with(LateArrivalConstraintConfig::default);
        late_arrival.visit_lateness_tolerance_overrides = overrides;
        Self(config)
    }
}
