//! Constraint tuning forwarded to the optimizer.

use serde::{Deserialize, Serialize};

/// Cost grows linearly once arrival passes an offset before the window end.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearOffsetPolicy {
    /// Cost in thousandths of a US cent per millisecond of lateness.
    pub linear_offset_cost_usd_mills_per_ms: f32,
    /// How long before the window end the cost starts accruing.
    pub offset_prior_to_time_window_end_ms: i64,
}

/// Per-visit override of the hard lateness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitLatenessTolerance {
    /// The visit.
    pub visit_id: i64,
    /// Lateness beyond this many milliseconds is a hard violation.
    pub hard_lateness_threshold_ms: i64,
}

/// Lateness rules for patient visits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LateArrivalConstraintConfig {
    /// Default hard lateness threshold.
    pub hard_lateness_threshold_ms: i64,
    /// Soft cost of lateness.
    pub linear_offset_policy: LinearOffsetPolicy,
    /// Visit-specific thresholds replacing the default.
    #[serde(default)]
    pub visit_lateness_tolerance_overrides: Vec<VisitLatenessTolerance>,
}

/// Exponential value curve used to even out team workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExponentialPolicy {
    /// Numerator of the exponent base.
    pub base_numerator: u64,
    /// Denominator of the exponent base.
    pub base_denominator: u64,
    /// Value ceiling for a full queue.
    pub full_queue_value_limit_usd_mills: u64,
}

/// Workload balancing between shift teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkDistributionConstraintConfig {
    /// Distribution curve.
    pub exponential_policy: ExponentialPolicy,
}

/// Prioritisation of clinically urgent visits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClinicalUrgencyConfig {
    /// When urgency levels conflict, the higher level's cost applies.
    pub higher_level_value_wins: LinearOffsetPolicy,
}

/// Lateness rules for returning to the depot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DepotLateArrivalConstraintConfig {
    /// Hard lateness threshold.
    pub hard_lateness_threshold_ms: i64,
    /// Soft cost of lateness.
    pub linear_offset_policy: LinearOffsetPolicy,
    /// Visits that may never push a team late to its depot.
    #[serde(default)]
    pub disallowed_late_arrival_visit_ids: Vec<i64>,
}

/// Cost of the time a team spends on scene and of visits left unserved.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OpportunityCostConfig {
    /// Multiplier on on-scene time.
    #[serde(default)]
    pub on_scene_cost_scale_factor: Option<f32>,
    /// Cost per minute of a forgone visit.
    #[serde(default)]
    pub foregone_visit_cost_cents_per_minute: Option<f32>,
}

/// The full constraint configuration sent with a solve request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VrpConstraintConfig {
    /// Visit lateness.
    #[serde(default)]
    pub late_arrival: Option<LateArrivalConstraintConfig>,
    /// Workload balancing.
    #[serde(default)]
    pub work_distribution: Option<WorkDistributionConstraintConfig>,
    /// Clinical urgency.
    #[serde(default)]
    pub clinical_urgency: Option<ClinicalUrgencyConfig>,
    /// Depot lateness.
    #[serde(default)]
    pub depot_late_arrival: Option<DepotLateArrivalConstraintConfig>,
    /// Opportunity cost.
    #[serde(default)]
    pub opportunity_cost: Option<OpportunityCostConfig>,
}
