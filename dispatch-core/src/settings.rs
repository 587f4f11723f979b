//! Per-region optimizer and availability settings.
//!
//! Settings are reloaded on every discovery poll. Missing JSON fields fall back
//! to their `Default` so a partially specified region still parses.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constraint::{
    ClinicalUrgencyConfig, ExponentialPolicy, LinearOffsetPolicy, OpportunityCostConfig,
    WorkDistributionConstraintConfig,
};
use crate::run::OptimizerConfig;

/// Snapshot lookback used when a region does not configure one.
pub const DEFAULT_SNAPSHOTS_LOOKBACK: Duration = Duration::from_secs(60 * 24 * 60 * 60);

/// Time-window availability slot length used when a region does not set one.
pub const DEFAULT_AVAILABILITY_TIME_WINDOW_DURATION_HRS: i64 = 4;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Optimizer settings for one service region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Free-form description.
    pub description: String,
    /// Interval between runs for one instance.
    pub poll_interval_sec: i64,
    /// Share of the poll interval applied as random jitter.
    pub poll_interval_jitter_ratio: f64,
    /// How long distance data stays valid.
    pub distance_validity_sec: i64,
    /// Lookback for snapshot queries; `None` uses [`DEFAULT_SNAPSHOTS_LOOKBACK`].
    pub snapshots_lookback_sec: Option<i64>,
    /// Days to optimize, including today.
    pub optimize_horizon_days: i64,
    /// Optimizer config row to use.
    pub optimizer_config_id: i64,
    /// Search time limit; 0 defers to the config row.
    pub optimizer_termination_duration_ms: i64,
    /// Stable-score timeout; 0 disables it.
    pub optimizer_unimproved_score_termination_duration_ms: i64,
    /// Search time limit for feasibility checks.
    pub feasibility_optimizer_termination_duration_ms: i64,
    /// Stable-score timeout for feasibility checks.
    pub feasibility_optimizer_unimproved_score_termination_duration_ms: i64,
    /// Recompute today's schedule after this many seconds even without new
    /// data. `None` disables the staleness check.
    pub current_day_schedule_max_staleness_sec: Option<i64>,
    /// Report visits infeasible this many minutes before closing.
    pub feasibility_check_lateness_minutes: i64,
    /// Extra start-of-shift preparation for feasibility checks.
    pub feasibility_shift_team_start_buffer_sec: i64,
    /// Lateness threshold override for feasibility and availability probes.
    pub feasibility_check_lateness_threshold_override_ms: Option<i64>,
    /// Clinical urgency lateness cost; `None` keeps the default constraint.
    pub clinical_urgency_lateness_cost_usd_mills_per_ms: Option<f32>,
    /// Work distribution reward ceiling; `None` keeps the default constraint.
    pub work_distribution_full_queue_value_limit_usd_mills: Option<u64>,
    /// Setup time added to every visit.
    pub visit_extra_setup_duration_sec: i64,
    /// On-scene opportunity cost multiplier.
    pub on_scene_cost_scale_factor: Option<f32>,
    /// Forgone visit cost; ignored unless positive.
    pub foregone_visit_cost_cents_per_minute: Option<f32>,
    /// Slot length for time-window availability.
    pub availability_time_window_duration_hrs: Option<i64>,
}

impl OptimizerSettings {
    /// Sleep between runs, jittered around the poll interval.
    #[must_use]
    pub fn next_poll_interval(&self) -> Duration {
        next_poll_interval_with(
            &mut rand::thread_rng(),
            self.poll_interval_sec,
            self.poll_interval_jitter_ratio,
        )
    }

    /// One-time start-up delay.
    #[must_use]
    pub fn next_jitter_interval(&self) -> Duration {
        next_jitter_interval_with(
            &mut rand::thread_rng(),
            self.poll_interval_sec,
            self.poll_interval_jitter_ratio,
        )
    }

    /// Effective snapshot lookback.
    #[must_use]
    pub fn snapshots_lookback(&self) -> Duration {
        self.snapshots_lookback_sec
            .and_then(|secs| u64::try_from(secs).ok())
            .map_or(DEFAULT_SNAPSHOTS_LOOKBACK, Duration::from_secs)
    }

    /// Effective time-window availability slot length in hours.
    #[must_use]
    pub fn availability_time_window_duration_hrs(&self) -> i64 {
        self.availability_time_window_duration_hrs
            .unwrap_or(DEFAULT_AVAILABILITY_TIME_WINDOW_DURATION_HRS)
    }

    /// Clinical urgency section derived from these settings.
    #[must_use]
    pub fn clinical_urgency_config(&self) -> Option<ClinicalUrgencyConfig> {
        self.clinical_urgency_lateness_cost_usd_mills_per_ms
            .map(|cost| ClinicalUrgencyConfig {
                higher_level_value_wins: LinearOffsetPolicy {
                    linear_offset_cost_usd_mills_per_ms: cost,
                    offset_prior_to_time_window_end_ms: HOUR_MS,
                },
            })
    }

    /// Work distribution section derived from these settings.
    #[must_use]
    pub fn work_distribution_config(&self) -> Option<WorkDistributionConstraintConfig> {
        self.work_distribution_full_queue_value_limit_usd_mills
            .map(|limit| WorkDistributionConstraintConfig {
                exponential_policy: ExponentialPolicy {
                    base_numerator: 2,
                    base_denominator: 1,
                    full_queue_value_limit_usd_mills: limit,
                },
            })
    }

    /// Opportunity cost section, absent when neither part is configured.
    #[must_use]
    pub fn opportunity_cost_config(&self) -> Option<OpportunityCostConfig> {
        let foregone = self
            .foregone_visit_cost_cents_per_minute
            .filter(|cents| *cents > 0.0);
        if self.on_scene_cost_scale_factor.is_none() && foregone.is_none() {
            return None;
        }
        Some(OpportunityCostConfig {
            on_scene_cost_scale_factor: self.on_scene_cost_scale_factor,
            foregone_visit_cost_cents_per_minute: foregone,
        })
    }
}

/// An attribute category and the variants probed for it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailabilityAttribute {
    /// Category name, e.g. `service_name`.
    pub name: String,
    /// Variant names, e.g. `acute`, `bridge`.
    pub variants: Vec<String>,
}

/// Share of shift team capacity offered on each horizon day.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacitySettings {
    /// Teams carrying all of these attributes are affected.
    pub shift_team_attributes: Vec<String>,
    /// Percentage of the working window offered, indexed by horizon day.
    /// Days past the end of the list are offered in full.
    pub capacity_percent_for_horizon_days: Vec<u32>,
}

impl CapacitySettings {
    /// Capacity percentage for a horizon day.
    #[must_use]
    pub fn percent_for_horizon_day(&self, horizon_day: u32) -> u32 {
        usize::try_from(horizon_day)
            .ok()
            .and_then(|day| self.capacity_percent_for_horizon_days.get(day))
            .copied()
            .unwrap_or(100)
    }

    /// Whether the settings apply to a team with the given attributes.
    #[must_use]
    pub fn applies_to(&self, team_attributes: &[String]) -> bool {
        self.shift_team_attributes
            .iter()
            .all(|required| team_attributes.contains(required))
    }
}

/// Availability probing settings for one service region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilitySettings {
    /// Attribute categories to combine into probe visits.
    pub attributes: Vec<AvailabilityAttribute>,
    /// Shift team capacity limits.
    pub capacity_settings: Vec<CapacitySettings>,
    /// Probe visits may arrive late.
    pub allow_late_availability_visits: bool,
    /// Probe visits may be dropped without penalty.
    pub allow_expendable_availability_visits: bool,
    /// Interval between runs for one instance.
    pub poll_interval_sec: i64,
    /// Share of the poll interval applied as random jitter.
    pub poll_interval_jitter_ratio: f64,
    /// Search time limit; 0 defers to the config row.
    pub optimizer_termination_duration_ms: i64,
    /// Stable-score timeout; 0 disables it.
    pub optimizer_unimproved_score_termination_duration_ms: i64,
    /// Optimizer config row to use.
    pub optimizer_config_id: i64,
    /// Shortest probe duration.
    pub min_visit_duration_sec: i64,
    /// Longest probe duration.
    pub max_visit_duration_sec: i64,
}

impl AvailabilitySettings {
    /// Sleep between runs, jittered around the poll interval.
    #[must_use]
    pub fn next_poll_interval(&self) -> Duration {
        next_poll_interval_with(
            &mut rand::thread_rng(),
            self.poll_interval_sec,
            self.poll_interval_jitter_ratio,
        )
    }

    /// One-time start-up delay.
    #[must_use]
    pub fn next_jitter_interval(&self) -> Duration {
        next_jitter_interval_with(
            &mut rand::thread_rng(),
            self.poll_interval_sec,
            self.poll_interval_jitter_ratio,
        )
    }

    /// Availability visit durations: the minimum, then the maximum.
    ///
    /// Both entries are kept even when they are equal, so every location and
    /// attribute combination gets one visit per entry.
    #[must_use]
    pub fn visit_durations_sec(&self) -> Vec<i64> {
        vec![self.min_visit_duration_sec, self.max_visit_duration_sec]
    }
}

/// All settings returned by one poll of the settings service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllSettings {
    /// Optimizer settings keyed by service region id.
    pub optimizer: BTreeMap<i64, OptimizerSettings>,
    /// Availability settings keyed by service region id.
    pub availability: BTreeMap<i64, AvailabilitySettings>,
}

impl AllSettings {
    /// Every optimizer config id referenced by any region.
    #[must_use]
    pub fn optimizer_config_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .optimizer
            .values()
            .map(|settings| settings.optimizer_config_id)
            .chain(
                self.availability
                    .values()
                    .map(|settings| settings.optimizer_config_id),
            )
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Resolved schedule configuration for one run instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsConfig {
    /// Region the instance belongs to.
    pub service_region_id: i64,
    /// Region settings.
    pub settings: OptimizerSettings,
    /// Optimizer config row named by the settings.
    pub config: OptimizerConfig,
}

impl SettingsConfig {
    /// Settings override when positive, otherwise the config row value.
    #[must_use]
    pub const fn termination_duration_ms(&self) -> i64 {
        if self.settings.optimizer_termination_duration_ms > 0 {
            self.settings.optimizer_termination_duration_ms
        } else {
            self.config.termination_duration_ms
        }
    }
}

/// Resolved availability configuration for one run instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySettingsConfig {
    /// Region the instance belongs to.
    pub service_region_id: i64,
    /// Availability settings.
    pub settings: AvailabilitySettings,
    /// The region's optimizer settings, used for shared constraint layers.
    pub optimizer_settings: OptimizerSettings,
    /// Optimizer config row named by the availability settings.
    pub optimizer_config: OptimizerConfig,
}

impl AvailabilitySettingsConfig {
    /// Settings override when positive, otherwise the config row value.
    #[must_use]
    pub const fn termination_duration_ms(&self) -> i64 {
        if self.settings.optimizer_termination_duration_ms > 0 {
            self.settings.optimizer_termination_duration_ms
        } else {
            self.optimizer_config.termination_duration_ms
        }
    }
}

/// Errors returned by a [`SettingsService`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The backing source could not be read.
    #[error("failed to load settings from {source_name}")]
    Load {
        /// Human-readable name of the source.
        source_name: String,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The settings were read but are not usable.
    #[error("invalid settings: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

/// Source of region settings, polled by the runner.
#[async_trait]
pub trait SettingsService: Send + Sync {
    /// Return the settings for every enabled region.
    async fn all_settings(&self) -> Result<AllSettings, SettingsError>;
}

/// Draw a jitter in `[0, poll_interval * ratio)` milliseconds.
///
/// Returns zero when the interval or ratio is not positive, or when the
/// jitter range rounds down to nothing.
pub fn next_jitter_interval_ms_with<R: Rng + ?Sized>(
    rng: &mut R,
    poll_interval_sec: i64,
    jitter_ratio: f64,
) -> i64 {
    if poll_interval_sec <= 0 || jitter_ratio <= 0.0 {
        return 0;
    }
    let poll_ms = poll_interval_sec.saturating_mul(1000);
    let range_ms = (poll_ms as f64 * jitter_ratio) as i64;
    if range_ms <= 0 {
        return 0;
    }
    rng.gen_range(0..range_ms)
}

/// One-time jitter as a [`Duration`].
pub fn next_jitter_interval_with<R: Rng + ?Sized>(
    rng: &mut R,
    poll_interval_sec: i64,
    jitter_ratio: f64,
) -> Duration {
    let jitter_ms = next_jitter_interval_ms_with(rng, poll_interval_sec, jitter_ratio);
    Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
}

/// Poll interval with jitter spread evenly around it.
///
/// Odd jitter values are subtracted and even ones added; the result never
/// goes below zero.
pub fn next_poll_interval_with<R: Rng + ?Sized>(
    rng: &mut R,
    poll_interval_sec: i64,
    jitter_ratio: f64,
) -> Duration {
    if poll_interval_sec <= 0 {
        return Duration::ZERO;
    }
    let mut jitter_ms = next_jitter_interval_ms_with(rng, poll_interval_sec, jitter_ratio);
    if jitter_ms % 2 == 1 {
        jitter_ms = -jitter_ms;
    }
    let interval_ms = poll_interval_sec
        .saturating_mul(1000)
        .saturating_add(jitter_ms)
        .max(0);
    Duration::from_millis(u64::try_from(interval_ms).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0.5)]
    #[case(-5, 0.5)]
    fn non_positive_poll_interval_never_sleeps(#[case] poll: i64, #[case] ratio: f64) {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            next_poll_interval_with(&mut rng, poll, ratio),
            Duration::ZERO
        );
    }

    #[rstest]
    fn zero_ratio_returns_exact_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            next_poll_interval_with(&mut rng, 10, 0.0),
            Duration::from_secs(10)
        );
        assert_eq!(next_jitter_interval_with(&mut rng, 10, 0.0), Duration::ZERO);
    }

    #[rstest]
    fn tiny_ratio_does_not_draw_from_empty_range() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(next_jitter_interval_ms_with(&mut rng, 1, 0.0001), 0);
    }

    #[rstest]
    fn jittered_interval_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let interval = next_poll_interval_with(&mut rng, 10, 0.5);
            assert!(interval >= Duration::from_secs(5), "{interval:?}");
            assert!(interval < Duration::from_secs(15), "{interval:?}");
        }
    }

    #[rstest]
    fn jitter_is_drawn_below_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let jitter = next_jitter_interval_ms_with(&mut rng, 2, 0.25);
            assert!((0..500).contains(&jitter), "{jitter}");
        }
    }

    #[rstest]
    #[case::distinct(900, 1_800, [900, 1_800])]
    #[case::equal(1_200, 1_200, [1_200, 1_200])]
    #[case::max_unset(1_200, 0, [1_200, 0])]
    fn visit_durations_keep_min_then_max(
        #[case] min: i64,
        #[case] max: i64,
        #[case] expected: [i64; 2],
    ) {
        let settings = AvailabilitySettings {
            min_visit_duration_sec: min,
            max_visit_duration_sec: max,
            ..AvailabilitySettings::default()
        };
        assert_eq!(settings.visit_durations_sec(), expected);
    }

    #[rstest]
    fn opportunity_cost_absent_without_parts() {
        let settings = OptimizerSettings {
            foregone_visit_cost_cents_per_minute: Some(0.0),
            ..OptimizerSettings::default()
        };
        assert_eq!(settings.opportunity_cost_config(), None);
    }

    #[rstest]
    fn opportunity_cost_drops_non_positive_forgone_cost() {
        let settings = OptimizerSettings {
            on_scene_cost_scale_factor: Some(1.5),
            foregone_visit_cost_cents_per_minute: Some(-1.0),
            ..OptimizerSettings::default()
        };
        let config = settings.opportunity_cost_config().expect("on-scene cost set");
        assert_eq!(config.on_scene_cost_scale_factor, Some(1.5));
        assert_eq!(config.foregone_visit_cost_cents_per_minute, None);
    }

    #[rstest]
    fn derived_sections_follow_settings() {
        let settings = OptimizerSettings {
            clinical_urgency_lateness_cost_usd_mills_per_ms: Some(0.5),
            work_distribution_full_queue_value_limit_usd_mills: Some(99),
            ..OptimizerSettings::default()
        };
        let urgency = settings.clinical_urgency_config().expect("urgency");
        assert_eq!(
            urgency.higher_level_value_wins.offset_prior_to_time_window_end_ms,
            3_600_000
        );
        let distribution = settings.work_distribution_config().expect("distribution");
        assert_eq!(
            distribution.exponential_policy.full_queue_value_limit_usd_mills,
            99
        );
        assert_eq!(distribution.exponential_policy.base_numerator, 2);
    }

    #[rstest]
    fn lookback_defaults_to_sixty_days() {
        let settings = OptimizerSettings::default();
        assert_eq!(
            settings.snapshots_lookback(),
            Duration::from_secs(5_184_000)
        );
    }

    #[rstest]
    fn settings_parse_with_missing_fields() {
        let json = r#"{"optimizer": {"7": {"optimize_horizon_days": 3}}}"#;
        let all: AllSettings = serde_json::from_str(json).expect("parse settings");
        let region = all.optimizer.get(&7).expect("region 7");
        assert_eq!(region.optimize_horizon_days, 3);
        assert_eq!(region.current_day_schedule_max_staleness_sec, None);
        assert!(all.availability.is_empty());
    }

    #[rstest]
    fn capacity_defaults_to_full_past_configured_days() {
        let capacity = CapacitySettings {
            shift_team_attributes: vec!["app".to_owned()],
            capacity_percent_for_horizon_days: vec![100, 50],
        };
        assert_eq!(capacity.percent_for_horizon_day(1), 50);
        assert_eq!(capacity.percent_for_horizon_day(5), 100);
        assert!(capacity.applies_to(&["app".to_owned(), "dhmt".to_owned()]));
        assert!(!capacity.applies_to(&["dhmt".to_owned()]));
    }
}
