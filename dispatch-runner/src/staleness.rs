//! Forced recomputation of today's schedule when it goes stale.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use dispatch_core::OptimizerRun;

/// Decides whether a schedule must be rebuilt without new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessChecker {
    /// Maximum age of today's schedule; `None` disables the check.
    pub current_day_schedule_max_staleness_sec: Option<i64>,
    /// Date the schedule is for.
    pub service_date: NaiveDate,
    /// Snapshot time of the pending run.
    pub latest_snapshot_timestamp: DateTime<Utc>,
    /// Region time zone.
    pub time_zone: Tz,
}

impl StalenessChecker {
    /// Whether the region must be re-solved even without new information.
    ///
    /// A region that has never been solved always is. Otherwise only a
    /// schedule for the current local day can go stale.
    #[must_use]
    pub fn should_force_recompute(&self, last_run: Option<&OptimizerRun>) -> bool {
        let Some(run) = last_run else {
            return true;
        };
        let Some(staleness_sec) = self.current_day_schedule_max_staleness_sec else {
            return false;
        };
        let local_date = self
            .latest_snapshot_timestamp
            .with_timezone(&self.time_zone)
            .date_naive();
        if local_date != self.service_date {
            return false;
        }
        DateTime::from_timestamp(run.snapshot_timestamp_sec, 0)
            .and_then(|snapshot| snapshot.checked_add_signed(TimeDelta::seconds(staleness_sec)))
            .is_some_and(|expires| expires < self.latest_snapshot_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Denver;
    use dispatch_core::{NewOptimizerRun, OptimizerRunType, TimeWindow};
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Denver
            .with_ymd_and_hms(2024, 5, 2, 10, 0, 0)
            .single()
            .expect("unambiguous local time")
            .with_timezone(&Utc)
    }

    fn run_at(snapshot: DateTime<Utc>) -> OptimizerRun {
        let template = NewOptimizerRun {
            service_region_id: 1,
            service_date: snapshot.date_naive(),
            open_hours: TimeWindow::new(0, 1),
            earliest_distance_timestamp_sec: 0,
            latest_distance_timestamp_sec: 0,
            snapshot_timestamp_sec: snapshot.timestamp(),
            optimizer_config_id: 1,
            service_version: "test".to_owned(),
        };
        OptimizerRun::from_new(1, OptimizerRunType::ServiceRegionSchedule, &template)
    }

    fn checker(now: DateTime<Utc>, staleness: Option<i64>, day_offset: i64) -> StalenessChecker {
        let today = now.with_timezone(&Denver).date_naive();
        StalenessChecker {
            current_day_schedule_max_staleness_sec: staleness,
            service_date: today + TimeDelta::days(day_offset),
            latest_snapshot_timestamp: now,
            time_zone: Denver,
        }
    }

    #[rstest]
    #[case::stale(Some(60), 0, 70, true)]
    #[case::fresh(Some(60), 0, 50, false)]
    #[case::boundary(Some(60), 0, 60, false)]
    #[case::tomorrow(Some(60), 1, 70, false)]
    #[case::yesterday(Some(60), -1, 70, false)]
    #[case::disabled(None, 0, 70, false)]
    fn recompute_follows_staleness(
        now: DateTime<Utc>,
        #[case] staleness: Option<i64>,
        #[case] day_offset: i64,
        #[case] age_sec: i64,
        #[case] expected: bool,
    ) {
        let last_run = run_at(now - TimeDelta::seconds(age_sec));
        assert_eq!(
            checker(now, staleness, day_offset).should_force_recompute(Some(&last_run)),
            expected
        );
    }

    #[rstest]
    fn recompute_without_previous_run(now: DateTime<Utc>) {
        assert!(checker(now, None, 1).should_force_recompute(None));
    }
}
