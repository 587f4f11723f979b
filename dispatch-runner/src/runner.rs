//! Instance discovery and the per-instance task loops.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use dispatch_core::{
    AllSettings, AvailabilitySettingsConfig, OptimizerConfig, RegionStore, RunInstanceKey,
    SettingsConfig, SettingsService, ValidationConfig,
};
use dispatch_solver::FeasibilitySolver;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::RunnerError;
use crate::instances::{AvailabilityConfigs, InstanceMaps, ScheduleConfigs, new_instance_keys};
use crate::metrics::{RunMetrics, RunResult};

/// Interval between settings polls unless configured otherwise.
pub const DEFAULT_SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Discovers run instances from settings and keeps one task per instance.
pub struct Runner {
    pub(crate) store: Arc<dyn RegionStore>,
    settings_service: Arc<dyn SettingsService>,
    pub(crate) solver: Arc<dyn FeasibilitySolver>,
    settings_poll_interval: Duration,
    pub(crate) availability_debug: bool,
    pub(crate) validation: ValidationConfig,
    instances: InstanceMaps,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("settings_poll_interval", &self.settings_poll_interval)
            .field("availability_debug", &self.availability_debug)
            .field("validation", &self.validation)
            .field("instances", &self.instances)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Runner with the default poll interval, the default validators and
    /// debugging off.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegionStore>,
        settings_service: Arc<dyn SettingsService>,
        solver: Arc<dyn FeasibilitySolver>,
    ) -> Self {
        Self {
            store,
            settings_service,
            solver,
            settings_poll_interval: DEFAULT_SETTINGS_POLL_INTERVAL,
            availability_debug: false,
            validation: ValidationConfig::default(),
            instances: InstanceMaps::default(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Poll settings at `interval`.
    #[must_use]
    pub const fn with_settings_poll_interval(mut self, interval: Duration) -> Self {
        self.settings_poll_interval = interval;
        self
    }

    /// Log every availability request body.
    #[must_use]
    pub const fn with_availability_debug(mut self, enabled: bool) -> Self {
        self.availability_debug = enabled;
        self
    }

    /// Check problems with `validation` before they are solved.
    #[must_use]
    pub fn with_validation_config(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Stop through `token` instead of a private one.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The live instance maps.
    #[must_use]
    pub const fn instances(&self) -> &InstanceMaps {
        &self.instances
    }

    /// Token that stops the discovery loop and every instance task.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the discovery loop.
    ///
    /// Each iteration refreshes the instance maps and starts tasks for new
    /// instances. The loop ends when the runner is cancelled.
    #[must_use]
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!(
                "starting runner with settings poll interval {:?}",
                self.settings_poll_interval
            );
            loop {
                if let Err(err) = self.populate_instance_settings(Utc::now()).await {
                    log::error!("failed to refresh instance settings: {err}");
                }
                if !self.sleep_unless_cancelled(self.settings_poll_interval).await {
                    break;
                }
            }
            log::info!("runner stopped polling settings");
        })
    }

    /// Cancel everything and wait for the instance tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                log::error!("instance task failed: {err}");
            }
        }
    }

    /// Refresh the instance maps and spawn tasks for new instances.
    ///
    /// Tasks that stopped since the last refresh are collected first.
    /// Returns the number of tasks started. On error the previous maps stay
    /// in force.
    ///
    /// # Errors
    ///
    /// Propagates any failure of [`Runner::instance_settings`].
    pub async fn populate_instance_settings(
        self: &Arc<Self>,
        now: DateTime<Utc>,
    ) -> Result<usize, RunnerError> {
        let (schedule, availability) = self.instance_settings(now).await?;
        let (old_schedule, old_availability) = self
            .instances
            .replace(schedule.clone(), availability.clone());
        let schedule_keys = new_instance_keys(&schedule, &old_schedule);
        let availability_keys = new_instance_keys(&availability, &old_availability);
        log::debug!(
            "settings refreshed: {} new schedule and {} new availability instances",
            schedule_keys.len(),
            availability_keys.len()
        );

        let started = schedule_keys.len() + availability_keys.len();
        let mut tasks = self.lock_tasks();
        reap_finished(&mut tasks);
        for key in schedule_keys {
            tasks.spawn(Arc::clone(self).schedule_instance(key));
        }
        for key in availability_keys {
            tasks.spawn(Arc::clone(self).availability_instance(key));
        }
        Ok(started)
    }

    /// Expand the current settings into instance maps.
    ///
    /// Schedule instances cover `optimize_horizon_days` local dates starting
    /// today in the region's time zone. Availability instances cover the same
    /// dates and carry their horizon day.
    ///
    /// # Errors
    ///
    /// Fails when settings or regions cannot be loaded, a time zone is
    /// unknown, a config row is missing, or availability is configured for a
    /// region without optimizer settings.
    pub async fn instance_settings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(ScheduleConfigs, AvailabilityConfigs), RunnerError> {
        let all = self.settings_service.all_settings().await?;
        let configs = self.load_configs(&all).await?;
        let config_for = |config_id: i64| {
            configs
                .get(&config_id)
                .cloned()
                .ok_or(RunnerError::MissingOptimizerConfig { config_id })
        };

        let mut dates_by_region = BTreeMap::new();
        let mut schedule = ScheduleConfigs::new();
        for (region_id, settings) in &all.optimizer {
            let dates = self
                .horizon_dates(*region_id, settings.optimize_horizon_days, now)
                .await?;
            let config = Arc::new(SettingsConfig {
                service_region_id: *region_id,
                settings: settings.clone(),
                config: config_for(settings.optimizer_config_id)?,
            });
            for (_, service_date) in &dates {
                schedule.insert(
                    RunInstanceKey {
                        service_region_id: *region_id,
                        service_date: *service_date,
                        horizon_day: None,
                    },
                    Arc::clone(&config),
                );
            }
            dates_by_region.insert(*region_id, dates);
        }

        let mut availability = AvailabilityConfigs::new();
        for (region_id, settings) in &all.availability {
            let (Some(optimizer_settings), Some(dates)) =
                (all.optimizer.get(region_id), dates_by_region.get(region_id))
            else {
                return Err(RunnerError::InconsistentSettings {
                    service_region_id: *region_id,
                });
            };
            let config_id = if settings.optimizer_config_id > 0 {
                settings.optimizer_config_id
            } else {
                optimizer_settings.optimizer_config_id
            };
            let config = Arc::new(AvailabilitySettingsConfig {
                service_region_id: *region_id,
                settings: settings.clone(),
                optimizer_settings: optimizer_settings.clone(),
                optimizer_config: config_for(config_id)?,
            });
            for (horizon_day, service_date) in dates {
                availability.insert(
                    RunInstanceKey {
                        service_region_id: *region_id,
                        service_date: *service_date,
                        horizon_day: Some(*horizon_day),
                    },
                    Arc::clone(&config),
                );
            }
        }
        Ok((schedule, availability))
    }

    async fn load_configs(
        &self,
        all: &AllSettings,
    ) -> Result<BTreeMap<i64, OptimizerConfig>, RunnerError> {
        let ids = all.optimizer_config_ids();
        let rows = self.store.optimizer_configs_by_ids(&ids).await?;
        Ok(rows.into_iter().map(|row| (row.id, row)).collect())
    }

    async fn horizon_dates(
        &self,
        service_region_id: i64,
        horizon_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(u32, NaiveDate)>, RunnerError> {
        let region = self.store.service_region(service_region_id).await?;
        let time_zone: Tz =
            region
                .iana_time_zone_name
                .parse()
                .map_err(|_| RunnerError::InvalidTimeZone {
                    service_region_id,
                    name: region.iana_time_zone_name.clone(),
                })?;
        let today = now.with_timezone(&time_zone).date_naive();
        let days = u32::try_from(horizon_days).unwrap_or(0);
        Ok((0..days)
            .filter_map(|day| {
                today
                    .checked_add_days(Days::new(u64::from(day)))
                    .map(|date| (day, date))
            })
            .collect())
    }

    async fn schedule_instance(self: Arc<Self>, key: RunInstanceKey) {
        let Some(first) = self.instances.schedule_config(&key) else {
            return;
        };
        if !self
            .sleep_unless_cancelled(first.settings.next_jitter_interval())
            .await
        {
            return;
        }
        drop(first);
        loop {
            let Some(config) = self.instances.schedule_config(&key) else {
                log::info!("schedule runner for {key} not enabled, stopping");
                return;
            };
            let started = Instant::now();
            let outcome = self
                .run_schedule(&config, key.service_date, Utc::now())
                .await;
            self.report("schedule", &key, outcome, started);
            if !self
                .sleep_unless_cancelled(config.settings.next_poll_interval())
                .await
            {
                return;
            }
        }
    }

    async fn availability_instance(self: Arc<Self>, key: RunInstanceKey) {
        let Some(first) = self.instances.availability_config(&key) else {
            return;
        };
        if !self
            .sleep_unless_cancelled(first.settings.next_jitter_interval())
            .await
        {
            return;
        }
        drop(first);
        loop {
            let Some(config) = self.instances.availability_config(&key) else {
                log::info!("availability runner for {key} not enabled, stopping");
                return;
            };
            let started = Instant::now();
            let outcome = self
                .run_availability(&config, key.service_date, Utc::now(), key.horizon_day)
                .await;
            self.report("availability", &key, outcome, started);
            if !self
                .sleep_unless_cancelled(config.settings.next_poll_interval())
                .await
            {
                return;
            }
        }
    }

    fn report(
        &self,
        run: &str,
        key: &RunInstanceKey,
        outcome: Result<Option<RunResult>, RunnerError>,
        started: Instant,
    ) {
        let elapsed = started.elapsed();
        let metrics = match &outcome {
            Ok(None) => {
                log::debug!("{run} runner for {key}: nothing to do");
                RunMetrics::from_run(None, None, elapsed)
            }
            Ok(Some(result)) => RunMetrics::from_run(Some(result), None, elapsed),
            Err(err) => {
                log::error!("{run} run for {key} failed: {err}");
                RunMetrics::from_run(None, Some(err as &dyn std::error::Error), elapsed)
            }
        };
        metrics.log(run, key);
    }

    /// Sleep for `duration`; `false` when cancelled first.
    async fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop the handles of instance tasks that have already returned.
fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(err) = joined {
            log::error!("instance task failed: {err}");
        }
    }
}
