//! `plan` command: preview the run instances current settings expand to.

use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use dispatch_core::{RegionStore, RunInstanceKey};
use dispatch_data::{HttpOptimizerClient, JsonSettingsService};
use dispatch_runner::{AvailabilityConfigs, Runner, ScheduleConfigs};
use dispatch_solver::VrpSolver;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_AT, ARG_DATABASE, ARG_OPTIMIZER_URL, ARG_SETTINGS, CliError, ENV_PLAN_DATABASE,
    ENV_PLAN_SETTINGS, block_on, open_store, require_existing, write_json,
};

/// Optimizer address used when none is configured. Planning never calls it.
pub(crate) const DEFAULT_OPTIMIZER_URL: &str = "http://localhost:8181";

/// CLI arguments for the `plan` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "plan",
    long_about = "Expand the settings file into schedule and availability \
                 run instances as the runner would at the given instant, \
                 and print them as JSON without solving anything.",
    about = "Preview run instances"
)]
#[ortho_config(prefix = "DISPATCH")]
pub(crate) struct PlanArgs {
    /// Path to the SQLite logistics database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Path to the JSON region settings file.
    #[arg(long = ARG_SETTINGS, value_name = "path")]
    #[serde(default)]
    pub(crate) settings: Option<Utf8PathBuf>,
    /// Instant to plan for, as RFC 3339; defaults to now.
    #[arg(long = ARG_AT, value_name = "instant")]
    #[serde(default)]
    pub(crate) at: Option<String>,
    /// Base URL of the optimizer service.
    #[arg(long = ARG_OPTIMIZER_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) optimizer_url: Option<String>,
}

impl PlanArgs {
    pub(crate) fn into_config(self) -> Result<PlanConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        PlanConfig::try_from(merged)
    }
}

/// Resolved `plan` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlanConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) settings: Utf8PathBuf,
    pub(crate) at: DateTime<Utc>,
    pub(crate) optimizer_url: String,
}

impl TryFrom<PlanArgs> for PlanConfig {
    type Error = CliError;

    fn try_from(args: PlanArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_PLAN_DATABASE,
        })?;
        let settings = args.settings.ok_or(CliError::MissingArgument {
            field: ARG_SETTINGS,
            env: ENV_PLAN_SETTINGS,
        })?;
        let at = match args.at {
            Some(value) => parse_instant(ARG_AT, value)?,
            None => Utc::now(),
        };
        Ok(Self {
            database,
            settings,
            at,
            optimizer_url: args
                .optimizer_url
                .unwrap_or_else(|| DEFAULT_OPTIMIZER_URL.to_owned()),
        })
    }
}

pub(crate) fn parse_instant(
    field: &'static str,
    value: String,
) -> Result<DateTime<Utc>, CliError> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(instant) => Ok(instant.with_timezone(&Utc)),
        Err(source) => Err(CliError::InvalidInstant {
            field,
            value,
            source,
        }),
    }
}

/// One planned instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PlannedInstance {
    pub(crate) service_region_id: i64,
    pub(crate) service_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) horizon_day: Option<u32>,
    pub(crate) optimizer_config_id: i64,
}

impl PlannedInstance {
    const fn new(key: &RunInstanceKey, optimizer_config_id: i64) -> Self {
        Self {
            service_region_id: key.service_region_id,
            service_date: key.service_date,
            horizon_day: key.horizon_day,
            optimizer_config_id,
        }
    }
}

/// Everything `plan` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PlanOutput {
    pub(crate) at: DateTime<Utc>,
    pub(crate) schedule: Vec<PlannedInstance>,
    pub(crate) availability: Vec<PlannedInstance>,
}

impl PlanOutput {
    fn new(
        at: DateTime<Utc>,
        schedule: &ScheduleConfigs,
        availability: &AvailabilityConfigs,
    ) -> Self {
        Self {
            at,
            schedule: schedule
                .iter()
                .map(|(key, config)| PlannedInstance::new(key, config.config.id))
                .collect(),
            availability: availability
                .iter()
                .map(|(key, config)| PlannedInstance::new(key, config.optimizer_config.id))
                .collect(),
        }
    }
}

pub(super) fn run_plan(args: PlanArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    run_plan_with(&config, writer)
}

pub(crate) fn run_plan_with(config: &PlanConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    require_existing(&config.settings, ARG_SETTINGS)?;
    let output = block_on(plan(config))??;
    write_json(writer, &output)
}

async fn plan(config: &PlanConfig) -> Result<PlanOutput, CliError> {
    let store = Arc::new(open_store(&config.database)?);
    let client = HttpOptimizerClient::new(config.optimizer_url.clone()).map_err(|source| {
        CliError::BuildClient {
            base_url: config.optimizer_url.clone(),
            source,
        }
    })?;
    let runner = Runner::new(
        store as Arc<dyn RegionStore>,
        Arc::new(JsonSettingsService::new(config.settings.clone())),
        Arc::new(VrpSolver::new(Arc::new(client))),
    );
    let (schedule, availability) = runner
        .instance_settings(config.at)
        .await
        .map_err(CliError::Plan)?;
    log::debug!(
        "planned {} schedule and {} availability instances",
        schedule.len(),
        availability.len()
    );
    Ok(PlanOutput::new(config.at, &schedule, &availability))
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<PlanConfig, CliError> {
    let merged = PlanArgs::merge_from_layers(layers).map_err(CliError::from)?;
    PlanConfig::try_from(merged)
}
