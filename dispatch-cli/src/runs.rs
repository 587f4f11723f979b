//! `runs` command: list the run ledger.

use std::io::Write;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use clap::Parser;
use dispatch_core::{OptimizerRunType, VrpScore};
use dispatch_data::RunSummary;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_DATABASE, ARG_LIMIT, ARG_REGION, CliError, ENV_RUNS_DATABASE, block_on, open_store,
    require_existing, store_error, write_json,
};

/// Rows listed when no limit is configured.
pub(crate) const DEFAULT_RUN_LIMIT: usize = 20;

/// CLI arguments for the `runs` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "runs",
    about = "List recent optimizer runs, newest first"
)]
#[ortho_config(prefix = "DISPATCH")]
pub(crate) struct RunsArgs {
    /// Path to the SQLite logistics database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Only list runs for this service region.
    #[arg(long = ARG_REGION, value_name = "id")]
    #[serde(default)]
    pub(crate) region: Option<i64>,
    /// Maximum number of runs to list.
    #[arg(long = ARG_LIMIT, value_name = "count")]
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

impl RunsArgs {
    pub(crate) fn into_config(self) -> Result<RunsConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        RunsConfig::try_from(merged)
    }
}

/// Resolved `runs` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunsConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) region: Option<i64>,
    pub(crate) limit: usize,
}

impl TryFrom<RunsArgs> for RunsConfig {
    type Error = CliError;

    fn try_from(args: RunsArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_RUNS_DATABASE,
        })?;
        Ok(Self {
            database,
            region: args.region,
            limit: args.limit.unwrap_or(DEFAULT_RUN_LIMIT),
        })
    }
}

/// One printed ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RunRow {
    pub(crate) id: i64,
    pub(crate) run_type: OptimizerRunType,
    pub(crate) service_region_id: i64,
    pub(crate) service_date: NaiveDate,
    pub(crate) snapshot_timestamp_sec: i64,
    pub(crate) optimizer_config_id: i64,
    pub(crate) service_version: String,
    pub(crate) schedule_count: i64,
    pub(crate) error_count: i64,
    #[serde(default)]
    pub(crate) latest_score: Option<VrpScore>,
}

impl From<RunSummary> for RunRow {
    fn from(summary: RunSummary) -> Self {
        let RunSummary {
            run,
            schedule_count,
            error_count,
            latest_score,
        } = summary;
        Self {
            id: run.id,
            run_type: run.run_type,
            service_region_id: run.service_region_id,
            service_date: run.service_date,
            snapshot_timestamp_sec: run.snapshot_timestamp_sec,
            optimizer_config_id: run.optimizer_config_id,
            service_version: run.service_version,
            schedule_count,
            error_count,
            latest_score,
        }
    }
}

pub(super) fn run_runs(args: RunsArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    run_runs_with(&config, writer)
}

/// The database must already exist; listing never creates one.
pub(crate) fn run_runs_with(config: &RunsConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    require_existing(&config.database, ARG_DATABASE)?;
    let store = open_store(&config.database)?;
    let summaries = block_on(store.recent_runs(config.region, config.limit))?
        .map_err(|source| store_error(&config.database, source))?;
    let rows: Vec<RunRow> = summaries.into_iter().map(RunRow::from).collect();
    write_json(writer, &rows)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<RunsConfig, CliError> {
    let merged = RunsArgs::merge_from_layers(layers).map_err(CliError::from)?;
    RunsConfig::try_from(merged)
}
