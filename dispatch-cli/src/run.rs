//! `run` command: keep the runner alive until interrupted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use dispatch_core::{RegionStore, RouteProvider, RunStore};
use dispatch_data::{
    HttpOptimizerClient, JsonSettingsService, OsrmRouteProvider, OsrmRouteProviderConfig,
};
use dispatch_runner::{DEFAULT_SETTINGS_POLL_INTERVAL, Runner};
use dispatch_solver::VrpSolver;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_AVAILABILITY_DEBUG, ARG_DATABASE, ARG_OPTIMIZER_URL, ARG_OSRM_PROFILE, ARG_OSRM_URL,
    ARG_SETTINGS, ARG_SETTINGS_POLL_INTERVAL, CliError, ENV_RUN_DATABASE, ENV_RUN_OPTIMIZER_URL,
    ENV_RUN_SETTINGS, block_on, open_store, require_existing,
};

/// CLI arguments for the `run` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "run",
    long_about = "Poll the settings file, expand it into one run instance per \
                 region and service date, and keep each instance optimized \
                 against the optimizer service until interrupted.",
    about = "Run the dispatch scheduler"
)]
#[ortho_config(prefix = "DISPATCH")]
pub(crate) struct RunArgs {
    /// Path to the SQLite logistics database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Path to the JSON region settings file.
    #[arg(long = ARG_SETTINGS, value_name = "path")]
    #[serde(default)]
    pub(crate) settings: Option<Utf8PathBuf>,
    /// Base URL of the optimizer service (e.g. "http://localhost:8181").
    #[arg(long = ARG_OPTIMIZER_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) optimizer_url: Option<String>,
    /// Base URL of an OSRM server used for route polylines.
    #[arg(long = ARG_OSRM_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) osrm_url: Option<String>,
    /// OSRM routing profile; defaults to "driving".
    #[arg(long = ARG_OSRM_PROFILE, value_name = "profile")]
    #[serde(default)]
    pub(crate) osrm_profile: Option<String>,
    /// Seconds between settings polls.
    #[arg(long = ARG_SETTINGS_POLL_INTERVAL, value_name = "seconds")]
    #[serde(default)]
    pub(crate) settings_poll_interval_sec: Option<u64>,
    /// Log every availability probe result.
    #[arg(long = ARG_AVAILABILITY_DEBUG, value_name = "bool")]
    #[serde(default)]
    pub(crate) availability_debug: Option<bool>,
}

impl RunArgs {
    pub(crate) fn into_config(self) -> Result<RunConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        RunConfig::try_from(merged)
    }
}

/// Resolved `run` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) settings: Utf8PathBuf,
    pub(crate) optimizer_url: String,
    pub(crate) osrm_url: Option<String>,
    pub(crate) osrm_profile: Option<String>,
    pub(crate) settings_poll_interval: Duration,
    pub(crate) availability_debug: bool,
}

impl RunConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.settings, ARG_SETTINGS)
    }

    /// Wire the store, adapters and solver into a runner.
    pub(crate) fn build_runner(&self) -> Result<Runner, CliError> {
        let store = Arc::new(open_store(&self.database)?);
        let client = HttpOptimizerClient::new(self.optimizer_url.clone()).map_err(|source| {
            CliError::BuildClient {
                base_url: self.optimizer_url.clone(),
                source,
            }
        })?;
        let mut solver =
            VrpSolver::new(Arc::new(client)).with_store(Arc::clone(&store) as Arc<dyn RunStore>);
        if let Some(provider) = self.route_provider()? {
            solver = solver.with_route_provider(provider);
        }
        let settings = Arc::new(JsonSettingsService::new(self.settings.clone()));
        Ok(Runner::new(store as Arc<dyn RegionStore>, settings, Arc::new(solver))
            .with_settings_poll_interval(self.settings_poll_interval)
            .with_availability_debug(self.availability_debug))
    }

    fn route_provider(&self) -> Result<Option<Arc<dyn RouteProvider>>, CliError> {
        let Some(base_url) = &self.osrm_url else {
            return Ok(None);
        };
        let mut config = OsrmRouteProviderConfig::new(base_url.clone());
        if let Some(profile) = &self.osrm_profile {
            config = config.with_profile(profile.clone());
        }
        let provider =
            OsrmRouteProvider::with_config(config).map_err(|source| CliError::BuildClient {
                base_url: base_url.clone(),
                source,
            })?;
        Ok(Some(Arc::new(provider)))
    }
}

impl TryFrom<RunArgs> for RunConfig {
    type Error = CliError;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_RUN_DATABASE,
        })?;
        let settings = args.settings.ok_or(CliError::MissingArgument {
            field: ARG_SETTINGS,
            env: ENV_RUN_SETTINGS,
        })?;
        let optimizer_url = args.optimizer_url.ok_or(CliError::MissingArgument {
            field: ARG_OPTIMIZER_URL,
            env: ENV_RUN_OPTIMIZER_URL,
        })?;
        let settings_poll_interval = args
            .settings_poll_interval_sec
            .filter(|seconds| *seconds > 0)
            .map_or(DEFAULT_SETTINGS_POLL_INTERVAL, Duration::from_secs);
        Ok(Self {
            database,
            settings,
            optimizer_url,
            osrm_url: args.osrm_url,
            osrm_profile: args.osrm_profile,
            settings_poll_interval,
            availability_debug: args.availability_debug.unwrap_or(false),
        })
    }
}

pub(super) fn run_run(args: RunArgs) -> Result<(), CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    block_on(async move {
        let runner = Arc::new(config.build_runner()?);
        serve(runner, tokio::signal::ctrl_c()).await
    })?
}

/// Start `runner` and stop it once `shutdown` resolves.
pub(crate) async fn serve<S>(runner: Arc<Runner>, shutdown: S) -> Result<(), CliError>
where
    S: Future<Output = std::io::Result<()>>,
{
    let discovery = Arc::clone(&runner).start();
    let signal = shutdown.await;
    log::info!("shutting down runner");
    runner.shutdown().await;
    if let Err(err) = discovery.await {
        log::error!("settings discovery task failed: {err}");
    }
    signal.map_err(CliError::Signal)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<RunConfig, CliError> {
    let merged = RunArgs::merge_from_layers(layers).map_err(CliError::from)?;
    RunConfig::try_from(merged)
}
