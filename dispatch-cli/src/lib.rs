//! Command-line interface for operating the dispatch engine.
//!
//! `dispatch run` keeps the runner alive until interrupted, `dispatch plan`
//! previews the run instances current settings produce, `dispatch runs` lists
//! the run ledger, and `dispatch import` seeds regions and snapshots into the
//! logistics database.
#![forbid(unsafe_code)]

use std::future::Future;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use dispatch_data::SqliteLogisticsStore;
use serde::Serialize;

mod error;
mod import;
mod plan;
mod run;
mod runs;

pub use error::CliError;

use import::{ImportArgs, run_import};
use plan::{PlanArgs, run_plan};
use run::{RunArgs, run_run};
use runs::{RunsArgs, run_runs};

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_SETTINGS: &str = "settings";
pub(crate) const ARG_OPTIMIZER_URL: &str = "optimizer-url";
pub(crate) const ARG_OSRM_URL: &str = "osrm-url";
pub(crate) const ARG_OSRM_PROFILE: &str = "osrm-profile";
pub(crate) const ARG_SETTINGS_POLL_INTERVAL: &str = "settings-poll-interval-sec";
pub(crate) const ARG_AVAILABILITY_DEBUG: &str = "availability-debug";
pub(crate) const ARG_AT: &str = "at";
pub(crate) const ARG_REGION: &str = "region";
pub(crate) const ARG_LIMIT: &str = "limit";
pub(crate) const ARG_IMPORT_FILE: &str = "file";

pub(crate) const ENV_RUN_DATABASE: &str = "DISPATCH_CMDS_RUN_DATABASE";
pub(crate) const ENV_RUN_SETTINGS: &str = "DISPATCH_CMDS_RUN_SETTINGS";
pub(crate) const ENV_RUN_OPTIMIZER_URL: &str = "DISPATCH_CMDS_RUN_OPTIMIZER_URL";
pub(crate) const ENV_PLAN_DATABASE: &str = "DISPATCH_CMDS_PLAN_DATABASE";
pub(crate) const ENV_PLAN_SETTINGS: &str = "DISPATCH_CMDS_PLAN_SETTINGS";
pub(crate) const ENV_RUNS_DATABASE: &str = "DISPATCH_CMDS_RUNS_DATABASE";
pub(crate) const ENV_IMPORT_DATABASE: &str = "DISPATCH_CMDS_IMPORT_DATABASE";
pub(crate) const ENV_IMPORT_FILE: &str = "DISPATCH_CMDS_IMPORT_FILE";

/// Run the dispatch CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns the first argument, configuration, storage or I/O failure met by
/// the selected subcommand.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Run(args) => run_run(args),
        Command::Plan(args) => run_plan(args, &mut stdout),
        Command::Runs(args) => run_runs(args, &mut stdout),
        Command::Import(args) => run_import(args, &mut stdout),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "dispatch",
    about = "Continuous route optimization for field service regions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll settings and keep every region's schedule optimized.
    Run(RunArgs),
    /// Print the run instances the current settings expand to.
    Plan(PlanArgs),
    /// List recent optimizer runs from the logistics database.
    Runs(RunsArgs),
    /// Load service regions, optimizer configs and snapshots from JSON.
    Import(ImportArgs),
}

/// Drive `future` to completion on a fresh multi-threaded runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    Ok(runtime.block_on(future))
}

pub(crate) fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match dispatch_fs::is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::MissingSourceFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub(crate) fn open_store(path: &Utf8Path) -> Result<SqliteLogisticsStore, CliError> {
    SqliteLogisticsStore::open(path).map_err(|source| store_error(path, source))
}

pub(crate) fn store_error(path: &Utf8Path, source: dispatch_core::StoreError) -> CliError {
    CliError::Store {
        path: Utf8PathBuf::from(path),
        source,
    }
}

/// Write `value` as pretty JSON followed by a newline.
pub(crate) fn write_json<T: Serialize + ?Sized>(
    writer: &mut dyn Write,
    value: &T,
) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(CliError::SerializeOutput)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
mod tests;
