//! `import` command: seed the logistics database from a JSON bundle.
//!
//! The bundle is applied in dependency order: regions, then optimizer
//! configs, then attributes, then snapshots. Regions and configs are upserted
//! so re-importing the same bundle is harmless; snapshots are appended.
//! Records are stored one at a time, so a failure leaves earlier records in
//! place.
//!
//! ```json
//! {
//!   "service_regions": [
//!     { "id": 5, "name": "Denver", "iana_time_zone_name": "America/Denver" }
//!   ],
//!   "optimizer_configs": [{ "id": 1, "termination_duration_ms": 5000 }],
//!   "attributes": ["skill:ems"],
//!   "snapshots": []
//! }
//! ```

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use dispatch_core::{OptimizerConfig, ServiceRegion};
use dispatch_data::{RegionSnapshot, SqliteLogisticsStore};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_DATABASE, ARG_IMPORT_FILE, CliError, ENV_IMPORT_DATABASE, ENV_IMPORT_FILE, block_on,
    open_store, require_existing, store_error, write_json,
};

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "import",
    long_about = "Load service regions, optimizer configs, attributes and \
                 region snapshots from a JSON bundle into the logistics \
                 database, creating the database when it does not exist.",
    about = "Import a JSON bundle"
)]
#[ortho_config(prefix = "DISPATCH")]
pub(crate) struct ImportArgs {
    /// Path to the JSON bundle.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) file: Option<Utf8PathBuf>,
    /// Path to the SQLite logistics database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
}

impl ImportArgs {
    pub(crate) fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// Resolved `import` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportConfig {
    pub(crate) file: Utf8PathBuf,
    pub(crate) database: Utf8PathBuf,
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let file = args.file.ok_or(CliError::MissingArgument {
            field: ARG_IMPORT_FILE,
            env: ENV_IMPORT_FILE,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_IMPORT_DATABASE,
        })?;
        Ok(Self { file, database })
    }
}

/// Contents of an import file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ImportBundle {
    #[serde(default)]
    pub(crate) service_regions: Vec<ServiceRegion>,
    #[serde(default)]
    pub(crate) optimizer_configs: Vec<OptimizerConfig>,
    #[serde(default)]
    pub(crate) attributes: Vec<String>,
    #[serde(default)]
    pub(crate) snapshots: Vec<RegionSnapshot>,
}

/// Counts printed once the bundle is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ImportSummary {
    pub(crate) service_regions: usize,
    pub(crate) optimizer_configs: usize,
    pub(crate) attributes: usize,
    pub(crate) snapshot_ids: Vec<i64>,
}

pub(super) fn run_import(args: ImportArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    run_import_with(&config, writer)
}

pub(crate) fn run_import_with(
    config: &ImportConfig,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    require_existing(&config.file, ARG_IMPORT_FILE)?;
    let bundle = load_bundle(&config.file)?;
    let store = open_store(&config.database)?;
    let summary = block_on(apply_bundle(&store, bundle))?
        .map_err(|source| store_error(&config.database, source))?;
    log::info!(
        "imported {} regions and {} snapshots into {}",
        summary.service_regions,
        summary.snapshot_ids.len(),
        config.database
    );
    write_json(writer, &summary)
}

pub(crate) fn load_bundle(path: &Utf8Path) -> Result<ImportBundle, CliError> {
    let contents = dispatch_fs::read_to_string(path).map_err(|source| CliError::ReadImport {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| CliError::ParseImport {
        path: path.to_path_buf(),
        source,
    })
}

async fn apply_bundle(
    store: &SqliteLogisticsStore,
    bundle: ImportBundle,
) -> Result<ImportSummary, dispatch_core::StoreError> {
    let mut summary = ImportSummary::default();
    for region in bundle.service_regions {
        store.upsert_service_region(region).await?;
        summary.service_regions += 1;
    }
    for config in bundle.optimizer_configs {
        store.upsert_optimizer_config(config).await?;
        summary.optimizer_configs += 1;
    }
    if !bundle.attributes.is_empty() {
        summary.attributes = store.ensure_attributes(&bundle.attributes).await?.len();
    }
    for snapshot in bundle.snapshots {
        summary
            .snapshot_ids
            .push(store.add_region_snapshot(snapshot).await?);
    }
    Ok(summary)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ImportConfig, CliError> {
    let merged = ImportArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ImportConfig::try_from(merged)
}
