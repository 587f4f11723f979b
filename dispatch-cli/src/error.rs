//! Error types emitted by the dispatch CLI.
//!
//! Keep this error type reasonably small, as every command helper returns
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use dispatch_core::StoreError;
use dispatch_data::ClientBuildError;
use dispatch_runner::RunnerError;
use thiserror::Error;

/// Errors emitted by the dispatch CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// A referenced input path does not exist on disk or is not a file.
    #[error("{field} path {path:?} does not exist or is not a file")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// An instant option is not RFC 3339.
    #[error("--{field} value {value:?} is not an RFC 3339 instant: {source}")]
    InvalidInstant {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// The async runtime could not be started.
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Opening or querying the logistics database failed.
    #[error("logistics store {path:?} failed: {source}")]
    Store {
        path: Utf8PathBuf,
        #[source]
        source: StoreError,
    },
    /// Constructing an HTTP adapter failed.
    #[error("failed to build client for {base_url:?}: {source}")]
    BuildClient {
        base_url: String,
        #[source]
        source: ClientBuildError,
    },
    /// Expanding settings into run instances failed.
    #[error("failed to plan run instances: {0}")]
    Plan(#[source] RunnerError),
    /// Waiting for the shutdown signal failed.
    #[error("failed to listen for the shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
    /// Reading the import file failed.
    #[error("failed to read import file {path:?}: {source}")]
    ReadImport {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Import JSON could not be decoded.
    #[error("failed to parse import JSON at {path:?}: {source}")]
    ParseImport {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Serializing command output failed.
    #[error("failed to serialize output: {0}")]
    SerializeOutput(#[source] serde_json::Error),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
