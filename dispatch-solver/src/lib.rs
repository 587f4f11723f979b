//! Optimizer orchestration for the dispatch engine.
//!
//! This crate provides [`VrpSolver`], the pipeline that submits a routing
//! request to the external optimizer and streams its solutions back while a
//! [`ResultCollector`] persists them in order, and [`FeasibilityTree`], which
//! decomposes a feasibility question into independently solved problems and
//! recombines their answers.
//!
//! Stream and write failures during a run are recorded against the run and
//! logged. Only failures that prevent a run from starting surface as
//! [`SolveError`].

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod collector;
mod feasibility;
mod pipeline;

use dispatch_core::{OptimizerError, StoreError};
use thiserror::Error;

pub use collector::{CollectorContext, ResultCollector, WRITE_QUEUE_CAPACITY};
pub use feasibility::{
    Diagnostics, FeasibilityOutcome, FeasibilityStatus, FeasibilityTree, PartialFeasibility,
    SolveVrpInput, VrpDebugData, is_feasible_score,
};
pub use pipeline::{
    FeasibilitySolver, RESPONSE_CHANNEL_CAPACITY, SERVICE_DATE_FORMAT, SERVICE_DATE_TAG,
    SERVICE_REGION_TAG, SOLVE_VRP_USE_TAG, ShiftTeamRoutePolyline, SolveVrpParams, SolveVrpUse,
    VrpSolver, WrappedSolveVrpResponse,
};

/// Errors that prevent a solve or an evaluation from producing an answer.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The optimizer stream could not be opened.
    #[error("optimizer request failed")]
    OptimizerRequest(#[source] OptimizerError),
    /// The optimizer run could not be recorded.
    #[error("failed to record optimizer run")]
    AddRun(#[source] StoreError),
    /// The optimizer closed its stream without a solution.
    #[error("did not receive any expected response from optimizer")]
    EmptyResponse,
    /// The problem could not be serialised for diagnostics.
    #[error("failed to serialise VRP problem")]
    MarshalProblem(#[source] serde_json::Error),
}
