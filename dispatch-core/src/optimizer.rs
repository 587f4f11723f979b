use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::vrp::{SolveVrpRequest, SolveVrpResponse};

/// Errors raised while talking to the optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizerError {
    /// The optimizer could not be reached or refused the request.
    #[error("optimizer unavailable: {message}")]
    Unavailable {
        /// Transport or status detail.
        message: String,
    },
    /// The solution stream failed after it was opened.
    #[error("optimizer stream failed: {message}")]
    Stream {
        /// Failure detail.
        message: String,
    },
    /// The request could not be encoded or was rejected as malformed.
    #[error("invalid optimizer request: {message}")]
    InvalidRequest {
        /// Failure detail.
        message: String,
    },
}

/// Stream of solutions produced for one request.
pub type SolutionStream = BoxStream<'static, Result<SolveVrpResponse, OptimizerError>>;

/// Narrow interface to the external optimizer.
///
/// Opening the stream may fail; once open, each item is either a solution or
/// a terminal error. The stream ends when the optimizer finishes.
#[async_trait]
pub trait OptimizerClient: Send + Sync {
    /// Submit a request and return its solution stream.
    async fn solve_vrp(&self, request: SolveVrpRequest) -> Result<SolutionStream, OptimizerError>;
}
