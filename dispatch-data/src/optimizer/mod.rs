//! HTTP client for an optimizer that streams solutions as NDJSON.
//!
//! The optimizer accepts a JSON [`SolveVrpRequest`] on `POST /v1/solve-vrp`
//! and answers with one JSON document per line. Each line is either a
//! [`SolveVrpResponse`] or `{"error": "..."}`, which ends the stream.

mod ndjson;

use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{OptimizerClient, OptimizerError, SolutionStream, SolveVrpRequest};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::http::{ClientBuildError, build_client, normalise_base_url};

pub use ndjson::solution_stream;

/// Default user agent for optimizer requests.
pub const DEFAULT_USER_AGENT: &str = "dispatch-optimizer-client/0.1";

/// Path of the streaming solve endpoint.
pub const SOLVE_VRP_PATH: &str = "/v1/solve-vrp";

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration for [`HttpOptimizerClient`].
///
/// There is no overall request timeout by default: a solve streams for as
/// long as its termination duration, which the request itself carries.
#[derive(Debug, Clone)]
pub struct HttpOptimizerClientConfig {
    /// Base URL of the optimizer service.
    pub base_url: String,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Upper bound on a whole solve, when set.
    pub request_timeout: Option<Duration>,
    /// User agent string for requests.
    pub user_agent: String,
}

impl HttpOptimizerClientConfig {
    /// Create a configuration for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound the duration of a whole solve.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// [`OptimizerClient`] speaking JSON in and NDJSON out over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOptimizerClient {
    client: Client,
    solve_url: String,
}

impl HttpOptimizerClient {
    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client fails
    /// to build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientBuildError> {
        Self::with_config(HttpOptimizerClientConfig::new(base_url))
    }

    /// Create a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client fails
    /// to build.
    pub fn with_config(config: HttpOptimizerClientConfig) -> Result<Self, ClientBuildError> {
        let base_url = normalise_base_url(&config.base_url)?;
        let client = build_client(
            &config.user_agent,
            config.connect_timeout,
            config.request_timeout,
        )?;
        Ok(Self {
            client,
            solve_url: format!("{base_url}{SOLVE_VRP_PATH}"),
        })
    }

    /// URL requests are posted to.
    #[must_use]
    pub fn solve_url(&self) -> &str {
        &self.solve_url
    }
}

#[async_trait]
impl OptimizerClient for HttpOptimizerClient {
    async fn solve_vrp(&self, request: SolveVrpRequest) -> Result<SolutionStream, OptimizerError> {
        let body =
            serde_json::to_vec(&request).map_err(|err| OptimizerError::InvalidRequest {
                message: err.to_string(),
            })?;
        log::debug!(
            "posting {} visits to {}",
            request.problem.description.visits.len(),
            self.solve_url
        );
        let response = self
            .client
            .post(&self.solve_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|err| OptimizerError::Unavailable {
                message: format!("POST {}: {err}", self.solve_url),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("POST {} returned {status}: {}", self.solve_url, detail.trim());
            return Err(if status.is_client_error() {
                OptimizerError::InvalidRequest { message }
            } else {
                OptimizerError::Unavailable { message }
            });
        }

        let chunks = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let lines = StreamReader::new(chunks).lines();
        Ok(solution_stream(lines).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn solve_url_joins_base_and_path() {
        let client = HttpOptimizerClient::new("http://optimizer.internal:8080/").expect("client");
        assert_eq!(
            client.solve_url(),
            "http://optimizer.internal:8080/v1/solve-vrp"
        );
    }

    #[rstest]
    fn config_builder_pattern() {
        let config = HttpOptimizerClientConfig::new("http://example.com")
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(90))
            .with_user_agent("test-agent/1.0");

        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.user_agent, "test-agent/1.0");
    }

    #[rstest]
    fn invalid_base_urls_fail_to_build() {
        let err = HttpOptimizerClient::new("ftp://example.com").expect_err("bad scheme");
        assert!(matches!(err, ClientBuildError::UnsupportedScheme { .. }));
    }
}
