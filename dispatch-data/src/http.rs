//! Client construction shared by the HTTP adapters.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::Url;

/// Error raised while constructing an HTTP adapter.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// The base URL is not an absolute HTTP(S) URL.
    #[error("invalid base URL {url:?}")]
    InvalidBaseUrl {
        /// URL as configured.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The base URL uses a scheme other than `http` or `https`.
    #[error("unsupported URL scheme {scheme:?} in {url:?}")]
    UnsupportedScheme {
        /// URL as configured.
        url: String,
        /// Offending scheme.
        scheme: String,
    },
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// Validate `base_url` and return it without a trailing slash.
pub(crate) fn normalise_base_url(base_url: &str) -> Result<String, ClientBuildError> {
    let parsed = Url::parse(base_url).map_err(|source| ClientBuildError::InvalidBaseUrl {
        url: base_url.to_owned(),
        source,
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(base_url.trim_end_matches('/').to_owned()),
        other => Err(ClientBuildError::UnsupportedScheme {
            url: base_url.to_owned(),
            scheme: other.to_owned(),
        }),
    }
}

pub(crate) fn build_client(
    user_agent: &str,
    connect_timeout: Duration,
    timeout: Option<Duration>,
) -> Result<Client, ClientBuildError> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout);
    if let Some(limit) = timeout {
        builder = builder.timeout(limit);
    }
    builder.build().map_err(ClientBuildError::HttpClient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://osrm.internal:5000/", "http://osrm.internal:5000")]
    #[case("https://optimizer.example.com", "https://optimizer.example.com")]
    fn trailing_slashes_are_removed(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalise_base_url(input).expect("valid URL"), expected);
    }

    #[rstest]
    fn relative_urls_are_rejected() {
        let err = normalise_base_url("localhost:5000/route").expect_err("no scheme");
        assert!(matches!(err, ClientBuildError::UnsupportedScheme { .. }));
        let err = normalise_base_url("not a url").expect_err("unparseable");
        assert!(matches!(err, ClientBuildError::InvalidBaseUrl { .. }));
    }
}
