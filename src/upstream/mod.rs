//! Outbound side of the proxy: fetching search results from the catalog API.
//!
//! [`Fetcher`] is the seam the pipeline depends on. [`HttpFetcher`] is the
//! production implementation backed by `reqwest`; tests substitute their own.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::http::StatusCode;

/// Default search endpoint of the music catalog.
pub const DEFAULT_ENDPOINT: &str = "https://api.deezer.com/search";

/// Error code the catalog uses in an error object when a search has no data.
const NO_DATA_CODE: i64 = 800;

/// Failures talking to the upstream catalog.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream did not answer within {after:?}")]
    Timeout { after: Duration },

    #[error("upstream has no such item")]
    NotFound,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream reported {kind}: {message}")]
    Api { kind: String, message: String },
}

impl UpstreamError {
    /// The status the proxy answers with when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::GatewayTimeout,
            Self::NotFound => StatusCode::NotFound,
            Self::Status(_) | Self::Transport(_) | Self::Api { .. } => StatusCode::BadGateway,
        }
    }
}

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<String, UpstreamError>> + Send + 'a>>;

/// Performs one GET against a fully formed upstream URL.
///
/// Implementations must not retry; the pipeline bounds every call with its
/// own timeout.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

/// [`Fetcher`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Builds a client whose connect phase and whole request are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Transport`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("tunecache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    async fn get(&self, url: &str) -> Result<String, UpstreamError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "upstream answered");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound);
        }
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout {
                after: self.timeout,
            }
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(self.get(url))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Checks a `200 OK` payload for an error object such as
/// `{"error":{"type":"DataException","message":"no data","code":800}}`.
///
/// Payloads that are not JSON objects pass through; title extraction deals
/// with them.
pub fn check_payload(payload: &str) -> Result<(), UpstreamError> {
    let Ok(ErrorEnvelope { error: Some(error) }) = serde_json::from_str::<ErrorEnvelope>(payload)
    else {
        return Ok(());
    };

    if error.code == Some(NO_DATA_CODE) {
        return Err(UpstreamError::NotFound);
    }
    Err(UpstreamError::Api {
        kind: error.kind.unwrap_or_else(|| "error".to_owned()),
        message: error.message.unwrap_or_default(),
    })
}
