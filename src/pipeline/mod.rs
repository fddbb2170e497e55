//! Per-request search pipeline.
//!
//! For one inbound query the pipeline:
//!
//! 1. validates the `q` parameter,
//! 2. builds the cache key (the fully resolved upstream URL),
//! 3. looks the key up in the shared [`ResponseCache`],
//! 4. on a miss, fetches from upstream with no lock held and then stores the
//!    payload,
//! 5. extracts titles and hands them to the audit sink,
//! 6. turns the outcome into exactly one [`Response`].
//!
//! Concurrent misses for the same key each fetch upstream; the last insert
//! wins. Upstream failures end the request without touching the cache.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, AuditSink};
use crate::cache::ResponseCache;
use crate::extract::extract_titles;
use crate::http::request::InvalidQueryParam;
use crate::http::{Method, Request, Response, StatusCode};
use crate::upstream::{self, Fetcher, UpstreamError};

/// Name of the inbound query parameter carrying the search text.
pub const QUERY_PARAM: &str = "q";

/// Default bound on a single upstream call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that end a request with a non-success response.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing or empty query parameter `q`")]
    MissingQuery,

    #[error(transparent)]
    InvalidQuery(#[from] InvalidQueryParam),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingQuery | Self::InvalidQuery(_) => StatusCode::BadRequest,
            Self::Upstream(e) => e.status(),
        }
    }

    /// Short category prefix for the single-line error body.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingQuery | Self::InvalidQuery(_) => "client error",
            Self::Upstream(UpstreamError::Timeout { .. }) => "upstream timeout",
            Self::Upstream(UpstreamError::NotFound) => "not found",
            Self::Upstream(_) => "upstream failure",
        }
    }
}

/// Whether a search was answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// The result of one successful search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub titles: Vec<String>,
    pub cache: CacheOutcome,
}

// State owned by one pipeline invocation.
struct RequestContext<'q> {
    query: &'q str,
    key: String,
    cache: CacheOutcome,
    titles: Vec<String>,
}

/// Coordinates cache, upstream fetcher, title extraction and audit sink.
///
/// One instance is built at startup and shared (behind an `Arc`) by every
/// connection task.
///
/// # Examples
///
/// ```rust,no_run
/// use std::num::NonZeroUsize;
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tunecache::cache::ResponseCache;
/// use tunecache::pipeline::RequestPipeline;
/// use tunecache::upstream::HttpFetcher;
///
/// # fn build() -> Result<RequestPipeline, Box<dyn std::error::Error>> {
/// let cache = Arc::new(ResponseCache::new(NonZeroUsize::new(100).unwrap()));
/// let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(10))?);
/// let pipeline = RequestPipeline::new(cache, fetcher).path("/search");
/// # Ok(pipeline)
/// # }
/// ```
pub struct RequestPipeline {
    cache: Arc<ResponseCache>,
    fetcher: Arc<dyn Fetcher>,
    audit: Option<Arc<dyn AuditSink>>,
    endpoint: String,
    path: String,
    upstream_timeout: Duration,
}

impl RequestPipeline {
    /// Creates a pipeline serving `/` against the default catalog endpoint,
    /// with no audit sink.
    pub fn new(cache: Arc<ResponseCache>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            fetcher,
            audit: None,
            endpoint: upstream::DEFAULT_ENDPOINT.to_owned(),
            path: "/".to_owned(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Sets the upstream search endpoint the query is appended to.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the inbound path searches are served on.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    #[must_use]
    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// The canonical cache key for `query`: the upstream URL with the query
    /// percent-encoded (unreserved characters kept, space as `%20`).
    pub fn cache_key(&self, query: &str) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}{QUERY_PARAM}={}",
            self.endpoint,
            urlencoding::encode(query)
        )
    }

    /// Routes one inbound request and always produces exactly one response.
    pub async fn handle(&self, request: &Request) -> Response {
        let start = Instant::now();

        let response = if request.path() != self.path {
            Response::error(
                StatusCode::NotFound,
                format!("not found: no route for {}", request.path()),
            )
        } else if request.method() != &Method::Get {
            Response::error(
                StatusCode::MethodNotAllowed,
                format!("client error: method {} not allowed", request.method()),
            )
            .header("Allow", "GET")
        } else {
            let searched = match request.try_query_param(QUERY_PARAM) {
                Ok(query) => self.search(query).await,
                Err(e) => Err(e.into()),
            };
            match searched {
                Ok(outcome) => {
                    Response::lines(&outcome.titles).header("X-Cache", outcome.cache.as_str())
                }
                Err(e) => {
                    match &e {
                        PipelineError::MissingQuery | PipelineError::InvalidQuery(_) => {
                            debug!(error = %e, "rejected search")
                        }
                        PipelineError::Upstream(_) => warn!(error = %e, "search failed"),
                    }
                    Response::error(e.status(), format!("{}: {e}", e.category()))
                }
            }
        };

        info!(
            method = %request.method(),
            path = %request.path(),
            status = response.status().as_u16(),
            cache = response.headers().get("x-cache").unwrap_or("-"),
            elapsed = ?start.elapsed(),
            "request completed"
        );
        response
    }

    /// Runs the search for `query`, using the cache where possible.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingQuery`] if `query` is absent or blank; no
    ///   upstream call is made.
    /// - [`PipelineError::Upstream`] if the fetch fails, times out, or the
    ///   payload carries an upstream error object; the cache is left unchanged.
    pub async fn search(&self, query: Option<&str>) -> Result<SearchOutcome, PipelineError> {
        let query = query
            .filter(|q| !q.trim().is_empty())
            .ok_or(PipelineError::MissingQuery)?;

        let mut ctx = RequestContext {
            query,
            key: self.cache_key(query),
            cache: CacheOutcome::Miss,
            titles: Vec::new(),
        };

        let payload = match self.cache.lookup(&ctx.key) {
            Some(payload) => {
                debug!(query = ctx.query, key = %ctx.key, "served from cache");
                ctx.cache = CacheOutcome::Hit;
                payload
            }
            None => {
                let payload = self.fetch_and_store(&ctx.key).await?;
                debug!(query = ctx.query, key = %ctx.key, "fetched from upstream");
                payload
            }
        };

        ctx.titles = extract_titles(&payload).titles;

        if let Some(sink) = &self.audit {
            sink.record(AuditRecord::now(ctx.titles.clone()));
        }

        Ok(SearchOutcome {
            titles: ctx.titles,
            cache: ctx.cache,
        })
    }

    // No cache lock is held while the fetch is in flight.
    async fn fetch_and_store(&self, key: &str) -> Result<Arc<str>, UpstreamError> {
        let body = tokio::time::timeout(self.upstream_timeout, self.fetcher.fetch(key))
            .await
            .map_err(|_| UpstreamError::Timeout {
                after: self.upstream_timeout,
            })??;

        upstream::check_payload(&body)?;

        let payload: Arc<str> = Arc::from(body);
        if let Some((evicted, _)) = self
            .cache
            .insert_or_update(key.to_owned(), Arc::clone(&payload))
        {
            debug!(evicted = %evicted, "evicted least recently used entry");
        }
        Ok(payload)
    }
}
