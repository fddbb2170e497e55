//! # tunecache
//!
//! A caching HTTP proxy in front of a music-catalog search API.
//!
//! A client asks `GET /?q=imagine`; the proxy forwards the query to the
//! catalog's search endpoint, keeps the raw response in a bounded LRU cache,
//! and answers with the result titles, one per line. Repeated queries are
//! served from the cache without another upstream call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tunecache::cache::ResponseCache;
//! use tunecache::pipeline::RequestPipeline;
//! use tunecache::server::Server;
//! use tunecache::upstream::HttpFetcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(ResponseCache::new(NonZeroUsize::new(100).unwrap()));
//!     let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(10))?);
//!     let pipeline = Arc::new(RequestPipeline::new(cache, fetcher));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(move |req| {
//!         let pipeline = Arc::clone(&pipeline);
//!         async move { pipeline.handle(&req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── Request path ──────────────────────────────────────────────────────────────
pub mod cache;
pub mod pipeline;

// ── Collaborators ─────────────────────────────────────────────────────────────
pub mod audit;
pub mod extract;
pub mod http;
pub mod server;
pub mod upstream;

// ── Startup ───────────────────────────────────────────────────────────────────
pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{LruCache, ResponseCache, SharedCache};
pub use http::{Request, Response, StatusCode};
pub use pipeline::{PipelineError, RequestPipeline};
pub use server::{Server, ServerError};
