//! Startup configuration, read once from the command line and environment.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::server::{DEFAULT_KEEP_ALIVE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_SHUTDOWN_GRACE};
use crate::upstream::DEFAULT_ENDPOINT;

/// Rejected configuration values that clap cannot check on its own.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("upstream endpoint must be an http:// or https:// URL, got {0:?}")]
    Endpoint(String),

    #[error("serving path must start with '/', got {0:?}")]
    Path(String),

    #[error("upstream timeout must be at least one second")]
    Timeout,

    #[error("keep-alive timeout must be at least one second")]
    KeepAlive,
}

/// Caching proxy in front of a music-catalog search API.
#[derive(Debug, Clone, Parser)]
#[command(name = "tunecache", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "TUNECACHE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Maximum number of cached upstream responses
    #[arg(long, env = "TUNECACHE_CAPACITY", default_value = "100")]
    pub capacity: NonZeroUsize,

    /// Path searches are served on
    #[arg(long, env = "TUNECACHE_PATH", default_value = "/")]
    pub path: String,

    /// Upstream search endpoint; the query is appended as `q=`
    #[arg(long, env = "TUNECACHE_UPSTREAM", default_value = DEFAULT_ENDPOINT)]
    pub upstream_endpoint: String,

    /// Seconds to wait for one upstream response
    #[arg(long, env = "TUNECACHE_UPSTREAM_TIMEOUT", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    /// File completed searches are appended to
    #[arg(long, env = "TUNECACHE_AUDIT_LOG", default_value = "audit.log")]
    pub audit_log: PathBuf,

    /// Do not write the audit log
    #[arg(long)]
    pub no_audit: bool,

    /// Connections served at once; further connections wait to be accepted
    #[arg(long, env = "TUNECACHE_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Seconds an idle client connection is kept open
    #[arg(long, env = "TUNECACHE_KEEP_ALIVE", default_value_t = DEFAULT_KEEP_ALIVE_TIMEOUT.as_secs())]
    pub keep_alive_secs: u64,

    /// Seconds in-flight requests get to finish on shutdown
    #[arg(long, env = "TUNECACHE_SHUTDOWN_GRACE", default_value_t = DEFAULT_SHUTDOWN_GRACE.as_secs())]
    pub shutdown_grace_secs: u64,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    /// Checks the values clap accepts syntactically but the proxy cannot use.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.upstream_endpoint.as_str();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Endpoint(self.upstream_endpoint.clone()));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Path(self.path.clone()));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::Timeout);
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::KeepAlive);
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Audit log destination, or `None` when auditing is switched off.
    pub fn audit_path(&self) -> Option<&PathBuf> {
        (!self.no_audit).then_some(&self.audit_log)
    }

    /// Default `tracing` filter directive for the chosen verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "tunecache=info",
            1 => "tunecache=debug",
            _ => "tunecache=trace",
        }
    }
}
