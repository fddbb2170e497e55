use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use tunecache::audit::{AuditSink, FileAuditLog};
use tunecache::cache::ResponseCache;
use tunecache::config::Config;
use tunecache::pipeline::RequestPipeline;
use tunecache::server::Server;
use tunecache::upstream::HttpFetcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    fmt().with_env_filter(filter).with_target(true).init();

    config.validate()?;

    let cache = Arc::new(ResponseCache::new(config.capacity));
    let fetcher = Arc::new(HttpFetcher::new(config.upstream_timeout())?);
    let audit = config.audit_path().map(|path| {
        info!(path = %path.display(), "auditing completed searches");
        Arc::new(FileAuditLog::spawn(path))
    });

    let mut pipeline = RequestPipeline::new(Arc::clone(&cache), fetcher)
        .endpoint(config.upstream_endpoint.clone())
        .path(config.path.clone())
        .upstream_timeout(config.upstream_timeout());
    if let Some(audit) = &audit {
        pipeline = pipeline.audit(Arc::clone(audit) as Arc<dyn AuditSink>);
    }
    let pipeline = Arc::new(pipeline);

    let server = Server::bind(&config.listen)
        .await?
        .max_connections(config.max_connections)
        .keep_alive_timeout(config.keep_alive_timeout())
        .shutdown_grace(config.shutdown_grace());
    info!(
        capacity = config.capacity.get(),
        upstream = %config.upstream_endpoint,
        "cache ready"
    );

    server
        .run_until(
            move |req| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(&req).await }
            },
            shutdown_signal(),
        )
        .await?;

    let stats = cache.stats();
    info!(
        entries = cache.len(),
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        hit_ratio = stats.hit_ratio(),
        "cache statistics"
    );

    if let Some(audit) = &audit {
        audit.close().await;
        info!("audit log drained");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
