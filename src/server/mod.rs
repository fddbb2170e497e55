//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Each connection runs on its own Tokio task; a semaphore bounds how many
//! connections are served at once, and the accept loop waits for a free slot
//! before taking the next connection. A connection that stays quiet for the
//! keep-alive timeout is closed, which hands its slot to the next client.
//!
//! On shutdown the server stops accepting, closes idle keep-alive
//! connections, and waits up to a grace period for requests in flight.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (64 KiB).
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Default number of connections served concurrently.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default time a connection may sit idle before it is closed.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time in-flight connections get to finish after shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The inbound HTTP dispatcher.
///
/// # Examples
///
/// ```rust,no_run
/// use tunecache::server::Server;
/// use tunecache::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?.max_connections(64);
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    keep_alive_timeout: Duration,
    shutdown_grace: Duration,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Sets how many connections may be served at once. Values below one are
    /// raised to one.
    #[must_use]
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Sets how long a connection may wait for its next bytes before it is
    /// closed.
    #[must_use]
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Sets how long [`run_until`](Self::run_until) waits for in-flight
    /// connections after shutdown before aborting them.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches requests to `handler` until the
    /// process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops accepting new connections once
    /// `shutdown` resolves. Idle connections are then closed and requests in
    /// flight get up to the shutdown grace period to finish; whatever is still
    /// running after that is aborted. When this returns, no connection task
    /// holds the handler any more.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. It is wrapped in an [`Arc`] and shared
    /// across all spawned Tokio tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        let permits = Arc::new(Semaphore::new(self.max_connections));
        let (stopping_tx, stopping) = watch::channel(false);
        let mut connections = JoinSet::new();
        info!(
            address = %self.local_addr,
            max_connections = self.max_connections,
            "tunecache listening"
        );

        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                () = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // The semaphore is never closed.
                    Err(_) => break,
                },
            };

            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let conn = Connection {
                stream,
                peer_addr,
                idle_timeout: self.keep_alive_timeout,
                stopping: stopping.clone(),
            };
            let handler = Arc::clone(&handler);

            connections.spawn(async move {
                if let Err(e) = handle_connection(conn, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
                drop(permit);
            });

            // Reap finished connections so the set only tracks live ones.
            while connections.try_join_next().is_some() {}
        }

        info!(
            address = %self.local_addr,
            in_flight = connections.len(),
            "stopped accepting connections"
        );
        let _ = stopping_tx.send(true);

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                grace = ?self.shutdown_grace,
                "grace period elapsed; aborting connections"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        info!(address = %self.local_addr, "server stopped");
        Ok(())
    }
}

/// One accepted connection and what it needs to decide when to close.
struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
    stopping: watch::Receiver<bool>,
}

/// Why a connection stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    Data,
    PeerClosed,
    IdleTimeout,
    Stopping,
}

impl Connection {
    /// Reads more bytes into `buf`, giving up after the idle timeout. Between
    /// requests (empty buffer) a server shutdown also ends the wait.
    async fn read_more(&mut self, buf: &mut BytesMut) -> std::io::Result<ReadOutcome> {
        let between_requests = buf.is_empty();
        tokio::select! {
            read = tokio::time::timeout(self.idle_timeout, self.stream.read_buf(buf)) => match read {
                Ok(Ok(0)) => Ok(ReadOutcome::PeerClosed),
                Ok(Ok(_)) => Ok(ReadOutcome::Data),
                Ok(Err(e)) => Err(e),
                Err(_) => Ok(ReadOutcome::IdleTimeout),
            },
            () = stopped(&mut self.stopping), if between_requests => Ok(ReadOutcome::Stopping),
        }
    }
}

async fn stopped(stopping: &mut watch::Receiver<bool>) {
    let _ = stopping.wait_for(|stopping| *stopping).await;
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection, signals
/// `Connection: close`, goes idle, or the server shuts down between requests.
async fn handle_connection<H, F>(mut conn: Connection, handler: Arc<H>) -> std::io::Result<()>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let peer_addr = conn.peer_addr;
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // A pipelined request may already be buffered in full.
        if buf.is_empty() || matches!(Request::parse(&buf), Err(RequestError::Incomplete)) {
            match conn.read_more(&mut buf).await? {
                ReadOutcome::Data => {}
                outcome => {
                    debug!(peer = %peer_addr, ?outcome, "closing connection");
                    break;
                }
            }
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large; sending 413");
            let response = Response::error(StatusCode::PayloadTooLarge, "request too large")
                .keep_alive(false);
            conn.stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request; sending 400");
                let response =
                    Response::error(StatusCode::BadRequest, format!("client error: {e}"))
                        .keep_alive(false);
                conn.stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for any declared body so the next request starts at the right offset.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            match conn.read_more(&mut buf).await? {
                ReadOutcome::Data => continue,
                outcome => {
                    debug!(peer = %peer_addr, ?outcome, "body never arrived");
                    break;
                }
            }
        }

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        conn.stream.write_all(&response.into_bytes()).await?;
        conn.stream.flush().await?;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}
