//! End-to-end tests: a real listener, raw HTTP/1.1 over TCP, a stub upstream.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tunecache::audit::{AuditSink, FileAuditLog};
use tunecache::cache::ResponseCache;
use tunecache::pipeline::RequestPipeline;
use tunecache::server::{Server, ServerError};
use tunecache::upstream::{FetchFuture, Fetcher, UpstreamError};

const ENDPOINT: &str = "https://catalog.test/search";

/// Upstream stand-in: answers from a fixed table and counts calls.
struct StubCatalog {
    calls: AtomicUsize,
    fail_with: Option<u16>,
    delay: Duration,
}

impl StubCatalog {
    fn healthy() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
            delay: Duration::ZERO,
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::healthy()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for StubCatalog {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(status) = self.fail_with {
                return Err(UpstreamError::Status(status));
            }
            let payload = match url {
                "https://catalog.test/search?q=imagine" => {
                    r#"{"data":[{"title":"Imagine"},{"title":"Imagine - Remastered 2010"}],"total":2}"#
                }
                "https://catalog.test/search?q=artist%3A%22queen%22" => {
                    r#"{"data":[{"title":"Bohemian Rhapsody"},{"title":"Under Pressure"}],"total":2}"#
                }
                _ => r#"{"data":[],"total":0}"#,
            };
            Ok(payload.to_owned())
        })
    }
}

struct Proxy {
    addr: SocketAddr,
    cache: Arc<ResponseCache>,
    stop: oneshot::Sender<()>,
    server: JoinHandle<Result<(), ServerError>>,
}

impl Proxy {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        let stopped = tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server did not stop");
        stopped.unwrap().unwrap();
    }
}

async fn start(
    catalog: Arc<StubCatalog>,
    capacity: usize,
    audit: Option<Arc<dyn AuditSink>>,
) -> Proxy {
    let cache = Arc::new(ResponseCache::new(NonZeroUsize::new(capacity).unwrap()));
    let mut pipeline = RequestPipeline::new(Arc::clone(&cache), catalog)
        .endpoint(ENDPOINT)
        .upstream_timeout(Duration::from_millis(500));
    if let Some(audit) = audit {
        pipeline = pipeline.audit(audit);
    }
    let pipeline = Arc::new(pipeline);

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(server.run_until(
        move |req| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.handle(&req).await }
        },
        async {
            let _ = stopped.await;
        },
    ));

    Proxy {
        addr,
        cache,
        stop,
        server,
    }
}

struct Reply {
    status: u16,
    headers: String,
    body: String,
}

async fn get(addr: SocketAddr, target: &str) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {target} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    Reply {
        status,
        headers: head.to_owned(),
        body: body.to_owned(),
    }
}

#[tokio::test]
async fn first_query_misses_then_hits() {
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let first = get(proxy.addr, "/?q=imagine").await;
    assert_eq!(first.status, 200);
    assert!(first.headers.contains("X-Cache: MISS"));
    assert_eq!(first.body, "Imagine\nImagine - Remastered 2010\n");
    assert_eq!(catalog.calls(), 1);

    let second = get(proxy.addr, "/?q=imagine").await;
    assert_eq!(second.status, 200);
    assert!(second.headers.contains("X-Cache: HIT"));
    assert_eq!(second.body, first.body);
    assert_eq!(catalog.calls(), 1);
}

#[tokio::test]
async fn encoded_query_reaches_upstream_encoded() {
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let reply = get(proxy.addr, "/?q=artist:%22queen%22").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "Bohemian Rhapsody\nUnder Pressure\n");
    assert!(proxy.cache.contains(&format!("{ENDPOINT}?q=artist%3A%22queen%22")));
}

#[tokio::test]
async fn missing_query_is_bad_request_without_upstream_call() {
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let reply = get(proxy.addr, "/").await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body.lines().count(), 1);

    let empty = get(proxy.addr, "/?q=").await;
    assert_eq!(empty.status, 400);
    assert_eq!(catalog.calls(), 0);
}

#[tokio::test]
async fn upstream_error_is_server_error_and_not_cached() {
    let catalog = Arc::new(StubCatalog::failing(503));
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let reply = get(proxy.addr, "/?q=imagine").await;
    assert_eq!(reply.status, 502);
    assert!(reply.body.starts_with("upstream failure: "));
    assert!(proxy.cache.is_empty());

    let again = get(proxy.addr, "/?q=imagine").await;
    assert_eq!(again.status, 502);
    assert_eq!(catalog.calls(), 2);
}

#[tokio::test]
async fn slow_upstream_is_gateway_timeout() {
    let catalog = Arc::new(StubCatalog {
        delay: Duration::from_secs(5),
        ..StubCatalog::healthy()
    });
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let reply = get(proxy.addr, "/?q=imagine").await;
    assert_eq!(reply.status, 504);
    assert!(reply.body.starts_with("upstream timeout: "));
    assert!(proxy.cache.is_empty());
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let reply = get(proxy.addr, "/elsewhere?q=imagine").await;
    assert_eq!(reply.status, 404);
    assert_eq!(catalog.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_wave_of_concurrent_clients_is_served_from_cache() {
    const CLIENTS: usize = 50;
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(Arc::clone(&catalog), 100, None).await;

    let wave = |addr: SocketAddr| async move {
        let tasks: Vec<_> = (0..CLIENTS)
            .map(|_| tokio::spawn(async move { get(addr, "/?q=imagine").await }))
            .collect();
        let mut replies = Vec::with_capacity(CLIENTS);
        for task in tasks {
            replies.push(task.await.unwrap());
        }
        replies
    };

    // Racing misses may each reach upstream; that is allowed.
    let first = wave(proxy.addr).await;
    assert!(first.iter().all(|r| r.status == 200));
    let after_first = catalog.calls();
    assert!((1..=CLIENTS).contains(&after_first));

    let second = wave(proxy.addr).await;
    assert!(second.iter().all(|r| r.status == 200 && r.headers.contains("X-Cache: HIT")));
    assert!(second.iter().all(|r| r.body == first[0].body));
    assert_eq!(catalog.calls(), after_first);

    assert_eq!(proxy.cache.len(), 1);
    proxy.cache.check_invariants().unwrap();
}

fn temp_audit_path() -> (std::path::PathBuf, std::path::PathBuf) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("tunecache-it-{}-{nanos}", std::process::id()));
    let path = dir.join("audit.log");
    (dir, path)
}

#[tokio::test]
async fn completed_searches_are_audited() {
    let (dir, path) = temp_audit_path();
    let audit = Arc::new(FileAuditLog::spawn(&path));
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(
        Arc::clone(&catalog),
        100,
        Some(Arc::clone(&audit) as Arc<dyn AuditSink>),
    )
    .await;

    get(proxy.addr, "/?q=imagine").await;
    get(proxy.addr, "/?q=imagine").await;
    get(proxy.addr, "/").await;
    audit.close().await;

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(contents.matches("Retrieved at: ").count(), 2);
    assert_eq!(contents.matches("Imagine - Remastered 2010\n").count(), 2);
    assert_eq!(
        contents.matches("=======================================").count(),
        2
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn shutdown_with_open_client_drains_audit_log() {
    let (dir, path) = temp_audit_path();
    let audit = Arc::new(FileAuditLog::spawn(&path));
    let catalog = Arc::new(StubCatalog::healthy());
    let proxy = start(
        Arc::clone(&catalog),
        100,
        Some(Arc::clone(&audit) as Arc<dyn AuditSink>),
    )
    .await;

    // A keep-alive client that never hangs up.
    let mut open = TcpStream::connect(proxy.addr).await.unwrap();
    open.write_all(b"GET /?q=imagine HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let mut reply = Vec::new();
    let mut chunk = [0u8; 1024];
    while !reply.ends_with(b"Imagine - Remastered 2010\n") {
        let n = open.read(&mut chunk).await.unwrap();
        assert!(n > 0);
        reply.extend_from_slice(&chunk[..n]);
    }

    proxy.shutdown().await;
    assert_eq!(Arc::strong_count(&audit), 1);

    let audit = Arc::try_unwrap(audit).ok().expect("sink still shared after shutdown");
    audit.close().await;

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(contents.matches("Retrieved at: ").count(), 1);
    assert!(contents.contains("Imagine - Remastered 2010\n"));

    let mut rest = Vec::new();
    assert_eq!(open.read_to_end(&mut rest).await.unwrap(), 0);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
