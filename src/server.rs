//! HTTP server lifecycle and graceful shutdown.
//!
//! ```text
//! Idle → Starting → Serving → Draining → Stopped
//! ```
//!
//! [`LifecycleController::start`] binds the listener and moves the accept loop
//! onto its own task. The caller keeps the returned [`Serving`] handle and
//! waits for a shutdown signal; [`Serving::shutdown_on`] then:
//! 1. Stops `listener.accept()` and drops the listener, so new connections are refused.
//! 2. Tells every open connection to finish its current request and close.
//! 3. Waits up to `drain_timeout` for all connection tasks. Whatever is still
//!    running after that is aborted and the shutdown is reported as failed.
//!    HTTP/2 streams run on tasks of their own and are cancelled with them.
//!
//! Each connection serves the handler chain behind
//! [`cors_layer`](crate::middleware::cors_layer).

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info};

use crate::config::{ServerConfig, Timeouts};
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::io::WriteTimeout;
use crate::logging::LogSink;
use crate::middleware::cors_layer;
use crate::request::Request;
use crate::response::Response;

/// Where the server is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Starting,
    Serving,
    Draining,
    Stopped,
}

/// Owns the listener from bind to the end of the drain.
pub struct LifecycleController {
    config: ServerConfig,
    log: LogSink,
    phase: watch::Sender<Phase>,
}

impl LifecycleController {
    pub fn new(config: ServerConfig, log: LogSink) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self { config, log, phase }
    }

    /// Follows phase transitions.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Binds the listener and starts accepting connections on a separate task.
    ///
    /// A bind failure is logged and returned; there is nothing useful to
    /// serve without a socket, so callers should exit.
    pub async fn start(self, app: impl Handler) -> Result<Serving, Error> {
        let Self { config, log, phase } = self;
        phase.send_replace(Phase::Starting);
        let app = app.into_boxed_handler();

        let listener = match TcpListener::bind(config.addr).await {
            Ok(l) => l,
            Err(source) => {
                log.emit(|| error!(addr = %config.addr, error = %source, "Server failed to start"));
                phase.send_replace(Phase::Stopped);
                return Err(Error::Bind { addr: config.addr, source });
            }
        };
        let local_addr = listener.local_addr()?;

        log.emit(|| info!(addr = %local_addr, "Server starting"));
        phase.send_replace(Phase::Serving);

        let (stop, stop_rx) = watch::channel(false);
        let accept = AcceptLoop {
            listener,
            app,
            cors: cors_layer(),
            timeouts: config.timeouts,
            body_limit: config.body_limit,
            drain_timeout: config.drain_timeout,
            phase: phase.clone(),
        };
        let task = tokio::spawn(log.scope(accept.run(stop_rx)));

        Ok(Serving { local_addr, log, phase, stop, task })
    }
}

/// Handle to a running server.
pub struct Serving {
    local_addr: SocketAddr,
    log: LogSink,
    phase: watch::Sender<Phase>,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), Error>>,
}

impl Serving {
    /// The bound address; differs from the configured one when port 0 was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Waits for `signal`, then drains. See [`Serving::shutdown`].
    pub async fn shutdown_on(self, signal: impl Future<Output = ()>) -> Result<(), Error> {
        signal.await;
        self.shutdown().await
    }

    /// Stops accepting and drains in-flight requests.
    ///
    /// Returns [`Error::DrainTimeout`] when requests were still running at the
    /// deadline; those connections have been closed by then.
    pub async fn shutdown(self) -> Result<(), Error> {
        self.log.emit(|| info!("Shutting down server..."));
        self.stop.send_replace(true);
        self.task.await?
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

struct AcceptLoop {
    listener: TcpListener,
    app: BoxedHandler,
    cors: CorsLayer,
    timeouts: Timeouts,
    body_limit: usize,
    drain_timeout: Duration,
    phase: watch::Sender<Phase>,
}

impl AcceptLoop {
    async fn run(self, mut stop: watch::Receiver<bool>) -> Result<(), Error> {
        let Self { listener, app, cors, timeouts, body_limit, drain_timeout, phase } = self;

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during the drain.
        let mut tasks = JoinSet::new();
        let (drain, drain_rx) = watch::channel(false);
        let (abort, abort_rx) = watch::channel(false);
        let streams = StreamExecutor { abort: abort_rx };

        loop {
            tokio::select! {
                // Check stop first so a signal immediately ends accepting,
                // even if more connections are queued.
                biased;

                // Also fires if the `Serving` handle was dropped.
                _ = stop.wait_for(|stop| *stop) => break,

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let conn = Connection {
                        remote_addr,
                        app: app.clone(),
                        cors: cors.clone(),
                        timeouts,
                        body_limit,
                        streams: streams.clone(),
                    };
                    tasks.spawn(conn.serve(stream, drain_rx.clone()).with_current_subscriber());
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        phase.send_replace(Phase::Draining);
        info!(in_flight = tasks.len(), drain_timeout_ms = drain_timeout.as_millis() as u64, "Draining connections");
        drain.send_replace(true);

        let drained = tokio::time::timeout(drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        let outcome = match drained {
            Ok(()) => {
                info!("Server gracefully stopped");
                Ok(())
            }
            Err(_) => {
                let abandoned = tasks.len();
                abort.send_replace(true);
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                let err = Error::DrainTimeout(drain_timeout);
                error!(error = %err, abandoned, "Server shutdown failed");
                Err(err)
            }
        };

        phase.send_replace(Phase::Stopped);
        outcome
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// Per-connection request bookkeeping for the idle timeout.
struct Activity {
    in_flight: AtomicUsize,
    last_active: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self { in_flight: AtomicUsize::new(0), last_active: Mutex::new(Instant::now()) }
    }

    fn begin(self: &Arc<Self>) -> Busy {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        Busy(Arc::clone(self))
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Instant::now();
        }
    }

    fn last_active(&self) -> Instant {
        self.last_active.lock().map(|l| *l).unwrap_or_else(|_| Instant::now())
    }

    /// When to next check whether the connection has gone idle.
    fn next_check(&self, idle: Duration) -> Instant {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            Instant::now() + idle
        } else {
            self.last_active() + idle
        }
    }

    fn idle_for(&self, idle: Duration) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.last_active().elapsed() >= idle
    }
}

/// Marks one request as in flight until dropped.
struct Busy(Arc<Activity>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns HTTP/2 stream tasks so that a forced shutdown cancels them along
/// with the connection tasks that own them.
#[derive(Clone)]
struct StreamExecutor {
    abort: watch::Receiver<bool>,
}

impl<F> hyper::rt::Executor<F> for StreamExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        let mut abort = self.abort.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = fut => {}
                    Ok(_) = abort.wait_for(|abort| *abort) => {}
                }
            }
            .with_current_subscriber(),
        );
    }
}

/// Everything one accepted connection needs to serve requests.
struct Connection {
    remote_addr: SocketAddr,
    app: BoxedHandler,
    cors: CorsLayer,
    timeouts: Timeouts,
    body_limit: usize,
    streams: StreamExecutor,
}

impl Connection {
    async fn serve(self, stream: TcpStream, mut drain: watch::Receiver<bool>) {
        let Self { remote_addr, app, cors, timeouts, body_limit, streams } = self;
        let activity = Arc::new(Activity::new());
        // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper IO traits.
        let io = TokioIo::new(WriteTimeout::new(stream, timeouts.write));

        // The service is cloned for every request on the connection.
        let svc = {
            let activity = Arc::clone(&activity);
            tower::service_fn(move |req: hyper::Request<Incoming>| {
                let app = Arc::clone(&app);
                let busy = activity.begin();
                async move {
                    let res = dispatch(app, req, remote_addr, body_limit).await;
                    drop(busy);
                    res
                }
            })
        };
        let svc = TowerToHyperService::new(ServiceBuilder::new().layer(cors).service(svc));

        // `auto::Builder` transparently handles both HTTP/1.1 and HTTP/2.
        let mut builder = ConnBuilder::new(streams);
        builder.http1().timer(TokioTimer::new()).header_read_timeout(timeouts.read);
        let conn = builder.serve_connection(io, svc);
        tokio::pin!(conn);

        let mut closing = false;
        loop {
            let check_at = activity.next_check(timeouts.idle);
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        debug!(peer = %remote_addr, "connection error: {e}");
                    }
                    break;
                }

                _ = drain.wait_for(|d| *d), if !closing => {
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }

                () = tokio::time::sleep_until(check_at), if !closing => {
                    if activity.idle_for(timeouts.idle) {
                        debug!(peer = %remote_addr, "closing idle connection");
                        closing = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        }
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: collects the body and runs the handler chain.
///
/// The error type is [`Infallible`]: every failure becomes a response, so
/// hyper never sees an error.
async fn dispatch(
    app: BoxedHandler,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    body_limit: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, body_limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(peer = %remote_addr, limit = body_limit, "request body too large");
            let res = Response::json(StatusCode::PAYLOAD_TOO_LARGE, &json!({"error": "Request body too large"}));
            return Ok(res.into_inner());
        }
        Err(e) => {
            debug!(peer = %remote_addr, "failed to read request body: {e}");
            let res = Response::json(StatusCode::BAD_REQUEST, &json!({"error": "Invalid request body"}));
            return Ok(res.into_inner());
        }
    };

    let request = Request::new(parts.method, parts.uri.path().to_owned(), parts.headers, body, remote_addr);
    Ok(app.call(request).await.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by orchestrators) and
/// **SIGINT** (Ctrl-C, for local dev). The handlers are installed when this
/// is called, not when the future is first polled, so call it before binding.
/// On Windows only Ctrl-C is available.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    async move {
        tokio::select! {
            _ = sigint.recv() => info!(signal = "SIGINT", "Shutdown signal received"),
            _ = sigterm.recv() => info!(signal = "SIGTERM", "Shutdown signal received"),
        }
    }
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
        info!(signal = "SIGINT", "Shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    use super::*;
    use crate::logging::capture;

    fn config() -> ServerConfig {
        ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            drain_timeout: Duration::from_millis(300),
            ..ServerConfig::default()
        }
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn phases_advance_through_the_lifecycle() {
        let (sink, captured) = capture::sink();
        let controller = LifecycleController::new(config(), sink);
        let mut phase = controller.phase();
        assert_eq!(*phase.borrow(), Phase::Idle);

        let serving = controller.start(|_req: Request| async { "ok" }).await.unwrap();
        assert_eq!(*phase.borrow_and_update(), Phase::Serving);

        let res = get(serving.local_addr(), "/").await;
        assert!(res.starts_with("HTTP/1.1 200"), "{res}");

        serving.shutdown().await.unwrap();
        assert_eq!(*phase.borrow(), Phase::Stopped);
        assert_eq!(captured.with_message("Server starting").len(), 1);
        assert_eq!(captured.with_message("Server gracefully stopped").len(), 1);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (sink, captured) = capture::sink();
        let config = ServerConfig { addr: taken.local_addr().unwrap(), ..config() };

        let controller = LifecycleController::new(config, sink);
        let phase = controller.phase();
        let err = controller.start(|_req: Request| async { "ok" }).await.err().unwrap();

        assert!(matches!(err, Error::Bind { .. }));
        assert_eq!(*phase.borrow(), Phase::Stopped);
        assert_eq!(captured.with_message("Server failed to start")[0].level, tracing::Level::ERROR);
    }

    #[tokio::test]
    async fn idle_keep_alive_connections_do_not_hold_up_the_drain() {
        let (sink, captured) = capture::sink();
        let serving = LifecycleController::new(config(), sink)
            .start(|_req: Request| async { "ok" })
            .await
            .unwrap();

        // Keep-alive connection that has finished its request and then idles.
        let mut stream = TcpStream::connect(serving.local_addr()).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nhost: test\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"HTTP/1.1 200"));

        serving.shutdown().await.unwrap();
        assert_eq!(captured.with_message("Server gracefully stopped").len(), 1);
    }

    #[tokio::test]
    async fn idle_timeout_closes_quiet_connections() {
        let (sink, _) = capture::sink();
        let mut config = config();
        config.timeouts.idle = Duration::from_millis(100);
        let serving = LifecycleController::new(config, sink)
            .start(|_req: Request| async { "ok" })
            .await
            .unwrap();

        let mut stream = TcpStream::connect(serving.local_addr()).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nhost: test\r\n\r\n").await.unwrap();

        // The server closes the connection on its own after the response.
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
            .await
            .expect("idle connection was not closed")
            .unwrap();
        assert!(out.starts_with(b"HTTP/1.1 200"));

        serving.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_body_is_refused_before_the_handler() {
        let (sink, _) = capture::sink();
        let config = ServerConfig { body_limit: 16, ..config() };
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let serving = LifecycleController::new(config, sink)
            .start(move |_req: Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "ok" }
            })
            .await
            .unwrap();

        let mut stream = TcpStream::connect(serving.local_addr()).await.unwrap();
        let body = "x".repeat(64);
        let req = format!(
            "POST /api/v1/circuits HTTP/1.1\r\nhost: test\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();

        assert!(out.starts_with("HTTP/1.1 413"), "{out}");
        assert!(out.contains(r#"{"error":"Request body too large"}"#), "{out}");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        serving.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn body_within_the_limit_reaches_the_handler() {
        let (sink, _) = capture::sink();
        let config = ServerConfig { body_limit: 16, ..config() };
        let serving = LifecycleController::new(config, sink)
            .start(|req: Request| async move { format!("{} bytes", req.body().len()) })
            .await
            .unwrap();

        let mut stream = TcpStream::connect(serving.local_addr()).await.unwrap();
        stream
            .write_all(b"POST / HTTP/1.1\r\nhost: test\r\nconnection: close\r\ncontent-length: 16\r\n\r\n0123456789abcdef")
            .await
            .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 200"), "{out}");
        assert!(out.ends_with("16 bytes"), "{out}");

        serving.shutdown().await.unwrap();
    }

    /// Reports through a channel when it is dropped.
    struct DropSignal(Option<oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn aborting_cancels_stream_tasks() {
        let (abort, abort_rx) = watch::channel(false);
        let streams = StreamExecutor { abort: abort_rx };
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let guard = DropSignal(Some(dropped_tx));

        hyper::rt::Executor::execute(&streams, async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;

        abort.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), dropped_rx)
            .await
            .expect("stream task outlived the abort")
            .unwrap();
    }

    #[tokio::test]
    async fn stream_tasks_run_to_completion_without_an_abort() {
        let (_abort, abort_rx) = watch::channel(false);
        let streams = StreamExecutor { abort: abort_rx };
        let (done_tx, done_rx) = oneshot::channel();

        hyper::rt::Executor::execute(&streams, async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = done_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
    }
}
