//! Per-connection serving and drain tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Serve each accepted connection on its own task (HTTP/1.1 + HTTP/2)
//! - Drain connections gracefully, or abort them when forced

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ConnectInfo;
use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::Instrument;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How a set of connections came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every in-flight request finished on its own.
    Clean,
    /// Open connections were aborted before they finished. This covers
    /// HTTP/2 stream handlers too, which run on tasks of their own.
    Forced,
}

/// Spawns HTTP/2 stream handlers so that a forced closure can stop them.
///
/// Aborting a connection task drops the socket but not the stream tasks it
/// spawned through the executor.
#[derive(Clone)]
struct StreamExecutor {
    abort: CancellationToken,
}

impl<F> hyper::rt::Executor<F> for StreamExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        let abort = self.abort.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    () = abort.cancelled() => {}
                    _ = fut => {}
                }
            }
            .in_current_span(),
        );
    }
}

/// The live connections of one server.
///
/// Each connection runs on its own task so that forced closure can abort
/// all of them at once.
pub struct ConnectionSet {
    router: Router,
    builder: AutoBuilder<StreamExecutor>,
    graceful: GracefulShutdown,
    tasks: JoinSet<()>,
    streams: CancellationToken,
}

impl ConnectionSet {
    pub fn new(router: Router) -> Self {
        let streams = CancellationToken::new();
        Self {
            router,
            builder: AutoBuilder::new(StreamExecutor {
                abort: streams.clone(),
            }),
            graceful: GracefulShutdown::new(),
            tasks: JoinSet::new(),
            streams,
        }
    }

    /// Serve `stream` on a new task.
    pub fn serve(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = ConnectionId::new();
        let router = self.router.clone();
        let service = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
            let mut router = router.clone();
            let mut req = req.map(axum::body::Body::new);
            req.extensions_mut().insert(ConnectInfo(peer_addr));
            async move { router.call(req).await }
        });

        let conn = self
            .builder
            .serve_connection_with_upgrades(TokioIo::new(stream), service);
        let conn = self.graceful.watch(conn.into_owned());

        tracing::trace!(connection_id = %id, peer_addr = %peer_addr, "Connection accepted");
        self.tasks.spawn(
            async move {
                if let Err(e) = conn.await {
                    tracing::debug!(connection_id = %id, error = %e, "Connection error");
                }
                tracing::trace!(connection_id = %id, "Connection closed");
            }
            .in_current_span(),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next connection task to finish.
    pub async fn join_next(&mut self) -> Option<Result<(), JoinError>> {
        self.tasks.join_next().await
    }

    /// Ask every connection to finish its in-flight work and close.
    ///
    /// Resolves once all connections are gone. If `force` fires first, the
    /// remaining connections are aborted.
    pub async fn drain(self, force: &CancellationToken) -> Drain {
        let Self {
            graceful,
            mut tasks,
            streams,
            ..
        } = self;

        let outcome = tokio::select! {
            () = graceful.shutdown() => Drain::Clean,
            () = force.cancelled() => {
                tasks.abort_all();
                streams.cancel();
                Drain::Forced
            }
        };

        while tasks.join_next().await.is_some() {}
        outcome
    }
}
