//! A single HTTP server bound to one listener.
//!
//! # Responsibilities
//! - Own the bound listener and the accept loop
//! - Hand accepted connections to the router through hyper
//! - Stop accepting on request, drain in-flight requests, abort on demand
//!
//! The accept loop and the shutdown trigger are driven from different tasks:
//! [`RunningServer::serve`] blocks until the server is closed, while a
//! [`ServerHandle`] held elsewhere decides when that happens.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::net::listener::is_transient_accept_error;
use crate::net::{BindError, ConnectionSet, Drain, Listener};

/// Pause after a transient accept error before accepting again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Why the serve loop returned.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The server was shut down on purpose. This is the expected way for
    /// `serve` to end.
    #[error("server closed")]
    Closed,
    /// The listener failed for reasons unrelated to shutdown.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Shutdown controls for a [`RunningServer`].
#[derive(Debug, Clone, Default)]
pub struct ServerHandle {
    stop: CancellationToken,
    force: CancellationToken,
    closed: CancellationToken,
}

impl ServerHandle {
    /// Stop accepting and wait up to `grace` for in-flight requests.
    ///
    /// When the grace period runs out every open connection is aborted and
    /// [`Drain::Forced`] is returned.
    pub async fn shutdown(&self, grace: Duration) -> Drain {
        self.stop.cancel();
        if tokio::time::timeout(grace, self.closed.cancelled())
            .await
            .is_ok()
        {
            return Drain::Clean;
        }

        self.force.cancel();
        self.closed.cancelled().await;
        Drain::Forced
    }
}

/// A server whose listener is bound and ready to serve.
pub struct RunningServer {
    name: String,
    listener: Listener,
    router: Router,
    handle: ServerHandle,
}

impl RunningServer {
    /// Bind `address` for the server called `name`.
    pub async fn bind(
        name: impl Into<String>,
        address: &str,
        router: Router,
    ) -> Result<Self, BindError> {
        let listener = Listener::bind(address).await?;
        Ok(Self {
            name: name.into(),
            listener,
            router,
            handle: ServerHandle::default(),
        })
    }

    /// The resolved address, with any ephemeral port filled in.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Serve requests until the server is shut down or the listener fails.
    ///
    /// This never returns success: a deliberate shutdown yields
    /// [`ServeError::Closed`].
    pub async fn serve(self) -> ServeError {
        let (error, draining) = self.accept().await;
        draining.finish().await;
        error
    }

    /// Run the accept loop only.
    ///
    /// The listener is closed when this returns, but connections accepted so
    /// far are still being served. They stay bounded by the handle's grace
    /// period only once something calls [`ServerHandle::shutdown`], so a
    /// caller reacting to [`ServeError::Accept`] must start that before
    /// awaiting [`Draining::finish`].
    pub async fn accept(self) -> (ServeError, Draining) {
        let Self {
            name,
            listener,
            router,
            handle,
        } = self;
        let closed = handle.closed.clone().drop_guard();
        let mut connections = ConnectionSet::new(router);

        let error = loop {
            tokio::select! {
                biased;
                () = handle.stop.cancelled() => break ServeError::Closed,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => connections.serve(stream, peer_addr),
                    Err(e) if is_transient_accept_error(&e) => {
                        tracing::warn!(server = %name, error = %e, "Transient accept error");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => break ServeError::Accept(e),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(server = %name, error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        };

        drop(listener);

        let draining = Draining {
            name,
            connections,
            force: handle.force.clone(),
            _closed: closed,
        };
        (error, draining)
    }
}

/// Connections left over after the accept loop ended.
pub struct Draining {
    name: String,
    connections: ConnectionSet,
    force: CancellationToken,
    _closed: DropGuard,
}

impl Draining {
    /// Wait until every connection is gone, marking the server closed.
    pub async fn finish(self) -> Drain {
        let drain = self.connections.drain(&self.force).await;
        tracing::debug!(server = %self.name, drain = ?drain, "Connections drained");
        drain
    }
}
