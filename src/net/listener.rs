//! TCP listener binding.
//!
//! # Responsibilities
//! - Normalize bind specs (`:port` means every IPv4 interface)
//! - Bind to the configured address and report the resolved local address
//! - Classify accept errors into transient and fatal
//!
//! # Design Decisions
//! - No bind retries: a port conflict is a configuration error
//! - Ephemeral ports (`:0`) are resolved at bind time and reported back

use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

/// Host used when a bind address only carries a port.
const UNSPECIFIED_HOST: &str = "0.0.0.0";

/// Failed to bind a listener on an address.
#[derive(Debug, Error)]
#[error("address {address}: {source}")]
pub struct BindError {
    address: String,
    #[source]
    source: io::Error,
}

impl BindError {
    /// The address as it was requested.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Kind of the underlying OS error.
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// Turn a bind address into something `TcpListener::bind` accepts.
///
/// `":3311"` becomes `"0.0.0.0:3311"`. Anything else must already be
/// `host:port`, where host may be a name, an IPv4 address or a bracketed
/// IPv6 address.
pub fn normalize_address(address: &str) -> Result<String, io::Error> {
    let address = address.trim();
    if address.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty bind address",
        ));
    }

    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("missing port in bind address {address:?}"),
        )
    })?;

    port.parse::<u16>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid port {port:?} in bind address: {e}"),
        )
    })?;

    if host.is_empty() {
        Ok(format!("{UNSPECIFIED_HOST}:{port}"))
    } else {
        Ok(address.to_string())
    }
}

/// Whether the bind address asks the OS for an arbitrary free port.
pub fn is_ephemeral(address: &str) -> bool {
    address
        .trim()
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        == Some(0)
}

/// Accept errors that concern a single connection rather than the listener.
///
/// Running out of file descriptors is included: the accept loop backs off
/// and tries again once some connections have closed.
pub fn is_transient_accept_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || is_fd_exhaustion(error)
}

fn is_fd_exhaustion(error: &io::Error) -> bool {
    // EMFILE / ENFILE
    matches!(error.raw_os_error(), Some(23) | Some(24))
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `address`. Fails immediately if the address is invalid or
    /// already taken.
    pub async fn bind(address: &str) -> Result<Self, BindError> {
        let bind_error = |source| BindError {
            address: address.to_string(),
            source,
        };

        let normalized = normalize_address(address).map_err(bind_error)?;
        let inner = TcpListener::bind(normalized.as_str())
            .await
            .map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::debug!(
            requested = %address,
            address = %local_addr,
            "Listener bound"
        );

        Ok(Self { inner, local_addr })
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer_addr) = self.inner.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok((stream, peer_addr))
    }

    /// The address this listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
