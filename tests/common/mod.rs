//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Reserve a loopback address with a free port.
///
/// The probe listener is dropped before returning, so a concurrent test could
/// in theory grab the port first.
pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Poll until `addr` accepts TCP connections.
#[allow(dead_code)]
pub async fn wait_connectable(addr: SocketAddr, within: Duration) {
    let result = tokio::time::timeout(within, async {
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "{addr} not connectable within {within:?}");
}

/// Poll until `addr` refuses TCP connections.
#[allow(dead_code)]
pub async fn wait_unconnectable(addr: SocketAddr, within: Duration) {
    let result = tokio::time::timeout(within, async {
        loop {
            if TcpStream::connect(addr).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "{addr} still connectable after {within:?}");
}

/// HTTP client that bypasses any system proxy.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
