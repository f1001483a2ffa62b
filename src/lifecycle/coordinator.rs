//! Runs several HTTP servers as one unit.
//!
//! Every server gets two tasks: one owns the accept loop, the other waits for
//! the shared shutdown signal and drives the server through a timed graceful
//! shutdown. The first server to fail triggers the shared signal, so its
//! siblings shut down too.

use std::io;
use std::time::Duration;

use axum::Router;
use metrics::Counter;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::http::{RunningServer, ServeError, ServerHandle};
use crate::lifecycle::Shutdown;
use crate::net::{BindError, Drain};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A server to run: its name (for logs), bind address and handler.
#[derive(Clone)]
pub struct ServerSpec {
    name: String,
    address: String,
    handler: Router,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>, handler: Router) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for ServerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSpec")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Fatal error of a managed server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not listen for {name} on {source}")]
    Bind {
        name: String,
        #[source]
        source: BindError,
    },

    #[error("{name} server failed: {source}")]
    Serve {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

impl ServerError {
    /// Name of the server that failed, when known.
    pub fn server(&self) -> Option<&str> {
        match self {
            ServerError::Bind { name, .. } | ServerError::Serve { name, .. } => Some(name),
            ServerError::Task(_) => None,
        }
    }
}

/// Starts servers, shares one shutdown signal between them and collects
/// their results.
#[derive(Clone)]
pub struct Coordinator {
    grace: Duration,
    forced_closures: Option<Counter>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("grace", &self.grace)
            .field("counts_forced_closures", &self.forced_closures.is_some())
            .finish()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_GRACE)
    }
}

impl Coordinator {
    /// `grace` bounds each server's drain independently.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            forced_closures: None,
        }
    }

    /// Count shutdowns that had to close connections forcibly.
    pub fn with_forced_closure_counter(mut self, counter: Counter) -> Self {
        self.forced_closures = Some(counter);
        self
    }

    /// Run every server until `parent` is triggered or one of them fails.
    ///
    /// Returns the first fatal error. Servers that were shut down on purpose,
    /// cleanly or by forced closure, do not count as failures.
    pub async fn run(&self, specs: Vec<ServerSpec>, parent: &Shutdown) -> Result<(), ServerError> {
        let group = parent.child();
        let mut tasks = JoinSet::new();

        for spec in specs {
            let server = ManagedServer {
                spec,
                group: group.clone(),
                grace: self.grace,
                forced_closures: self.forced_closures.clone(),
            };
            tasks.spawn(server.run().in_current_span());
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let Err(error) = joined.map_err(ServerError::from).and_then(|result| result) else {
                continue;
            };
            group.trigger();
            if first_error.is_none() {
                first_error = Some(error);
            } else {
                tracing::debug!(error = %error, "Further server failure during shutdown");
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Run `specs` with the default coordinator settings and the given grace.
pub async fn run(
    specs: Vec<ServerSpec>,
    parent: &Shutdown,
    grace: Duration,
) -> Result<(), ServerError> {
    Coordinator::new(grace).run(specs, parent).await
}

struct ManagedServer {
    spec: ServerSpec,
    group: Shutdown,
    grace: Duration,
    forced_closures: Option<Counter>,
}

impl ManagedServer {
    async fn run(self) -> Result<(), ServerError> {
        let ServerSpec {
            name,
            address,
            handler,
        } = self.spec;

        let server = RunningServer::bind(name.clone(), &address, handler)
            .await
            .map_err(|source| ServerError::Bind {
                name: name.clone(),
                source,
            })?;

        tracing::info!(
            server = %name,
            addr = %server.local_addr(),
            "{name} server is up and running"
        );

        let watcher = tokio::spawn(
            watch_shutdown(
                name.clone(),
                server.handle(),
                self.group.clone(),
                self.grace,
                self.forced_closures,
            )
            .in_current_span(),
        );

        let (error, draining) = server.accept().await;
        let result = match error {
            ServeError::Closed => Ok(()),
            ServeError::Accept(source) => {
                tracing::error!(server = %name, error = %source, "{name} server failed");
                // The watcher bounds the remaining connections by the grace period.
                self.group.trigger();
                Err(ServerError::Serve { name, source })
            }
        };
        draining.finish().await;

        watcher.await?;
        result
    }
}

/// Wait for the shared signal, then shut the server down within `grace`.
async fn watch_shutdown(
    name: String,
    handle: ServerHandle,
    group: Shutdown,
    grace: Duration,
    forced_closures: Option<Counter>,
) {
    group.triggered().await;
    tracing::info!(server = %name, "initiated a graceful shutdown of the {name} server");

    if handle.shutdown(grace).await == Drain::Forced {
        tracing::warn!(
            server = %name,
            grace_ms = grace.as_millis() as u64,
            "{name} server terminated abruptly, necessitating a forced closure"
        );
        if let Some(counter) = forced_closures {
            counter.increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Telemetry;
    use axum::routing::get;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    fn hello() -> Router {
        Router::new().route("/", get(|| async { "hello world" }))
    }

    /// Reserve a free port on loopback. The listener is dropped, so the port
    /// is only very likely to still be free when the test binds it.
    fn free_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    async fn wait_connectable(addr: SocketAddr, within: Duration) {
        tokio::time::timeout(within, async {
            while TcpStream::connect(addr).await.is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{addr} not connectable within {within:?}"));
    }

    async fn wait_unconnectable(addr: SocketAddr, within: Duration) {
        tokio::time::timeout(within, async {
            while TcpStream::connect(addr).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{addr} still connectable after {within:?}"));
    }

    /// Router whose handler signals `entered` and then sleeps for 30s.
    fn stuck(entered: Arc<Notify>) -> Router {
        Router::new().route(
            "/",
            get(move || {
                let entered = entered.clone();
                async move {
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "late"
                }
            }),
        )
    }

    /// Make the listening socket bound to `addr` fail its next `accept`.
    #[cfg(target_os = "linux")]
    fn break_listener(addr: SocketAddr) {
        use std::mem::{size_of, zeroed};

        for fd in 0..4096 {
            // SAFETY: plain syscalls on fds owned by this process, writing
            // into correctly sized locals.
            unsafe {
                let mut storage: libc::sockaddr_storage = zeroed();
                let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
                let sockaddr = &mut storage as *mut _ as *mut libc::sockaddr;
                if libc::getsockname(fd, sockaddr, &mut len) != 0
                    || i32::from(storage.ss_family) != libc::AF_INET
                {
                    continue;
                }
                let sin = &*(&storage as *const _ as *const libc::sockaddr_in);
                if u16::from_be(sin.sin_port) != addr.port() {
                    continue;
                }

                let mut listening: libc::c_int = 0;
                let mut optlen = size_of::<libc::c_int>() as libc::socklen_t;
                let rc = libc::getsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_ACCEPTCONN,
                    &mut listening as *mut _ as *mut libc::c_void,
                    &mut optlen,
                );
                if rc == 0 && listening == 1 {
                    assert_eq!(libc::shutdown(fd, libc::SHUT_RD), 0);
                    return;
                }
            }
        }
        panic!("no listening socket on {addr}");
    }

    /// Port announced in the "server is up and running" log line of `server`.
    fn announced_port(lines: &[&str], server: &str) -> Option<u16> {
        let line = lines
            .iter()
            .find(|l| l.contains(&format!("{server} server is up and running")))?;
        let addr = line.split_whitespace().find_map(|f| f.strip_prefix("addr="))?;
        addr.parse::<SocketAddr>().ok().map(|a| a.port())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn parent_cancel_stops_every_server() {
        let app = free_addr();
        let metrics = free_addr();
        let specs = vec![
            ServerSpec::new("app", app.to_string(), hello()),
            ServerSpec::new("metrics", metrics.to_string(), Telemetry::new().router()),
        ];

        let parent = Shutdown::new();
        let coordinator = Coordinator::new(Duration::from_millis(50));
        let running = tokio::spawn({
            let parent = parent.clone();
            async move { coordinator.run(specs, &parent).await }.in_current_span()
        });

        wait_connectable(app, Duration::from_secs(2)).await;
        wait_connectable(metrics, Duration::from_secs(2)).await;

        parent.trigger();
        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("run should return after cancellation")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");

        assert!(TcpStream::connect(app).await.is_err());
        assert!(TcpStream::connect(metrics).await.is_err());
        assert!(logs_contain("app server is up and running"));
        assert!(logs_contain("initiated a graceful shutdown of the app server"));
        assert!(logs_contain("initiated a graceful shutdown of the metrics server"));
        assert!(!logs_contain("forced closure"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn bind_failure_cancels_siblings() {
        let shared = free_addr().to_string();
        let specs = vec![
            ServerSpec::new("a", shared.clone(), hello()),
            ServerSpec::new("b", shared.clone(), hello()),
        ];

        let parent = Shutdown::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(specs, &parent, Duration::from_millis(50)),
        )
        .await
        .expect("a bind failure should end the run");

        match result {
            Err(ServerError::Bind { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
                assert_eq!(source.address(), shared);
            }
            other => panic!("expected bind error, got {other:?}"),
        }
        assert!(!parent.is_triggered(), "failures must not cancel the caller's signal");
        assert!(logs_contain("initiated a graceful shutdown of the"));
        assert!(TcpStream::connect(shared.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn invalid_address_is_reported_with_server_name() {
        let specs = vec![ServerSpec::new("pprof", "not-an-address", hello())];
        let err = run(specs, &Shutdown::new(), DEFAULT_SHUTDOWN_GRACE)
            .await
            .unwrap_err();

        assert_eq!(err.server(), Some("pprof"));
        assert!(err.to_string().starts_with("could not listen for pprof on address not-an-address"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn slow_handler_is_force_closed_once() {
        let entered = Arc::new(Notify::new());
        let router = Router::new().route(
            "/",
            get({
                let entered = entered.clone();
                move || {
                    let entered = entered.clone();
                    async move {
                        entered.notify_one();
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        "late"
                    }
                }
            }),
        );
        let addr = free_addr();
        let telemetry = Telemetry::new();
        let coordinator = Coordinator::new(Duration::from_millis(100))
            .with_forced_closure_counter(telemetry.forced_closures());

        let parent = Shutdown::new();
        let specs = vec![
            ServerSpec::new("slow", addr.to_string(), router),
            ServerSpec::new("idle", free_addr().to_string(), hello()),
        ];
        let running = tokio::spawn({
            let parent = parent.clone();
            async move { coordinator.run(specs, &parent).await }.in_current_span()
        });

        wait_connectable(addr, Duration::from_secs(2)).await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let request = tokio::spawn(client.get(format!("http://{addr}/")).send());
        entered.notified().await;

        parent.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("forced closure should bound shutdown")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert!(request.await.unwrap().is_err());

        logs_assert(|lines: &[&str]| {
            let forced: Vec<_> = lines.iter().filter(|l| l.contains("forced closure")).collect();
            match forced.as_slice() {
                [line] if line.contains("slow server") => Ok(()),
                _ => Err(format!("expected one forced closure for slow, got {forced:?}")),
            }
        });
        assert!(telemetry.render().contains("http_server_forced_closures_total 1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn in_flight_request_drains_within_grace() {
        let entered = Arc::new(Notify::new());
        let router = Router::new().route(
            "/",
            get({
                let entered = entered.clone();
                move || {
                    let entered = entered.clone();
                    async move {
                        entered.notify_one();
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        "done"
                    }
                }
            }),
        );
        let addr = free_addr();
        let parent = Shutdown::new();
        let running = tokio::spawn({
            let parent = parent.clone();
            let specs = vec![ServerSpec::new("app", addr.to_string(), router)];
            async move { run(specs, &parent, Duration::from_secs(2)).await }.in_current_span()
        });

        wait_connectable(addr, Duration::from_secs(2)).await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let request = tokio::spawn(client.get(format!("http://{addr}/")).send());
        entered.notified().await;

        parent.trigger();
        let response = request.await.unwrap().unwrap();
        assert_eq!(response.text().await.unwrap(), "done");
        assert!(running.await.unwrap().is_ok());
        assert!(!logs_contain("forced closure"));
    }

    #[tokio::test]
    async fn empty_spec_list_returns_immediately() {
        assert!(run(Vec::new(), &Shutdown::new(), DEFAULT_SHUTDOWN_GRACE).await.is_ok());
    }

    #[test]
    fn spec_debug_omits_handler() {
        let spec = ServerSpec::new("app", ":3311", hello());
        assert_eq!(
            format!("{spec:?}"),
            r#"ServerSpec { name: "app", address: ":3311", .. }"#
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn ephemeral_servers_announce_their_ports() {
        let specs = vec![
            ServerSpec::new("app", ":0", hello()),
            ServerSpec::new("metrics", ":0", Telemetry::new().router()),
        ];
        let parent = Shutdown::new();
        let running = tokio::spawn({
            let parent = parent.clone();
            async move { run(specs, &parent, Duration::from_millis(50)).await }.in_current_span()
        });

        let ports = std::sync::Mutex::new(None);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                logs_assert(|lines: &[&str]| {
                    if let (Some(app), Some(metrics)) =
                        (announced_port(lines, "app"), announced_port(lines, "metrics"))
                    {
                        *ports.lock().unwrap() = Some((app, metrics));
                    }
                    Ok(())
                });
                if ports.lock().unwrap().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both servers should announce their bound address");

        let (app, metrics) = ports.lock().unwrap().take().unwrap();
        assert_ne!(app, 0);
        assert_ne!(metrics, 0);
        assert_ne!(app, metrics);
        let app = SocketAddr::from(([127, 0, 0, 1], app));
        let metrics = SocketAddr::from(([127, 0, 0, 1], metrics));

        wait_connectable(app, Duration::from_millis(100)).await;
        wait_connectable(metrics, Duration::from_millis(100)).await;

        parent.trigger();
        wait_unconnectable(app, Duration::from_millis(60)).await;
        wait_unconnectable(metrics, Duration::from_millis(60)).await;

        let result = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("run should return after cancellation")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn accept_failure_cancels_siblings() {
        let failing = free_addr();
        let idle = free_addr();
        let specs = vec![
            ServerSpec::new("failing", failing.to_string(), hello()),
            ServerSpec::new("idle", idle.to_string(), hello()),
        ];
        let parent = Shutdown::new();
        let running = tokio::spawn({
            let parent = parent.clone();
            async move { run(specs, &parent, Duration::from_millis(100)).await }.in_current_span()
        });

        wait_connectable(failing, Duration::from_secs(2)).await;
        wait_connectable(idle, Duration::from_secs(2)).await;
        break_listener(failing);

        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("an accept failure should end the run")
            .unwrap();
        match result {
            Err(ServerError::Serve { name, .. }) => assert_eq!(name, "failing"),
            other => panic!("expected serve error, got {other:?}"),
        }

        assert!(!parent.is_triggered());
        assert!(logs_contain("failing server failed"));
        assert!(logs_contain("initiated a graceful shutdown of the idle server"));
        assert!(!logs_contain("forced closure"));
        assert!(TcpStream::connect(idle).await.is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[traced_test]
    async fn accept_failure_with_request_in_flight_is_bounded_by_grace() {
        let entered = Arc::new(Notify::new());
        let failing = free_addr();
        let idle = free_addr();
        let specs = vec![
            ServerSpec::new("failing", failing.to_string(), stuck(entered.clone())),
            ServerSpec::new("idle", idle.to_string(), hello()),
        ];
        let grace = Duration::from_millis(100);
        let parent = Shutdown::new();
        let running = tokio::spawn({
            let parent = parent.clone();
            async move { run(specs, &parent, grace).await }.in_current_span()
        });

        wait_connectable(failing, Duration::from_secs(2)).await;
        wait_connectable(idle, Duration::from_secs(2)).await;

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let request = tokio::spawn(client.get(format!("http://{failing}/")).send());
        entered.notified().await;

        let started = std::time::Instant::now();
        break_listener(failing);

        let result = tokio::time::timeout(Duration::from_secs(3), running)
            .await
            .expect("the in-flight request must not hold the run open")
            .unwrap();
        assert!(started.elapsed() < grace + Duration::from_secs(1));
        match result {
            Err(ServerError::Serve { name, .. }) => assert_eq!(name, "failing"),
            other => panic!("expected serve error, got {other:?}"),
        }

        assert!(request.await.unwrap().is_err());
        assert!(logs_contain("failing server failed"));
        assert!(logs_contain("initiated a graceful shutdown of the idle server"));
        assert!(logs_contain("failing server terminated abruptly"));
        assert!(TcpStream::connect(idle).await.is_err());
    }
}
