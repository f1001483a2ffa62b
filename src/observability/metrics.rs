//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Build a Prometheus recorder and register the process counters on it
//! - Hand the counters to whoever increments them
//! - Expose a Prometheus-compatible `/metrics` router
//!
//! # Metrics
//! - `http_requests_total` (counter): application requests served
//! - `http_server_forced_closures_total` (counter): shutdowns that ran out of grace
//!
//! # Design Decisions
//! - The recorder is never installed globally; counters are passed in
//!   explicitly, so nothing here depends on process-wide state
//! - Counter handles are atomics shared with the recorder, cheap to clone

use axum::{routing::get, Router};
use metrics::{Counter, Key, KeyName, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const FORCED_CLOSURES_TOTAL: &str = "http_server_forced_closures_total";

/// Process metrics and the handle that renders them.
#[derive(Clone)]
pub struct Telemetry {
    handle: PrometheusHandle,
    requests: Counter,
    forced_closures: Counter,
}

impl Telemetry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();

        let requests = register_counter(&recorder, HTTP_REQUESTS_TOTAL, "Number of HTTP requests");
        let forced_closures = register_counter(
            &recorder,
            FORCED_CLOSURES_TOTAL,
            "Number of server shutdowns that had to close connections forcibly",
        );

        Self {
            handle: recorder.handle(),
            requests,
            forced_closures,
        }
    }

    /// Counter for application requests.
    pub fn requests(&self) -> Counter {
        self.requests.clone()
    }

    /// Counter for shutdowns escalated to forced closure.
    pub fn forced_closures(&self) -> Counter {
        self.forced_closures.clone()
    }

    /// Current metrics in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Router serving `GET /metrics`.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || std::future::ready(handle.render())),
        )
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

fn register_counter(recorder: &PrometheusRecorder, name: &'static str, help: &'static str) -> Counter {
    recorder.describe_counter(
        KeyName::from_const_str(name),
        None,
        SharedString::const_str(help),
    );
    let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
    recorder.register_counter(&Key::from_static_name(name), &metadata)
}
