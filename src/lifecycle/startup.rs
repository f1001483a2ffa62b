//! Startup orchestration.
//!
//! Turns the validated configuration into the list of servers the
//! coordinator runs: the profiler (when enabled), then metrics, then the
//! application.

use crate::config::ListenersConfig;
use crate::http::app_router;
use crate::lifecycle::coordinator::ServerSpec;
use crate::observability::Telemetry;
use crate::profiling::pprof_router;

pub const APP_SERVER: &str = "app";
pub const METRICS_SERVER: &str = "metrics";
pub const PPROF_SERVER: &str = "pprof";

/// Server specs for the configured listeners.
pub fn server_specs(listeners: &ListenersConfig, telemetry: &Telemetry) -> Vec<ServerSpec> {
    let mut specs = Vec::with_capacity(3);

    if listeners.enable_pprof {
        specs.push(ServerSpec::new(PPROF_SERVER, &listeners.pprof_addr, pprof_router()));
    }
    specs.push(ServerSpec::new(METRICS_SERVER, &listeners.metrics_addr, telemetry.router()));
    specs.push(ServerSpec::new(APP_SERVER, &listeners.addr, app_router(telemetry.requests())));

    specs
}
