//! On-demand CPU profiling endpoint.
//!
//! # Routes
//! - `GET /debug/pprof/`: index of the available profiles
//! - `GET /debug/pprof/profile`: gzipped pprof protobuf
//! - `GET /debug/pprof/flamegraph`: gzipped SVG flamegraph
//!
//! Only one profile can be collected at a time; a concurrent request fails
//! with `500`.

pub mod handlers;

use axum::{routing::get, Router};

/// Router for the profiling listener.
pub fn pprof_router() -> Router {
    Router::new()
        .route("/debug/pprof/", get(handlers::index))
        .route("/debug/pprof/profile", get(handlers::profile))
        .route("/debug/pprof/flamegraph", get(handlers::flamegraph))
}
