//! Multi-listener HTTP server bootstrap.
//!
//! Runs an application endpoint, a Prometheus metrics endpoint and an
//! optional CPU profiling endpoint side by side, with one shared shutdown.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod profiling;

pub use config::BootstrapConfig;
pub use lifecycle::{Coordinator, ServerError, ServerSpec, Shutdown};
