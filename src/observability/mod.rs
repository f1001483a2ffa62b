//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, JSON by default)
//!     → metrics.rs (counters handed to handlers and the coordinator)
//!
//! Consumers:
//!     → stdout (log aggregation)
//!     → metrics listener (Prometheus scrape of /metrics)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::Telemetry;
