//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Bound listener
//!     → server.rs (accept loop, shutdown controls)
//!     → net::connection (hyper auto builder, HTTP/1.1 + HTTP/2)
//!     → Router (app.rs, observability::metrics, profiling)
//!     → Send to client
//! ```

pub mod app;
pub mod server;

pub use app::app_router;
pub use server::{Draining, RunningServer, ServeError, ServerHandle};
