//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → ServerSpecs (pprof?, metrics, app)
//!
//! Run (coordinator.rs):
//!     per spec: bind → "server up" → serve ─┐
//!     per spec: watcher ← shared Shutdown ←─┴─ first failure
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → trigger → stop accepting → drain (bounded) → forced closure
//! ```
//!
//! # Design Decisions
//! - Fail fast: a bind or serve failure on one server stops all of them
//! - Shutdown has a per-server timeout; forced closure is not an error
//! - The caller's signal is never triggered by the coordinator

pub mod coordinator;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use coordinator::{run, Coordinator, ServerError, ServerSpec, DEFAULT_SHUTDOWN_GRACE};
pub use shutdown::Shutdown;
pub use startup::server_specs;
