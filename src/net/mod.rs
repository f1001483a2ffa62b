//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Bind address (":3311", "127.0.0.1:0", ...)
//!     → listener.rs (normalize, bind, resolve local address)
//!     → accept loop (http::server)
//!     → connection.rs (one task per connection, graceful drain, abort)
//!
//! Connection States:
//!     Accepted → Serving → Draining → Closed
//!                                  ↘ Aborted (forced closure)
//! ```
//!
//! # Design Decisions
//! - Each connection is owned by exactly one server's connection set
//! - Forced closure aborts connection tasks, which drops their sockets

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionSet, Drain};
pub use listener::{BindError, Listener};
