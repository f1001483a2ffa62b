//! Multi-listener HTTP server bootstrap.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!   SIGTERM/SIGINT ──▶│ Shutdown (parent)                            │
//!                     │     └─ child (group) ── first failure ◀──┐   │
//!                     │           │                              │   │
//!                     │   ┌───────┼─────────────┬───────────┐    │   │
//!                     │   ▼       ▼             ▼           │    │   │
//!                     │ watcher watcher      watcher        │    │   │
//!                     │   │       │             │           │    │   │
//!                     │ pprof   metrics        app ─────────┴────┘   │
//!                     │ :6060   :3001          :3311                 │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::process::ExitCode;

use clap::Parser;

use server_bootstrap::config::Cli;
use server_bootstrap::lifecycle::{server_specs, signals, Coordinator, Shutdown};
use server_bootstrap::observability::{init_logging, Telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(2);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listeners.addr,
        metrics_addr = %config.listeners.metrics_addr,
        pprof_addr = %config.listeners.pprof_addr,
        enable_pprof = config.listeners.enable_pprof,
        shutdown_grace_ms = config.shutdown.grace_ms,
        "Configuration loaded"
    );

    let telemetry = Telemetry::new();
    let specs = server_specs(&config.listeners, &telemetry);

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signals::trigger_on_signal(shutdown).await;
            if let Ok(signal) = signals::wait_for_signal().await {
                tracing::warn!(signal, "Second shutdown signal received, exiting immediately");
                std::process::exit(130);
            }
        }
    });

    let coordinator = Coordinator::new(config.shutdown.grace())
        .with_forced_closure_counter(telemetry.forced_closures());

    match coordinator.run(specs, &shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(error = %error, "run");
            ExitCode::FAILURE
        }
    }
}
