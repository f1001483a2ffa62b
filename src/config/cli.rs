//! Command-line flags and environment variables.

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::{BootstrapConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(name = "server-bootstrap")]
#[command(version, about = "Runs the application, metrics and profiling HTTP listeners", long_about = None)]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

impl Cli {
    /// Resolve the effective configuration.
    pub fn load_config(&self) -> Result<BootstrapConfig, ConfigError> {
        load_config(self.config.as_deref(), &self.overrides)
    }
}

/// Per-field overrides. Unset flags leave the file or default value alone.
#[derive(Debug, Default, Clone, Args)]
pub struct ConfigOverrides {
    /// Application endpoint bind address
    #[arg(long, env = "ADDR")]
    pub addr: Option<String>,

    /// Metrics endpoint bind address
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// Profiling endpoint bind address
    #[arg(long, env = "PPROF_ADDR")]
    pub pprof_addr: Option<String>,

    /// Start the profiling endpoint
    #[arg(long, env = "ENABLE_PPROF", num_args = 0..=1, default_missing_value = "true")]
    pub enable_pprof: Option<bool>,

    /// Grace period for draining in-flight requests on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut BootstrapConfig) {
        if let Some(addr) = &self.addr {
            config.listeners.addr = addr.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.listeners.metrics_addr = addr.clone();
        }
        if let Some(addr) = &self.pprof_addr {
            config.listeners.pprof_addr = addr.clone();
        }
        if let Some(enabled) = self.enable_pprof {
            config.listeners.enable_pprof = enabled;
        }
        if let Some(grace_ms) = self.shutdown_grace_ms {
            config.shutdown.grace_ms = grace_ms;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
    }
}
