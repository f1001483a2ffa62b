//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (grace > 0, ports present, known log level)
//! - Detect listeners that would fight over one address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BootstrapConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::BootstrapConfig;
use crate::net::listener::{is_ephemeral, normalize_address};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyAddress { field: &'static str },

    #[error("{field} `{address}` is not a valid bind address")]
    InvalidAddress { field: &'static str, address: String },

    #[error("{first} and {second} both bind `{address}`")]
    DuplicateAddress {
        first: &'static str,
        second: &'static str,
        address: String,
    },

    #[error("shutdown.grace_ms must be greater than zero")]
    ZeroGrace,

    #[error("unknown log level `{0}`")]
    UnknownLogLevel(String),
}

/// Check a merged configuration.
pub fn validate_config(config: &BootstrapConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listeners = &config.listeners;
    let mut addresses = vec![
        ("listeners.addr", listeners.addr.as_str()),
        ("listeners.metrics_addr", listeners.metrics_addr.as_str()),
    ];
    if listeners.enable_pprof {
        addresses.push(("listeners.pprof_addr", listeners.pprof_addr.as_str()));
    }

    let mut seen: Vec<(&'static str, String)> = Vec::new();
    for (field, address) in addresses {
        if address.trim().is_empty() {
            errors.push(ValidationError::EmptyAddress { field });
            continue;
        }
        let normalized = match normalize_address(address) {
            Ok(normalized) => normalized,
            Err(_) => {
                errors.push(ValidationError::InvalidAddress {
                    field,
                    address: address.to_string(),
                });
                continue;
            }
        };
        if is_ephemeral(address) {
            continue;
        }
        if let Some((first, _)) = seen.iter().find(|(_, other)| *other == normalized) {
            errors.push(ValidationError::DuplicateAddress {
                first: *first,
                second: field,
                address: normalized.clone(),
            });
        }
        seen.push((field, normalized));
    }

    if config.shutdown.grace_ms == 0 {
        errors.push(ValidationError::ZeroGrace);
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
