//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate endpoint authorities and the listener address
//! - Validate value ranges (limits > 0, paths present)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::uri::Authority;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{Protocol, ProxyConfig};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream.endpoints must not be empty")]
    NoEndpoints,

    #[error("upstream endpoint '{0}' is not a host:port authority")]
    InvalidEndpoint(String),

    #[error("listener.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),

    #[error("{field} must not be empty")]
    EmptyPath { field: &'static str },

    #[error("watch.v3_watch_path '{0}' must start with '/'")]
    InvalidWatchPath(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }
    for endpoint in &config.upstream.endpoints {
        let valid = endpoint
            .parse::<Authority>()
            .map(|authority| authority.port_u16().is_some())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidEndpoint(endpoint.clone()));
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if let Some(tls) = &config.listener.tls {
        require_path(&mut errors, "listener.tls.cert_path", &tls.cert_path);
        require_path(&mut errors, "listener.tls.key_path", &tls.key_path);
        require_path(&mut errors, "listener.tls.client_ca_path", &tls.client_ca_path);
    }
    if let Some(tls) = &config.upstream.tls {
        require_path(&mut errors, "upstream.tls.cert_path", &tls.cert_path);
        require_path(&mut errors, "upstream.tls.key_path", &tls.key_path);
        require_path(&mut errors, "upstream.tls.ca_path", &tls.ca_path);
    }

    if config.watch.protocol == Protocol::V3 && !config.watch.v3_watch_path.starts_with('/') {
        errors.push(ValidationError::InvalidWatchPath(
            config.watch.v3_watch_path.clone(),
        ));
    }

    if config.upstream.max_idle_per_host == 0 {
        errors.push(ValidationError::Zero { field: "upstream.max_idle_per_host" });
    }
    if config.listener.max_request_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_request_body_bytes" });
    }
    if config.watch.max_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "watch.max_body_bytes" });
    }
    if config.retries.max_attempts == Some(0) {
        errors.push(ValidationError::Zero { field: "retries.max_attempts" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn require_path(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::EmptyPath { field });
    }
}
