//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root configuration for the watch proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Coordination service endpoints and outbound transport.
    pub upstream: UpstreamConfig,

    /// Watch detection and coalescing.
    pub watch: WatchConfig,

    /// Retry configuration for direct requests.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5678").
    pub bind_address: String,

    /// Optional TLS termination with client certificate verification.
    pub tls: Option<ServerTlsConfig>,

    /// Upper bound on a direct request body, buffered so it can be resent.
    pub max_request_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5678".to_string(),
            tls: None,
            max_request_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerTlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: String,

    /// Path to private key (PEM).
    pub key_path: String,

    /// CA bundle every client certificate must chain to (PEM).
    pub client_ca_path: String,
}

/// Outbound connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Ordered `host:port` endpoints, used round robin.
    pub endpoints: Vec<String>,

    /// Idle connections kept per upstream host. Total idle connections are unbounded.
    pub max_idle_per_host: usize,

    /// Client identity for mutual TLS. Its presence switches the scheme to https.
    pub tls: Option<ClientTlsConfig>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            max_idle_per_host: 128,
            tls: None,
        }
    }
}

/// Mutual TLS material for upstream connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientTlsConfig {
    /// Client certificate chain (PEM).
    pub cert_path: String,

    /// Client private key (PEM).
    pub key_path: String,

    /// CA bundle used to verify the upstream servers (PEM).
    pub ca_path: String,
}

/// Upstream protocol flavour, which decides what counts as a watch and how
/// watches are fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// `GET` requests carrying a `wait` query parameter, keyed by request target.
    #[default]
    V2,
    /// Streaming watch endpoint with a JSON body, keyed by key and start revision.
    V3,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v2" => Ok(Protocol::V2),
            "v3" => Ok(Protocol::V3),
            other => Err(format!("unknown protocol '{}', expected v2 or v3", other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::V2 => f.write_str("v2"),
            Protocol::V3 => f.write_str("v3"),
        }
    }
}

/// Watch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub protocol: Protocol,

    /// Path of the streaming watch endpoint (v3 only).
    pub v3_watch_path: String,

    /// Upper bound on a watch request body read for fingerprinting.
    pub max_body_bytes: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::V2,
            v3_watch_path: "/v3/watch".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per direct request. Defaults to twice the endpoint count.
    pub max_attempts: Option<u32>,

    /// Base delay for exponential backoff in milliseconds (0 retries immediately).
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: 0,
            max_delay_ms: 1000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Attempts for a direct request once defaults are applied.
    pub fn direct_attempts(&self) -> u32 {
        self.retries
            .max_attempts
            .unwrap_or_else(|| (self.upstream.endpoints.len() as u32).saturating_mul(2).max(1))
    }
}
