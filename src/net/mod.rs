//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → tls.rs (load PEM material, build rustls configs)
//!     → upstream client (mutual TLS toward the coordination service)
//!     → listener (optional TLS termination, client certificates required)
//! ```
//!
//! # Design Decisions
//! - TLS material is loaded once; failures abort startup
//! - Both directions pin the aws-lc-rs crypto provider

pub mod tls;

pub use tls::TlsError;
