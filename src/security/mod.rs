//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → headers.rs (strip Connection-named and hop-by-hop fields)
//! Response from upstream:
//!     → headers.rs (same stripping before the client sees it)
//! ```
//!
//! Transport security (mutual TLS) lives in `net::tls`.

pub mod headers;

pub use headers::{sanitize_request_headers, sanitize_response_headers, HOP_BY_HOP_HEADERS};
