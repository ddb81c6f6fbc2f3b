//! Outbound connection subsystem.
//!
//! # Data Flow
//! ```text
//! Watch hub / direct handler
//!     → client.rs (rewrite target, strip hop-by-hop headers)
//!     → pool.rs (next endpoint, round robin)
//!     → hyper transport (plain or mutual TLS)
//!     → Response with an unread streaming body
//! ```
//!
//! # Design Decisions
//! - The watch hub only sees the `Upstream` trait, so it can run against a
//!   scripted source in tests
//! - Failures surface as `UpstreamError`; no partial response is synthesized

pub mod client;
pub mod pool;

use axum::body::Body;
use axum::http::{Request, Response};
use std::future::Future;
use thiserror::Error;

use crate::net::TlsError;

pub use client::UpstreamClient;
pub use pool::EndpointPool;

/// Errors raised while building or using the outbound client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no upstream endpoints configured")]
    NoEndpoints,

    #[error("invalid upstream endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(#[from] axum::http::Error),

    #[error("upstream TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("upstream request failed: {0}")]
    Transport(#[source] hyper_util::client::legacy::Error),
}

/// Something that can execute one request against the coordination service.
pub trait Upstream: Send + Sync + 'static {
    fn forward(
        &self,
        request: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, UpstreamError>> + Send;
}
