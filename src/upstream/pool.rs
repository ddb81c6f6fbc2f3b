//! Endpoint pool with round-robin selection.
//!
//! # Responsibilities
//! - Hold the ordered, fixed set of upstream endpoints
//! - Rotate through them deterministically, one step per call
//!
//! # Design Decisions
//! - No health tracking: a failing endpoint is skipped on the next call only
//!   because the cursor has already moved past it
//! - The cursor is an atomic counter, so selection needs no lock

use axum::http::uri::Authority;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::upstream::UpstreamError;

/// Ordered upstream endpoints plus a rotation cursor.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Authority>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    /// Parse `host:port` endpoints. The pool must not be empty.
    pub fn new<S: AsRef<str>>(endpoints: &[S]) -> Result<Self, UpstreamError> {
        if endpoints.is_empty() {
            return Err(UpstreamError::NoEndpoints);
        }
        let endpoints = endpoints
            .iter()
            .map(|e| {
                e.as_ref()
                    .trim()
                    .parse::<Authority>()
                    .map_err(|_| UpstreamError::InvalidEndpoint(e.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Return the endpoint under the cursor and advance it.
    pub fn next(&self) -> &Authority {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }
}
