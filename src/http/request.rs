//! Request classification.
//!
//! # Responsibilities
//! - Tell watch requests from everything else
//! - Rebuild a buffered request for another attempt
//!
//! # Design Decisions
//! - v2: a GET carrying a `wait` query parameter, whatever its value
//! - v3: any request to the configured watch path

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Method, Request};
use bytes::Bytes;

use crate::config::{Protocol, WatchConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Watch,
    Direct,
}

pub fn classify<B>(request: &Request<B>, watch: &WatchConfig) -> RequestKind {
    let is_watch = match watch.protocol {
        Protocol::V2 => request.method() == Method::GET && has_query_key(request, "wait"),
        Protocol::V3 => request.uri().path() == watch.v3_watch_path,
    };
    if is_watch {
        RequestKind::Watch
    } else {
        RequestKind::Direct
    }
}

fn has_query_key<B>(request: &Request<B>, key: &str) -> bool {
    request
        .uri()
        .query()
        .map(|query| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some(key))
        })
        .unwrap_or(false)
}

/// A fresh request from buffered parts, for one forwarding attempt.
pub fn rebuild(parts: &Parts, body: &Bytes) -> Request<Body> {
    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    request
}
