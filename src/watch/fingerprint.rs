//! Coalescing keys for watch requests.
//!
//! Two requests share one upstream watch iff their fingerprints are equal.
//! - v2: the verbatim request target (path and query)
//! - v3: `{key}-{start_revision}` taken from the JSON watch body; the body is
//!   read and put back so the request can still be forwarded

use axum::body::{to_bytes, Body};
use axum::http::Request;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::config::{Protocol, WatchConfig};

/// Opaque identity of one logical watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A watch request that cannot be fingerprinted. Rejected, never coalesced.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to read watch request body: {0}")]
    Body(#[source] axum::Error),

    #[error("malformed watch request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("watch key is not valid base64url: {0}")]
    KeyEncoding(#[from] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct WatchRequest {
    create_request: CreateRequest,
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    key: String,
    #[serde(default, deserialize_with = "revision")]
    start_revision: i64,
}

/// proto3 JSON writes int64 as a string; plain numbers are accepted too.
fn revision<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Revision {
        Number(i64),
        Text(String),
    }

    match Revision::deserialize(deserializer)? {
        Revision::Number(n) => Ok(n),
        Revision::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

/// Derives fingerprints according to the configured protocol.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    protocol: Protocol,
    max_body_bytes: usize,
}

impl Fingerprinter {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            protocol: config.protocol,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Fingerprint `request`, leaving it forwardable.
    pub async fn fingerprint(&self, request: &mut Request<Body>) -> Result<Fingerprint, FingerprintError> {
        match self.protocol {
            Protocol::V2 => Ok(target_fingerprint(request)),
            Protocol::V3 => {
                let body = std::mem::take(request.body_mut());
                let bytes = to_bytes(body, self.max_body_bytes)
                    .await
                    .map_err(FingerprintError::Body)?;
                *request.body_mut() = Body::from(bytes.clone());
                body_fingerprint(&bytes)
            }
        }
    }
}

/// Variant A: the request target, byte for byte.
pub fn target_fingerprint<B>(request: &Request<B>) -> Fingerprint {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Fingerprint(target.to_string())
}

/// Variant B: decoded key and start revision of a JSON watch create request.
pub fn body_fingerprint(body: &[u8]) -> Result<Fingerprint, FingerprintError> {
    let request: WatchRequest = serde_json::from_slice(body)?;
    let key = URL_SAFE.decode(request.create_request.key.as_bytes())?;
    // Escaping keeps distinct byte keys distinct without requiring UTF-8.
    Ok(Fingerprint(format!(
        "{}-{}",
        key.escape_ascii(),
        request.create_request.start_revision
    )))
}
