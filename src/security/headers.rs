//! Hop-by-hop header stripping (RFC 7230, section 6.1).
//!
//! # Responsibilities
//! - Remove every field named by the `Connection` header
//! - Remove the fixed hop-by-hop set in both directions
//!
//! # Design Decisions
//! - `Te: trailers` survives on requests; it is end-to-end in practice
//! - Responses lose the whole set, `Te` included

use axum::http::header::{HeaderMap, HeaderName, CONNECTION, TE};

/// Headers that only describe a single transport leg.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove the fields listed in `Connection`.
pub fn remove_connection_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|field| HeaderName::from_bytes(field.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
}

/// Prepare headers of a request before it leaves for the upstream.
pub fn sanitize_request_headers(headers: &mut HeaderMap) {
    remove_connection_headers(headers);
    for name in HOP_BY_HOP_HEADERS {
        if name == "te" && headers.get(TE).is_some_and(|v| v == "trailers") {
            continue;
        }
        headers.remove(name);
    }
}

/// Prepare headers of an upstream response before it reaches the client.
pub fn sanitize_response_headers(headers: &mut HeaderMap) {
    remove_connection_headers(headers);
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
