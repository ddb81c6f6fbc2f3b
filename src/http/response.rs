//! Response assembly.
//!
//! Watch responses carry the upstream status and headers with a body fed by
//! the subscription. `Content-Length` is dropped: a late joiner's body starts
//! with the replayed cache, so the upstream length no longer holds.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use std::convert::Infallible;
use std::error::Error;

use crate::watch::{ResponseHead, WatchEvents};

/// Stream a subscription back to the client. Dropping the body unsubscribes.
pub fn watch_response(head: ResponseHead, events: WatchEvents) -> Response {
    let ResponseHead { status, mut headers } = head;
    headers.remove(header::CONTENT_LENGTH);

    let body = Body::from_stream(events.into_stream().map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Plain-text error body.
pub fn error_response(status: StatusCode, error: &(dyn Error + 'static)) -> Response {
    (status, error_chain(error)).into_response()
}

/// An error and its causes on one line, skipping causes already spelled out.
pub fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
