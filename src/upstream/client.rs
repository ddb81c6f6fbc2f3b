//! Outbound HTTP client.
//!
//! # Responsibilities
//! - Pick the next endpoint round robin
//! - Rewrite scheme and authority, strip hop-by-hop headers
//! - Execute one round trip and hand back the unread, streaming body
//!
//! # Design Decisions
//! - Scheme is fixed at construction: https iff TLS material is configured
//! - Unbounded idle connections overall, bounded per host, no idle timeout,
//!   so many long-lived watch streams can share warm connections
//! - No retries here; callers decide

use axum::body::Body;
use axum::http::uri::{PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, Response, Uri, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::net::tls;
use crate::security::{sanitize_request_headers, sanitize_response_headers};
use crate::upstream::pool::EndpointPool;
use crate::upstream::{Upstream, UpstreamError};

/// Client for the coordination service endpoints.
#[derive(Debug)]
pub struct UpstreamClient {
    pool: EndpointPool,
    scheme: Scheme,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl UpstreamClient {
    /// Build the client. TLS material errors are fatal here, never per request.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let pool = EndpointPool::new(&config.endpoints)?;
        let tls_config = tls::client_config(config.tls.as_ref())?;
        let scheme = if config.tls.is_some() {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_keepalive(Some(Duration::from_secs(30)));

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(None::<Duration>)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(connector);

        tracing::info!(
            endpoints = ?config.endpoints,
            scheme = %scheme,
            max_idle_per_host = config.max_idle_per_host,
            "Upstream client ready"
        );

        Ok(Self { pool, scheme, client })
    }

    /// Forward one request to the next endpoint.
    ///
    /// The request is consumed; callers that need it again rebuild it.
    pub async fn forward(&self, mut request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let endpoint = self.pool.next().clone();
        let path_and_query = request
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        *request.uri_mut() = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(endpoint.clone())
            .path_and_query(path_and_query)
            .build()?;
        *request.version_mut() = Version::HTTP_11;

        let headers = request.headers_mut();
        sanitize_request_headers(headers);
        if let Ok(host) = HeaderValue::from_str(endpoint.as_str()) {
            headers.insert(header::HOST, host);
        }

        tracing::debug!(
            endpoint = %endpoint,
            method = %request.method(),
            uri = %request.uri(),
            "Forwarding upstream"
        );

        let response = self.client.request(request).await.map_err(|e| {
            tracing::warn!(endpoint = %endpoint, error = %e, "Upstream round trip failed");
            UpstreamError::Transport(e)
        })?;

        let (mut parts, body) = response.into_parts();
        sanitize_response_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Upstream for UpstreamClient {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        UpstreamClient::forward(self, request).await
    }
}
