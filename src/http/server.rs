//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with one catch-all handler
//! - Serve plain HTTP, or HTTPS with client certificates
//! - Send watch requests through the hub, everything else straight upstream
//! - Close every watch on shutdown so draining can finish

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::{ProxyConfig, WatchConfig};
use crate::http::request::{classify, rebuild, RequestKind};
use crate::http::response::{error_chain, error_response, watch_response};
use crate::lifecycle::shutdown;
use crate::net::{tls, TlsError};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::upstream::{UpstreamClient, UpstreamError};
use crate::watch::{Fingerprinter, WatchHub};

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("listener TLS: {0}")]
    Tls(#[from] TlsError),

    #[error("server I/O: {0}")]
    Io(#[from] io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: WatchHub<UpstreamClient>,
    pub upstream: Arc<UpstreamClient>,
    pub retry: RetryPolicy,
    pub watch: WatchConfig,
    pub max_request_body_bytes: usize,
}

/// HTTP front door of the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    hub: WatchHub<UpstreamClient>,
}

impl HttpServer {
    /// Build the upstream client, the hub and the router. Bad endpoints or TLS
    /// material fail here.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let upstream = Arc::new(UpstreamClient::new(&config.upstream)?);
        let hub = WatchHub::new(Arc::clone(&upstream), Fingerprinter::new(&config.watch));

        let state = AppState {
            hub: hub.clone(),
            upstream,
            retry: RetryPolicy::from_config(&config),
            watch: config.watch.clone(),
            max_request_body_bytes: config.listener.max_request_body_bytes,
        };

        let router = Self::build_router(state);
        Ok(Self {
            router,
            config,
            hub,
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            protocol = %self.config.watch.protocol,
            tls = self.config.listener.tls.is_some(),
            "HTTP server starting"
        );

        let hub = self.hub.clone();
        let signal = async move {
            shutdown::wait(shutdown).await;
            tracing::info!("Closing open watches");
            hub.close_all();
        };

        match &self.config.listener.tls {
            None => {
                axum::serve(listener, self.router)
                    .with_graceful_shutdown(signal)
                    .await?;
            }
            Some(tls_config) => {
                let rustls = RustlsConfig::from_config(Arc::new(tls::server_config(tls_config)?));
                let handle = axum_server::Handle::new();
                let stopper = handle.clone();
                tokio::spawn(async move {
                    signal.await;
                    stopper.graceful_shutdown(None);
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn hub(&self) -> &WatchHub<UpstreamClient> {
        &self.hub
    }
}

/// Watch requests join the hub; everything else goes straight upstream.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    match classify(&request, &state.watch) {
        RequestKind::Watch => watch_handler(&state, request).await,
        RequestKind::Direct => direct_handler(&state, request).await,
    }
}

async fn watch_handler(state: &AppState, request: Request<Body>) -> Response {
    let start = Instant::now();
    let watcher = match state.hub.watch(request).await {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected watch request");
            metrics::record_request("watch", 400, start);
            return error_response(StatusCode::BAD_REQUEST, &e);
        }
    };

    let fingerprint = watcher.fingerprint().clone();
    let (head, events) = watcher.header().await;
    match head {
        Ok(head) => {
            metrics::record_request("watch", head.status.as_u16(), start);
            watch_response(head, events)
        }
        Err(e) => {
            tracing::warn!(fingerprint = %fingerprint, error = %e, "Watch failed");
            metrics::record_request("watch", 500, start);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

async fn direct_handler(state: &AppState, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.max_request_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            metrics::record_request("direct", 400, start);
            return (StatusCode::BAD_REQUEST, error_chain(&e)).into_response();
        }
    };

    let mut attempt = 1;
    loop {
        match state.upstream.forward(rebuild(&parts, &body)).await {
            Ok(response) => {
                metrics::record_request("direct", response.status().as_u16(), start);
                return response.into_response();
            }
            Err(e) if state.retry.should_retry(attempt, &e) => {
                attempt += 1;
                let delay = state.retry.delay(attempt);
                tracing::warn!(
                    method = %parts.method,
                    uri = %parts.uri,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "Retrying direct request"
                );
                metrics::record_direct_retry();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                tracing::error!(
                    method = %parts.method,
                    uri = %parts.uri,
                    attempts = attempt,
                    error = %e,
                    "Direct request failed"
                );
                metrics::record_request("direct", 500, start);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
            }
        }
    }
}
