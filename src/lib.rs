//! Coalescing reverse proxy for etcd watches.
//!
//! Identical watch requests share one upstream stream; every other request is
//! forwarded directly, round robin across the configured endpoints.

pub mod cli;
pub mod config;
pub mod http;
pub mod net;
pub mod upstream;
pub mod watch;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use watch::WatchHub;
