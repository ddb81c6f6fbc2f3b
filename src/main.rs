//! Watch-coalescing reverse proxy for etcd.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌────────────────────────────────────────────────────┐
//!                   │                   WATCH PROXY                      │
//!   Client request  │  ┌─────────┐    ┌──────────┐                       │
//!   ────────────────┼─▶│  http   │───▶│ classify │                       │
//!                   │  │ server  │    └────┬─────┘                       │
//!                   │  └─────────┘    watch│      direct                 │
//!                   │                      ▼         │                   │
//!                   │               ┌────────────┐   │                   │
//!                   │               │ watch hub  │   │                   │
//!                   │               │ (1 call per│   │                   │
//!                   │               │fingerprint)│   │                   │
//!                   │               └─────┬──────┘   │                   │
//!                   │                     ▼          ▼                   │
//!                   │               ┌───────────────────┐                │
//!                   │               │  upstream client  │◀───────────────┼──── etcd
//!                   │               │  (round robin)    │                │
//!                   │               └───────────────────┘                │
//!                   └────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use tokio::net::TcpListener;

use watch_proxy::cli::Cli;
use watch_proxy::lifecycle::{signals, Shutdown};
use watch_proxy::observability::{logging, metrics};
use watch_proxy::HttpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.resolve()?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "watch-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        endpoints = ?config.upstream.endpoints,
        protocol = %config.watch.protocol,
        direct_attempts = config.direct_attempts(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::install_exporter(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
