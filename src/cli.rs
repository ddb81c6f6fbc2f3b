//! Command line surface.
//!
//! Flags override values from the config file; the merged result is validated
//! again before use.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{load_config, validate_config, ConfigError, Protocol, ProxyConfig};

#[derive(Debug, Parser)]
#[command(name = "watch-proxy")]
#[command(about = "Coalescing reverse proxy for etcd watches", long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma separated upstream endpoints (host:port).
    #[arg(long, env = "ETCD_ENDPOINTS", value_delimiter = ',')]
    pub endpoints: Option<Vec<String>>,

    /// Listen address.
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Watch protocol: v2 (long-poll) or v3 (JSON gateway stream).
    #[arg(short, long)]
    pub protocol: Option<Protocol>,
}

impl Cli {
    /// Load the config file, if any, apply the flags and validate.
    pub fn resolve(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(endpoints) = &self.endpoints {
            let endpoints: Vec<String> = endpoints
                .iter()
                .map(|e| e.trim())
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
            // An empty ETCD_ENDPOINTS keeps the configured endpoints.
            if !endpoints.is_empty() {
                config.upstream.endpoints = endpoints;
            }
        }
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(protocol) = self.protocol {
            config.watch.protocol = protocol;
        }
    }
}
