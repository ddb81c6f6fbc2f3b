//! TLS configuration and certificate loading.
//!
//! Both directions use rustls with the aws-lc-rs provider:
//! - upstream: client identity plus the CA bundle that signs the coordination service
//! - listener: server identity, and every client must present a certificate
//!   issued by the configured CA

use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ClientTlsConfig, ServerTlsConfig};

/// Error type for TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every certificate of a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key of a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Build a root store from a CA bundle.
pub fn load_roots(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Client configuration for upstream connections.
///
/// Without TLS material the proxy talks plain http, and the returned config
/// (empty roots, no identity) is never used for a handshake.
pub fn client_config(tls: Option<&ClientTlsConfig>) -> Result<ClientConfig, TlsError> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?;

    let Some(tls) = tls else {
        return Ok(builder
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth());
    };

    let roots = load_roots(Path::new(&tls.ca_path))?;
    let certs = load_certs(Path::new(&tls.cert_path))?;
    let key = load_private_key(Path::new(&tls.key_path))?;

    tracing::info!(
        cert = %tls.cert_path,
        ca = %tls.ca_path,
        "Upstream mutual TLS enabled"
    );

    Ok(builder
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)?)
}

/// Server configuration requiring a client certificate signed by the configured CA.
pub fn server_config(tls: &ServerTlsConfig) -> Result<ServerConfig, TlsError> {
    let provider = provider();
    let roots = load_roots(Path::new(&tls.client_ca_path))?;
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;

    let certs = load_certs(Path::new(&tls.cert_path))?;
    let key = load_private_key(Path::new(&tls.key_path))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}
