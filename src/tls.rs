//! TLS termination for the listen socket.
//!
//! Loaded once at startup so a mismatched cert/key pair fails fast
//! rather than surfacing as a handshake error on the first connection.
//! Driven manually by the reactor (`reactor::connection`) rather than
//! through `tokio-rustls`, since the reactor thread is a synchronous
//! `mio` event loop, not an async task.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Once};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::error::GatewayError;

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Loads the cert chain and private key and builds a `ServerConfig`.
/// `with_single_cert` is where rustls checks the key actually matches
/// the leaf certificate — a mismatch surfaces here, at startup, rather
/// than on a client's first handshake.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, GatewayError> {
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Config(format!("TLS cert/key do not match: {e}")))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
    let file = File::open(path)
        .map_err(|e| GatewayError::Config(format!("cannot read TLS cert {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Config(format!("invalid TLS cert {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, GatewayError> {
    let file = File::open(path)
        .map_err(|e| GatewayError::Config(format!("cannot read TLS key {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| GatewayError::Config(format!("invalid TLS key {}: {e}", path.display())))?
        .ok_or_else(|| GatewayError::Config(format!("no private key found in {}", path.display())))
}
