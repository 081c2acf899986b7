//! rustls configuration helpers (ring provider, safe default versions).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use netkit_core::error::{NetError, Result};

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server config without client authentication.
pub fn server_config(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Arc<ServerConfig>> {
    if certs.is_empty() {
        return Err(NetError::Tls("empty certificate chain".to_string()));
    }
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| NetError::Tls(format!("protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| NetError::Tls(format!("certificate: {}", e)))?;
    Ok(Arc::new(config))
}

/// Server config from a PEM certificate chain and a PEM private key.
pub fn server_config_from_pem(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    server_config(load_certs(cert_path)?, load_private_key(key_path)?)
}

/// Client config trusting exactly `roots`.
pub fn client_config_with_roots<I>(roots: I) -> Result<Arc<ClientConfig>>
where
    I: IntoIterator<Item = CertificateDer<'static>>,
{
    let mut store = RootCertStore::empty();
    for cert in roots {
        store
            .add(cert)
            .map_err(|e| NetError::Tls(format!("root certificate: {}", e)))?;
    }
    if store.is_empty() {
        return Err(NetError::Tls("no root certificates".to_string()));
    }
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| NetError::Tls(format!("protocol versions: {}", e)))?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Client config trusting the certificates in a PEM file.
pub fn client_config_from_pem(ca_path: &Path) -> Result<Arc<ClientConfig>> {
    client_config_with_roots(load_certs(ca_path)?)
}

/// Every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| NetError::os("open certificate", e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| NetError::Tls(format!("{}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(NetError::Tls(format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

/// The first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| NetError::os("open private key", e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| NetError::Tls(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| NetError::Tls(format!("{}: no private key found", path.display())))
}

/// Parse a DNS name or IP address for SNI and certificate checks.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string()).map_err(|e| NetError::Tls(format!("server name '{}': {}", host, e)))
}
