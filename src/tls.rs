//! TLS server configuration helpers: build a rustls `ServerConfig` from PEM
//! material, with or without required client certificates (mTLS).

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};

use crate::{Error, Result};

/// Build a `ServerConfig` from PEM certificate-chain and key bytes.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<rustls::ServerConfig>> {
    const OP: &str = "tls.server_config_from_pem";
    let certs = parse_certs(cert_pem)?;
    let key = parse_private_key(key_pem)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::InvalidParameter(format!("{OP}: invalid cert/key pair: {e}")))?;
    Ok(Arc::new(config))
}

/// Build a `ServerConfig` from PEM files on disk.
pub fn server_config_from_files(
    cert_file: impl AsRef<Path>,
    key_file: impl AsRef<Path>,
) -> Result<Arc<rustls::ServerConfig>> {
    let cert_pem = read_file(cert_file.as_ref())?;
    let key_pem = read_file(key_file.as_ref())?;
    server_config_from_pem(&cert_pem, &key_pem)
}

/// Build an mTLS `ServerConfig`: clients must present a certificate signed
/// by one of the CAs in `client_ca_pem`.
pub fn server_config_mtls(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_ca_pem: &[u8],
) -> Result<Arc<rustls::ServerConfig>> {
    const OP: &str = "tls.server_config_mtls";
    let certs = parse_certs(cert_pem)?;
    let key = parse_private_key(key_pem)?;
    let mut roots = RootCertStore::empty();
    for ca in parse_certs(client_ca_pem)? {
        roots
            .add(ca)
            .map_err(|e| Error::InvalidParameter(format!("{OP}: invalid client ca cert: {e}")))?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::InvalidParameter(format!("{OP}: client verifier: {e}")))?;
    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| Error::InvalidParameter(format!("{OP}: invalid cert/key pair: {e}")))?;
    Ok(Arc::new(config))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::InvalidParameter(format!("tls.read_file: unable to read {}: {e}", path.display()))
    })
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    const OP: &str = "tls.parse_certs";
    let mut reader = BufReader::new(pem);
    let certs: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidParameter(format!("{OP}: invalid pem certificates: {e}")))?;
    if certs.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "{OP}: no certificates found in pem data"
        )));
    }
    Ok(certs)
}

/// PKCS#8 first, falling back to RSA keys, the formats openssl emits.
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    const OP: &str = "tls.parse_private_key";
    let mut reader = BufReader::new(pem);
    let pkcs8: Vec<_> = pkcs8_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidParameter(format!("{OP}: invalid pkcs8 key: {e}")))?;
    if let Some(key) = pkcs8.into_iter().next() {
        return Ok(key.into());
    }
    let mut reader = BufReader::new(pem);
    let rsa: Vec<_> = rsa_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidParameter(format!("{OP}: invalid rsa key: {e}")))?;
    rsa.into_iter()
        .next()
        .map(Into::into)
        .ok_or_else(|| Error::InvalidParameter(format!("{OP}: no private key found in pem data")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &[u8] = include_bytes!("../tests/fixtures/server-cert.pem");
    const KEY: &[u8] = include_bytes!("../tests/fixtures/server-key.pem");

    #[test]
    fn test_server_config_from_pem() {
        let config = server_config_from_pem(CERT, KEY).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_server_config_mtls() {
        // The fixture cert is self-signed, so it can act as its own CA.
        let config = server_config_mtls(CERT, KEY, CERT).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_rejects_garbage_pem() {
        assert!(server_config_from_pem(b"not pem", KEY).is_err());
        assert!(server_config_from_pem(CERT, b"not pem").is_err());
    }
}
