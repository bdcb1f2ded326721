//! TLS configuration for the jidl protocol.
//!
//! Key material is loaded from PEM files into explicit config values —
//! never into process-wide state — so two endpoints in one process can
//! carry distinct certificates. The *keystore* file holds the endpoint's
//! certificate chain and private key (concatenated PEM blocks); the
//! *truststore* file holds the CA certificates of acceptable peers.
//!
//! Both sides are pinned to TLS 1.2 with the AES-128-GCM/SHA-256 ECDHE
//! suites and mutual authentication: the server requires a client
//! certificate signed by its truststore, the client verifies the server
//! against its own.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{CipherSuite, RootCertStore};

use crate::error::ProtocolError;

/// TLS material for a [`crate::ProtocolServer`].
#[derive(Clone, Debug)]
pub struct ServerTlsConfig {
    pub(crate) config: Arc<rustls::ServerConfig>,
}

/// TLS material for a [`crate::ProtocolClient`].
#[derive(Clone, Debug)]
pub struct ClientTlsConfig {
    pub(crate) config: Arc<rustls::ClientConfig>,
}

impl ServerTlsConfig {
    /// Builds a server configuration from PEM files.
    ///
    /// `keystore` must contain the server certificate chain and its private
    /// key; `truststore` the CA bundle used to verify client certificates.
    pub fn from_pem_files(
        keystore: impl AsRef<Path>,
        truststore: impl AsRef<Path>,
    ) -> Result<Self, ProtocolError> {
        let (certs, key) = load_keystore(keystore.as_ref())?;
        let roots = load_truststore(truststore.as_ref())?;

        let verifier = WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::new(provider()),
        )
        .build()
        .map_err(|e| ProtocolError::AuthMaterial(format!("client verifier: {e}")))?;

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(provider()))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .map_err(|e| ProtocolError::AuthMaterial(format!("protocol versions: {e}")))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| ProtocolError::AuthMaterial(format!("server certificate: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

impl ClientTlsConfig {
    /// Builds a client configuration from PEM files.
    ///
    /// `keystore` must contain the client certificate chain and its private
    /// key; `truststore` the CA bundle used to verify the server.
    pub fn from_pem_files(
        keystore: impl AsRef<Path>,
        truststore: impl AsRef<Path>,
    ) -> Result<Self, ProtocolError> {
        let (certs, key) = load_keystore(keystore.as_ref())?;
        let roots = load_truststore(truststore.as_ref())?;

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider()))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .map_err(|e| ProtocolError::AuthMaterial(format!("protocol versions: {e}")))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| ProtocolError::AuthMaterial(format!("client certificate: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

/// The crypto provider restricted to the one accepted cipher strength:
/// TLS 1.2 ECDHE with AES-128-GCM/SHA-256.
fn provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.cipher_suites.retain(|suite| {
        matches!(
            suite.suite(),
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
                | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
        )
    });
    provider
}

fn load_keystore(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ProtocolError> {
    let data = std::fs::read(path).map_err(|e| {
        ProtocolError::AuthMaterial(format!("cannot read keystore {}: {e}", path.display()))
    })?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(data.as_slice()))
            .collect::<Result<_, _>>()
            .map_err(|e| {
                ProtocolError::AuthMaterial(format!(
                    "bad certificate in {}: {e}",
                    path.display()
                ))
            })?;
    if certs.is_empty() {
        return Err(ProtocolError::AuthMaterial(format!(
            "no certificate found in {}",
            path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(data.as_slice()))
        .map_err(|e| {
            ProtocolError::AuthMaterial(format!("bad private key in {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            ProtocolError::AuthMaterial(format!("no private key found in {}", path.display()))
        })?;

    Ok((certs, key))
}

fn load_truststore(path: &Path) -> Result<RootCertStore, ProtocolError> {
    let data = std::fs::read(path).map_err(|e| {
        ProtocolError::AuthMaterial(format!("cannot read truststore {}: {e}", path.display()))
    })?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(data.as_slice())) {
        let cert = cert.map_err(|e| {
            ProtocolError::AuthMaterial(format!("bad certificate in {}: {e}", path.display()))
        })?;
        roots.add(cert).map_err(|e| {
            ProtocolError::AuthMaterial(format!(
                "rejected certificate in {}: {e}",
                path.display()
            ))
        })?;
    }
    if roots.is_empty() {
        return Err(ProtocolError::AuthMaterial(format!(
            "no trusted certificate found in {}",
            path.display()
        )));
    }
    Ok(roots)
}
