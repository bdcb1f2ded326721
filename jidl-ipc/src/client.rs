//! The jidl protocol client.
//!
//! One [`ProtocolClient::request`] call opens a TLS connection, writes a
//! single request frame, reads the single response frame and closes. The
//! client value itself is cheap and reusable for any number of sequential
//! requests.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{self, Body};
use crate::tls::ClientTlsConfig;

/// Timeout value meaning "wait forever".
pub const FOREVER: u64 = 0;

/// A one-request-per-connection client for the jidl protocol.
pub struct ProtocolClient {
    host: String,
    port: u16,
    timeout_ms: u64,
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl ProtocolClient {
    /// Creates a client for `host:port` with the given key material.
    ///
    /// `timeout_ms` bounds each request round trip in milliseconds;
    /// [`FOREVER`] (zero) disables the bound.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout_ms: u64,
        tls: ClientTlsConfig,
    ) -> ProtocolResult<Self> {
        let host = host.into();
        let server_name = ServerName::try_from(host.clone()).map_err(|e| {
            ProtocolError::AuthMaterial(format!("invalid server name {host}: {e}"))
        })?;
        Ok(Self {
            host,
            port,
            timeout_ms,
            connector: TlsConnector::from(Arc::clone(&tls.config)),
            server_name,
        })
    }

    /// The remote host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The remote port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The configured timeout in milliseconds; zero means none.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Performs one request and returns the response payload.
    ///
    /// Bad responses surface as [`ProtocolError::Status`]; an elapsed
    /// timeout as [`ProtocolError::Timeout`].
    pub async fn request(
        &self,
        method: Option<&str>,
        payload: Option<&Value>,
    ) -> ProtocolResult<Body> {
        let round_trip = self.round_trip(method, payload);
        if self.timeout_ms == FOREVER {
            round_trip.await
        } else {
            match tokio::time::timeout(
                std::time::Duration::from_millis(self.timeout_ms),
                round_trip,
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::Timeout(self.timeout_ms)),
            }
        }
    }

    async fn round_trip(
        &self,
        method: Option<&str>,
        payload: Option<&Value>,
    ) -> ProtocolResult<Body> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await?;
        let (mut reader, mut writer) = tokio::io::split(tls);

        frame::write_request(&mut writer, method, payload).await?;
        let (_, body) = frame::read_response(&mut reader).await?;
        let _ = writer.shutdown().await;
        Ok(body)
    }
}
