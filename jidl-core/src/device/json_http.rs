//! JSON-over-HTTP device client.
//!
//! The device is a plain HTTP endpoint returning one JSON object; each
//! tag's address is a key into that object and its value is coerced to
//! the tag's declared type. One document is fetched per poll, so all tags
//! of a connection observe the same snapshot.

use std::time::Duration;

use crate::device::{BoxFuture, DeviceClient};
use crate::error::DeviceError;
use crate::value::Value;
use crate::variable::{TagAddress, TagReader, TagWriter};

/// Request deadline for one document fetch.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Polls a JSON document over HTTP.
pub struct JsonHttpClient {
    url: String,
    client: Option<reqwest::Client>,
}

impl JsonHttpClient {
    pub fn new(url: impl Into<String>) -> JsonHttpClient {
        JsonHttpClient {
            url: url.into(),
            client: None,
        }
    }

    async fn fetch(&self) -> Result<serde_json::Value, DeviceError> {
        let client = self.client.as_ref().ok_or(DeviceError::Uninitialized)?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DeviceError::Unreachable {
                endpoint: self.url.clone(),
                reason: e.to_string(),
            })?;
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| DeviceError::Read {
                tag: self.url.clone(),
                reason: format!("not a JSON document: {e}"),
            })
    }
}

impl DeviceClient for JsonHttpClient {
    fn initialize(&mut self) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            // Building the client validates the URL early.
            reqwest::Url::parse(&self.url).map_err(|e| DeviceError::Unreachable {
                endpoint: self.url.clone(),
                reason: format!("malformed URL: {e}"),
            })?;
            let client = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| DeviceError::Unreachable {
                    endpoint: self.url.clone(),
                    reason: e.to_string(),
                })?;
            self.client = Some(client);
            Ok(())
        })
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), DeviceError>> {
        // HTTP is connectionless; probe the TCP endpoint once so an
        // unreachable server is caught here and not mid-poll. The probe
        // does not consume a document.
        Box::pin(async move {
            if self.client.is_none() {
                return Err(DeviceError::Uninitialized);
            }
            let url = reqwest::Url::parse(&self.url).map_err(|e| DeviceError::Unreachable {
                endpoint: self.url.clone(),
                reason: format!("malformed URL: {e}"),
            })?;
            let host = url.host_str().ok_or_else(|| DeviceError::Unreachable {
                endpoint: self.url.clone(),
                reason: "URL has no host".to_string(),
            })?;
            let port = url.port_or_known_default().unwrap_or(80);

            let probe = tokio::net::TcpStream::connect((host, port));
            match tokio::time::timeout(REQUEST_TIMEOUT, probe).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(DeviceError::Unreachable {
                    endpoint: self.url.clone(),
                    reason: e.to_string(),
                }),
                Err(_) => Err(DeviceError::Timeout(REQUEST_TIMEOUT)),
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {})
    }

    fn is_initialized(&self) -> bool {
        self.client.is_some()
    }

    fn read<'a>(
        &'a mut self,
        readers: &'a mut [TagReader],
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            let document = self.fetch().await?;
            for reader in readers.iter() {
                let key = match reader.address() {
                    TagAddress::JsonKey(key) => key,
                    other => {
                        return Err(DeviceError::Read {
                            tag: reader.name().to_string(),
                            reason: format!("not a JSON key: {}", other.label()),
                        })
                    }
                };
                let value = document
                    .get(key)
                    .and_then(|json| Value::coerce_json(json, reader.data_type()));
                if value.is_none() {
                    tracing::warn!(
                        "json {}: no {} value under key {key}",
                        self.url,
                        reader.data_type().name()
                    );
                }
                reader.set_value(value);
            }
            Ok(())
        })
    }

    fn write<'a>(
        &'a mut self,
        _writers: &'a mut [TagWriter],
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            Err(DeviceError::Write {
                tag: self.url.clone(),
                reason: "JSON connections are read-only".to_string(),
            })
        })
    }
}
