//! jidl-protocol device client.
//!
//! Lets one logger poll another over the wire protocol: each tag's
//! address is a `var::connection` qualifier on the remote logger, and one
//! `values` request per poll fetches them all. The request timeout equals
//! the connection's sample period, so a stalled remote never bleeds into
//! the next tick.

use serde_json::Value as JsonValue;

use crate::device::{BoxFuture, DeviceClient};
use crate::error::DeviceError;
use crate::value::Value;
use crate::variable::{TagAddress, TagReader, TagWriter};

/// Polls a remote jidl logger.
pub struct IpcDeviceClient {
    client: jidl_ipc::ProtocolClient,
    initialized: bool,
}

impl IpcDeviceClient {
    /// `timeout_ms` should be the sample period in milliseconds.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout_ms: u64,
        tls: jidl_ipc::ClientTlsConfig,
    ) -> Result<IpcDeviceClient, jidl_ipc::ProtocolError> {
        Ok(IpcDeviceClient {
            client: jidl_ipc::ProtocolClient::new(host, port, timeout_ms, tls)?,
            initialized: false,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.client.host(), self.client.port())
    }
}

impl DeviceClient for IpcDeviceClient {
    fn initialize(&mut self) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            self.initialized = true;
            Ok(())
        })
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            if !self.initialized {
                return Err(DeviceError::Uninitialized);
            }
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {})
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read<'a>(
        &'a mut self,
        readers: &'a mut [TagReader],
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            // Group the requested variables per remote connection:
            // { "connection": ["var", ...], ... }
            let mut request = serde_json::Map::new();
            for reader in readers.iter() {
                let (var, connection) = remote_address(reader.address(), reader.name())?;
                request
                    .entry(connection.to_string())
                    .or_insert_with(|| JsonValue::Array(Vec::new()))
                    .as_array_mut()
                    .expect("entry is always an array")
                    .push(JsonValue::String(var.to_string()));
            }

            let response = self
                .client
                .request(Some("values"), Some(&JsonValue::Object(request)))
                .await
                .map_err(|e| DeviceError::Read {
                    tag: self.endpoint(),
                    reason: e.to_string(),
                })?;

            for reader in readers.iter() {
                let (var, connection) = remote_address(reader.address(), reader.name())?;
                let key = format!("{var}::{connection}");
                let value = response
                    .get(&key)
                    .and_then(|json| Value::coerce_json(json, reader.data_type()));
                if value.is_none() {
                    tracing::warn!("ipc {}: no value for {key}", self.endpoint());
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
                tag: self.endpoint(),
                reason: "jidl protocol connections are read-only".to_string(),
            })
        })
    }
}

fn remote_address<'a>(
    address: &'a TagAddress,
    tag: &str,
) -> Result<(&'a str, &'a str), DeviceError> {
    match address {
        TagAddress::Remote { var, connection } => Ok((var, connection)),
        other => Err(DeviceError::Read {
            tag: tag.to_string(),
            reason: format!("not a remote qualifier: {}", other.label()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use serde_json::json;

    #[test]
    fn remote_addresses_are_required() {
        let reader = TagReader::new(
            "x",
            TagAddress::JsonKey("x".into()),
            DataType::Integer,
        )
        .unwrap();
        assert!(remote_address(reader.address(), reader.name()).is_err());

        let reader = TagReader::new(
            "x",
            TagAddress::Remote {
                var: "temp".into(),
                connection: "press1".into(),
            },
            DataType::Integer,
        )
        .unwrap();
        let (var, connection) = remote_address(reader.address(), reader.name()).unwrap();
        assert_eq!((var, connection), ("temp", "press1"));
    }

    #[test]
    fn request_payload_groups_vars_by_connection() {
        // Build the same grouping the read path produces.
        let readers = [
            ("a", "c1"),
            ("b", "c1"),
            ("z", "c2"),
        ];
        let mut request = serde_json::Map::new();
        for (var, connection) in readers {
            request
                .entry(connection.to_string())
                .or_insert_with(|| JsonValue::Array(Vec::new()))
                .as_array_mut()
                .unwrap()
                .push(JsonValue::String(var.to_string()));
        }
        assert_eq!(
            JsonValue::Object(request),
            json!({"c1": ["a", "b"], "c2": ["z"]})
        );
    }
}
