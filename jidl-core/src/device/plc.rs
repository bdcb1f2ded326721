//! Typed-tag PLC client (S7, OPC UA).
//!
//! These protocols validate addresses in the driver, not here; the engine
//! only forms the typed tag identifier `"<address>:<CODE>"` the driver
//! expects, with `CODE` one of `BOOL`, `BYTE`, `INT`, `WORD`, `DINT`,
//! `REAL` or `STRING(n)` (n at most 254, default 254). Reading and
//! writing go through the [`TagIo`] transport trait.

use std::time::Duration;

use crate::datatype::DataType;
use crate::device::{BoxFuture, DeviceClient};
use crate::error::{ConfigError, DeviceError};
use crate::value::Value;
use crate::variable::{TagAddress, TagReader, TagWriter};

/// Per-request deadline for PLC transactions.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest string a typed tag can declare.
const MAX_STRING_LENGTH: u16 = 254;

/// A typed tag identifier for driver-validated protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlcTag {
    id: String,
}

impl PlcTag {
    /// Builds the `"<address>:<CODE>"` identifier for a tag.
    pub fn new(address: &str, data_type: DataType) -> Result<PlcTag, ConfigError> {
        if address.is_empty() {
            return Err(ConfigError::BadAddress(address.to_string()));
        }
        let code = match data_type {
            DataType::Boolean => "BOOL".to_string(),
            DataType::Byte => "BYTE".to_string(),
            DataType::Integer => "INT".to_string(),
            DataType::Word => "WORD".to_string(),
            DataType::DoubleInteger => "DINT".to_string(),
            DataType::Real => "REAL".to_string(),
            DataType::Text(size) => {
                let size = size.unwrap_or(MAX_STRING_LENGTH);
                if size > MAX_STRING_LENGTH {
                    return Err(ConfigError::BadAddress(format!(
                        "{address}: string size {size} exceeds {MAX_STRING_LENGTH}"
                    )));
                }
                format!("STRING({size})")
            }
            // FLOAT and DOUBLE_WORD have no typed-tag encoding.
            other => {
                return Err(ConfigError::BadAddress(format!(
                    "{address}: type {} is not addressable here",
                    other.name()
                )))
            }
        };
        Ok(PlcTag {
            id: format!("{address}:{code}"),
        })
    }

    /// The full identifier handed to the driver.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Raw typed-tag transport, implemented by a concrete S7 or OPC UA driver.
pub trait TagIo: Send {
    /// Driver setup (session creation, address validation).
    fn open(&mut self) -> BoxFuture<'_, Result<(), DeviceError>>;

    fn connect(&mut self) -> BoxFuture<'_, Result<(), DeviceError>>;

    fn disconnect(&mut self) -> BoxFuture<'_, ()>;

    fn read_tag<'a>(&'a mut self, tag_id: &'a str)
        -> BoxFuture<'a, Result<Value, DeviceError>>;

    fn write_tag<'a>(
        &'a mut self,
        tag_id: &'a str,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<(), DeviceError>>;
}

/// A PLC device client over a pluggable [`TagIo`] transport.
pub struct PlcClient {
    endpoint: String,
    io: Box<dyn TagIo>,
    initialized: bool,
}

impl PlcClient {
    pub fn new(endpoint: impl Into<String>, io: Box<dyn TagIo>) -> PlcClient {
        PlcClient {
            endpoint: endpoint.into(),
            io,
            initialized: false,
        }
    }
}

impl DeviceClient for PlcClient {
    fn initialize(&mut self) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            self.io.open().await?;
            self.initialized = true;
            Ok(())
        })
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(async move {
            if !self.initialized {
                return Err(DeviceError::Uninitialized);
            }
            self.io.connect().await.map_err(|e| DeviceError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.io.disconnect().await })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read<'a>(
        &'a mut self,
        readers: &'a mut [TagReader],
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            for reader in readers.iter() {
                let tag = match reader.address() {
                    TagAddress::Plc(tag) => tag.clone(),
                    other => {
                        return Err(DeviceError::Read {
                            tag: reader.name().to_string(),
                            reason: format!("not a PLC tag: {}", other.label()),
                        })
                    }
                };
                let read = tokio::time::timeout(REQUEST_TIMEOUT, self.io.read_tag(tag.id()));
                match read.await {
                    Ok(Ok(value)) => reader.set_value(Some(value)),
                    Ok(Err(DeviceError::Decode { tag, reason })) => {
                        tracing::warn!("plc {}: {tag}: {reason}", self.endpoint);
                        reader.set_value(None);
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(DeviceError::Timeout(REQUEST_TIMEOUT)),
                }
            }
            Ok(())
        })
    }

    fn write<'a>(
        &'a mut self,
        writers: &'a mut [TagWriter],
    ) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            for writer in writers.iter() {
                let tag = match writer.address() {
                    TagAddress::Plc(tag) => tag.clone(),
                    other => {
                        return Err(DeviceError::Write {
                            tag: writer.name().to_string(),
                            reason: format!("not a PLC tag: {}", other.label()),
                        })
                    }
                };
                let value = writer.source_value();
                let write =
                    tokio::time::timeout(REQUEST_TIMEOUT, self.io.write_tag(tag.id(), &value));
                match write.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(DeviceError::Timeout(REQUEST_TIMEOUT)),
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_ids_carry_the_type_code() {
        let cases = [
            (DataType::Boolean, "DB1.DBX0.0:BOOL"),
            (DataType::Byte, "DB1.DBB1:BYTE"),
            (DataType::Integer, "DB1.DBW2:INT"),
            (DataType::Word, "DB1.DBW4:WORD"),
            (DataType::DoubleInteger, "DB1.DBD6:DINT"),
            (DataType::Real, "DB1.DBD10:REAL"),
        ];
        for (data_type, expected) in cases {
            let address = expected.split(':').next().unwrap();
            assert_eq!(PlcTag::new(address, data_type).unwrap().id(), expected);
        }
    }

    #[test]
    fn string_tags_default_to_max_length() {
        assert_eq!(
            PlcTag::new("DB1.DBB20", DataType::Text(None)).unwrap().id(),
            "DB1.DBB20:STRING(254)"
        );
        assert_eq!(
            PlcTag::new("DB1.DBB20", DataType::Text(Some(16))).unwrap().id(),
            "DB1.DBB20:STRING(16)"
        );
        assert!(PlcTag::new("DB1.DBB20", DataType::Text(Some(255))).is_err());
    }

    #[test]
    fn unsupported_types_are_rejected() {
        assert!(PlcTag::new("DB1.DBD0", DataType::Float).is_err());
        assert!(PlcTag::new("DB1.DBD0", DataType::DoubleWord).is_err());
        assert!(PlcTag::new("", DataType::Boolean).is_err());
    }
}
