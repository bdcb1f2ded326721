//! Modbus TCP client: address validation and register codec.
//!
//! Addresses use the conventional numeric form: the first digit selects
//! the register file (`0`/`1` are bit files, `3`/`4` are 16-bit register
//! files), the remaining digits the 1-based offset inside it. The tag's
//! [`DataType`] fixes how many registers or coils it spans:
//!
//! | type | space | span |
//! |------|-------|------|
//! | `BOOLEAN` | bit | 1 coil |
//! | `INTEGER`, `WORD`, `FLOAT` | register | 1 |
//! | `DOUBLE_INTEGER`, `DOUBLE_WORD`, `REAL` | register | 2 |
//! | `TEXT` | register | declared size, default 127 |
//!
//! Multi-register values assemble low word first; the connection's
//! `reversed` flag switches to high word first. The raw socket work lives
//! behind [`RegisterIo`], implemented by a concrete driver.

use std::time::Duration;

use crate::datatype::DataType;
use crate::device::{BoxFuture, DeviceClient};
use crate::error::{ConfigError, DeviceError};
use crate::value::Value;
use crate::variable::{TagAddress, TagReader, TagWriter};

/// Per-request deadline for Modbus transactions.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default register span of an unsized `TEXT` tag.
const DEFAULT_TEXT_REGISTERS: u16 = 127;

/// The four Modbus address spaces, selected by the leading address digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusFile {
    /// `0xxxx` — read/write bits.
    Coils,
    /// `1xxxx` — read-only bits.
    DiscreteInputs,
    /// `3xxxx` — read-only registers.
    InputRegisters,
    /// `4xxxx` — read/write registers.
    HoldingRegisters,
}

impl ModbusFile {
    /// `true` for the single-bit address spaces.
    pub fn is_bit(self) -> bool {
        matches!(self, ModbusFile::Coils | ModbusFile::DiscreteInputs)
    }
}

/// A validated Modbus tag address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusAddress {
    raw: String,
    file: ModbusFile,
    offset: u32,
    /// Registers (or coils) this tag spans.
    length: u16,
    reversed: bool,
}

impl ModbusAddress {
    /// Validates `address` against the tag type and builds the address.
    ///
    /// `reversed` only affects multi-register tags; it is recorded but
    /// ignored for single-register and text tags.
    pub fn parse(
        address: &str,
        data_type: DataType,
        reversed: bool,
    ) -> Result<ModbusAddress, ConfigError> {
        let bad = || ConfigError::BadAddress(address.to_string());

        let mut chars = address.chars();
        let file = match chars.next() {
            Some('0') => ModbusFile::Coils,
            Some('1') => ModbusFile::DiscreteInputs,
            Some('3') => ModbusFile::InputRegisters,
            Some('4') => ModbusFile::HoldingRegisters,
            _ => return Err(bad()),
        };
        let rest = chars.as_str();
        if rest.is_empty() {
            return Err(bad());
        }
        let offset: u32 = rest.parse().map_err(|_| bad())?;

        let length = match data_type {
            DataType::Boolean => {
                if !file.is_bit() {
                    return Err(bad());
                }
                1
            }
            DataType::Integer | DataType::Word | DataType::Float => {
                if file.is_bit() {
                    return Err(bad());
                }
                1
            }
            DataType::DoubleInteger | DataType::DoubleWord | DataType::Real => {
                if file.is_bit() {
                    return Err(bad());
                }
                2
            }
            DataType::Text(size) => {
                if file.is_bit() {
                    return Err(bad());
                }
                size.unwrap_or(DEFAULT_TEXT_REGISTERS)
            }
            // Modbus has no byte-granular object.
            DataType::Byte => return Err(bad()),
        };

        Ok(ModbusAddress {
            raw: address.to_string(),
            file,
            offset,
            length,
            reversed: reversed && length == 2,
        })
    }

    pub fn file(&self) -> ModbusFile {
        self.file
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }
}

impl core::fmt::Display for ModbusAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Raw register/coil transport, implemented by a concrete Modbus driver.
pub trait RegisterIo: Send {
    /// Driver setup (socket creation, address validation).
    fn open(&mut self) -> BoxFuture<'_, Result<(), DeviceError>>;

    fn connect(&mut self) -> BoxFuture<'_, Result<(), DeviceError>>;

    fn disconnect(&mut self) -> BoxFuture<'_, ()>;

    fn read_bits(
        &mut self,
        file: ModbusFile,
        offset: u32,
        count: u16,
    ) -> BoxFuture<'_, Result<Vec<bool>, DeviceError>>;

    fn read_registers(
        &mut self,
        file: ModbusFile,
        offset: u32,
        count: u16,
    ) -> BoxFuture<'_, Result<Vec<u16>, DeviceError>>;

    fn write_bits(
        &mut self,
        file: ModbusFile,
        offset: u32,
        bits: Vec<bool>,
    ) -> BoxFuture<'_, Result<(), DeviceError>>;

    fn write_registers(
        &mut self,
        file: ModbusFile,
        offset: u32,
        words: Vec<u16>,
    ) -> BoxFuture<'_, Result<(), DeviceError>>;
}

/// Decodes raw registers into a typed value.
pub fn decode_registers(
    words: &[u16],
    data_type: DataType,
    reversed: bool,
) -> Result<Value, String> {
    match data_type {
        DataType::Integer => one_word(words).map(|w| Value::Int(w as i16 as i64)),
        DataType::Word => one_word(words).map(|w| Value::Int(w as i64)),
        DataType::Float => one_word(words).map(|w| Value::Float(w as f64)),
        DataType::DoubleInteger => combine(words, reversed).map(|d| Value::Int(d as i32 as i64)),
        DataType::DoubleWord => combine(words, reversed).map(|d| Value::Int(d as i64)),
        DataType::Real => combine(words, reversed).map(|d| Value::Float(f32::from_bits(d) as f64)),
        DataType::Text(_) => {
            let text: String = words
                .iter()
                .take_while(|w| **w != 0)
                .map(|w| char::from_u32(*w as u32).unwrap_or('\u{FFFD}'))
                .collect();
            Ok(Value::Text(text))
        }
        DataType::Boolean | DataType::Byte => {
            Err(format!("{} is not a register type", data_type.name()))
        }
    }
}

/// Encodes a typed value into raw registers of the given span.
pub fn encode_registers(
    value: &Value,
    data_type: DataType,
    reversed: bool,
    length: u16,
) -> Result<Vec<u16>, String> {
    match data_type {
        DataType::Integer | DataType::Word => match value {
            Value::Int(i) => Ok(vec![*i as u16]),
            other => Err(format!("cannot encode {other} as {}", data_type.name())),
        },
        DataType::Float => match value {
            Value::Float(f) => Ok(vec![*f as u16]),
            other => Err(format!("cannot encode {other} as FLOAT")),
        },
        DataType::DoubleInteger | DataType::DoubleWord => match value {
            Value::Int(i) => Ok(split(*i as u32, reversed)),
            other => Err(format!("cannot encode {other} as {}", data_type.name())),
        },
        DataType::Real => match value {
            Value::Float(f) => Ok(split((*f as f32).to_bits(), reversed)),
            other => Err(format!("cannot encode {other} as REAL")),
        },
        DataType::Text(_) => match value {
            Value::Text(s) => {
                let mut words: Vec<u16> =
                    s.chars().take(length as usize).map(|c| c as u16).collect();
                words.resize(length as usize, 0);
                Ok(words)
            }
            other => Err(format!("cannot encode {other} as TEXT")),
        },
        DataType::Boolean | DataType::Byte => {
            Err(format!("{} is not a register type", data_type.name()))
        }
    }
}

fn one_word(words: &[u16]) -> Result<u16, String> {
    words.first().copied().ok_or_else(|| "empty response".to_string())
}

/// Assembles two registers into a doubleword. Default order is low word
/// first; `reversed` puts the high word first.
fn combine(words: &[u16], reversed: bool) -> Result<u32, String> {
    match words {
        [w0, w1] => {
            if reversed {
                Ok(((*w0 as u32) << 16) | *w1 as u32)
            } else {
                Ok(((*w1 as u32) << 16) | *w0 as u32)
            }
        }
        _ => Err(format!("expected 2 registers, got {}", words.len())),
    }
}

fn split(value: u32, reversed: bool) -> Vec<u16> {
    let high = (value >> 16) as u16;
    let low = (value & 0xFFFF) as u16;
    if reversed {
        vec![high, low]
    } else {
        vec![low, high]
    }
}

/// A Modbus TCP device client over a pluggable [`RegisterIo`] transport.
pub struct ModbusClient {
    endpoint: String,
    io: Box<dyn RegisterIo>,
    initialized: bool,
}

impl ModbusClient {
    /// `endpoint` is only used in error messages; the transport already
    /// knows where it points.
    pub fn new(endpoint: impl Into<String>, io: Box<dyn RegisterIo>) -> ModbusClient {
        ModbusClient {
            endpoint: endpoint.into(),
            io,
            initialized: false,
        }
    }

    async fn read_one(&mut self, reader: &TagReader) -> Result<(), DeviceError> {
        let address = match reader.address() {
            TagAddress::Modbus(address) => address.clone(),
            other => {
                return Err(DeviceError::Read {
                    tag: reader.name().to_string(),
                    reason: format!("not a Modbus address: {}", other.label()),
                })
            }
        };

        if address.file.is_bit() {
            let bits = with_deadline(
                self.io
                    .read_bits(address.file, address.offset, address.length),
            )
            .await?;
            match bits.first() {
                Some(bit) => reader.set_value(Some(Value::Bool(*bit))),
                None => reader.set_value(None),
            }
        } else {
            let words = with_deadline(self.io.read_registers(
                address.file,
                address.offset,
                address.length,
            ))
            .await?;
            match decode_registers(&words, reader.data_type(), address.reversed) {
                Ok(value) => reader.set_value(Some(value)),
                Err(reason) => {
                    // Decode trouble is a per-tag problem: the row keeps
                    // going with this column NULL.
                    tracing::warn!("modbus {}: {}: {reason}", self.endpoint, reader.name());
                    reader.set_value(None);
                }
            }
        }
        Ok(())
    }

    async fn write_one(&mut self, writer: &TagWriter) -> Result<(), DeviceError> {
        let address = match writer.address() {
            TagAddress::Modbus(address) => address.clone(),
            other => {
                return Err(DeviceError::Write {
                    tag: writer.name().to_string(),
                    reason: format!("not a Modbus address: {}", other.label()),
                })
            }
        };
        let value = writer.source_value();

        if address.file.is_bit() {
            let bit = matches!(value, Value::Bool(true));
            with_deadline(self.io.write_bits(address.file, address.offset, vec![bit])).await?;
        } else {
            match encode_registers(&value, writer.data_type(), address.reversed, address.length) {
                Ok(words) => {
                    with_deadline(self.io.write_registers(address.file, address.offset, words))
                        .await?;
                }
                Err(reason) => {
                    tracing::warn!("modbus {}: {}: {reason}", self.endpoint, writer.name());
                }
            }
        }
        Ok(())
    }
}

async fn with_deadline<T>(
    fut: BoxFuture<'_, Result<T, DeviceError>>,
) -> Result<T, DeviceError> {
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeviceError::Timeout(REQUEST_TIMEOUT)),
    }
}

impl DeviceClient for ModbusClient {
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
                self.read_one(reader).await?;
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
                self.write_one(writer).await?;
            }
            Ok(())
        })
    }
}
