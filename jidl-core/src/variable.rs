//! Tag readers and writers.
//!
//! A tag binds a name and a [`DataType`] to a protocol-specific address.
//! Readers hold the latest sampled value in a shared cell; writers are
//! bound to the cell of a source reader and push its current value to the
//! device. Sharing the cell is what lets a writer on one connection follow
//! a reader on another without the two ever locking each other's state.

use std::sync::{Arc, Mutex};

use crate::datatype::DataType;
use crate::device::modbus::ModbusAddress;
use crate::device::plc::PlcTag;
use crate::error::ConfigError;
use crate::qualifier::validate_name;
use crate::value::Value;

/// Shared storage for a tag's latest value. `None` until the first
/// successful read.
pub type ValueCell = Arc<Mutex<Option<Value>>>;

/// A validated, protocol-specific tag address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAddress {
    /// Modbus register or coil address.
    Modbus(ModbusAddress),
    /// Typed tag identifier for S7 / OPC UA style clients.
    Plc(PlcTag),
    /// Key into a JSON document fetched over HTTP.
    JsonKey(String),
    /// `var::connection` qualifier on a remote jidl logger.
    Remote { var: String, connection: String },
}

impl TagAddress {
    /// A short display form for diagnostics.
    pub fn label(&self) -> String {
        match self {
            TagAddress::Modbus(address) => address.to_string(),
            TagAddress::Plc(tag) => tag.id().to_string(),
            TagAddress::JsonKey(key) => key.clone(),
            TagAddress::Remote { var, connection } => format!("{var}::{connection}"),
        }
    }
}

/// A readable tag.
#[derive(Debug, Clone)]
pub struct TagReader {
    name: String,
    data_type: DataType,
    address: TagAddress,
    cell: ValueCell,
}

impl TagReader {
    pub fn new(
        name: &str,
        address: TagAddress,
        data_type: DataType,
    ) -> Result<TagReader, ConfigError> {
        Ok(TagReader {
            name: validate_name(name)?.to_string(),
            data_type,
            address,
            cell: Arc::new(Mutex::new(None)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn address(&self) -> &TagAddress {
        &self.address
    }

    /// The shared cell, for binding writers to this reader.
    pub fn cell(&self) -> ValueCell {
        Arc::clone(&self.cell)
    }

    /// Stores a freshly read value, or clears it on a per-tag failure.
    pub fn set_value(&self, value: Option<Value>) {
        *self.cell.lock().unwrap() = value;
    }

    /// The latest value, if any read succeeded yet.
    pub fn value(&self) -> Option<Value> {
        self.cell.lock().unwrap().clone()
    }

    /// The latest value rendered as text, for row building.
    pub fn text(&self) -> Option<String> {
        self.value().map(|v| v.as_text())
    }
}

/// A writeable tag, bound to the value cell of a source reader.
#[derive(Debug, Clone)]
pub struct TagWriter {
    name: String,
    data_type: DataType,
    address: TagAddress,
    source: ValueCell,
}

impl TagWriter {
    pub fn new(
        name: &str,
        address: TagAddress,
        source: ValueCell,
        data_type: DataType,
    ) -> Result<TagWriter, ConfigError> {
        Ok(TagWriter {
            name: validate_name(name)?.to_string(),
            data_type,
            address,
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn address(&self) -> &TagAddress {
        &self.address
    }

    /// The value to write: the source reader's latest, or the type's zero
    /// value while the source has not been read yet.
    pub fn source_value(&self) -> Value {
        self.source
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Value::zero(self.data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_value_starts_absent() {
        let reader =
            TagReader::new("t1", TagAddress::JsonKey("t1".into()), DataType::Integer).unwrap();
        assert_eq!(reader.value(), None);
        reader.set_value(Some(Value::Int(7)));
        assert_eq!(reader.value(), Some(Value::Int(7)));
        assert_eq!(reader.text().as_deref(), Some("7"));
    }

    #[test]
    fn writer_follows_its_source_cell() {
        let reader =
            TagReader::new("src", TagAddress::JsonKey("src".into()), DataType::Real).unwrap();
        let writer = TagWriter::new(
            "dst",
            TagAddress::JsonKey("dst".into()),
            reader.cell(),
            reader.data_type(),
        )
        .unwrap();

        // Zero-valued before the first read of the source.
        assert_eq!(writer.source_value(), Value::Float(0.0));
        reader.set_value(Some(Value::Float(1.5)));
        assert_eq!(writer.source_value(), Value::Float(1.5));
    }

    #[test]
    fn names_are_validated() {
        assert!(TagReader::new("bad name", TagAddress::JsonKey("k".into()), DataType::Byte)
            .is_err());
    }
}
