//! Connections to field devices.
//!
//! A connection binds a named device to a sample period, an ordered
//! reader list and (for writeable kinds) an ordered writer list. The
//! device itself sits behind a [`SharedClient`]; two shareable
//! connections to the same device address alias one client, and the
//! client mutex keeps their polls from overlapping.
//!
//! Mutable state (link status, last-read timestamp, tag lists) lives in
//! one async mutex per connection, so the scheduler's read task and the
//! IPC `values` handler never race.

use chrono::{DateTime, Local};
use tokio::sync::Mutex;

use crate::datatype::DataType;
use crate::device::SharedClient;
use crate::error::{ConfigError, DeviceError};
use crate::sink::Row;
use crate::timefmt;
use crate::value::Value;
use crate::variable::{TagReader, TagWriter, ValueCell};

/// The connection variants the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    ModbusTcp,
    S7,
    OpcUa,
    Json,
    Jidl,
}

impl ConnectionKind {
    /// The `type` label used in configuration and parameter views.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionKind::ModbusTcp => "modbus-tcp",
            ConnectionKind::S7 => "s7",
            ConnectionKind::OpcUa => "opcua",
            ConnectionKind::Json => "json",
            ConnectionKind::Jidl => "jidl",
        }
    }

    /// Whether connections of this kind accept tag writers.
    pub fn is_writeable(self) -> bool {
        matches!(
            self,
            ConnectionKind::ModbusTcp | ConnectionKind::S7 | ConnectionKind::OpcUa
        )
    }

    /// Whether connections of this kind may alias another connection's
    /// client when both point at the same device address.
    pub fn is_shareable(self) -> bool {
        matches!(self, ConnectionKind::ModbusTcp | ConnectionKind::S7)
    }
}

/// Link status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
}

struct TagState {
    status: LinkStatus,
    last_read: Option<DateTime<Local>>,
    readers: Vec<TagReader>,
    writers: Vec<TagWriter>,
}

/// A stateful binding to one field device.
pub struct Connection {
    name: String,
    kind: ConnectionKind,
    address: String,
    sample_ticks: u32,
    view_extra: Vec<(String, String)>,
    client: SharedClient,
    state: Mutex<TagState>,
}

impl Connection {
    /// Creates a connection with empty tag lists.
    ///
    /// `view_extra` carries the kind-specific parameter view entries
    /// (ip address, port, url, ...) appended to the common ones.
    pub fn new(
        name: &str,
        kind: ConnectionKind,
        address: impl Into<String>,
        sample_ticks: u32,
        view_extra: Vec<(String, String)>,
        client: SharedClient,
    ) -> Result<Connection, ConfigError> {
        Ok(Connection {
            name: crate::qualifier::validate_name(name)?.to_string(),
            kind,
            address: address.into(),
            sample_ticks,
            view_extra,
            client,
            state: Mutex::new(TagState {
                status: LinkStatus::Disconnected,
                last_read: None,
                readers: Vec::new(),
                writers: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sample period in ticks (deciseconds).
    pub fn sample_ticks(&self) -> u32 {
        self.sample_ticks
    }

    /// Whether this connection's read (and write) is due at `counter`.
    pub fn is_due(&self, counter: u64) -> bool {
        counter % self.sample_ticks as u64 == 0
    }

    /// The client handle, for aliasing into another shareable connection.
    pub fn client(&self) -> SharedClient {
        self.client.clone()
    }

    /// The ordered parameter view: common entries first, then the
    /// kind-specific ones.
    pub fn view(&self) -> Vec<(String, String)> {
        let mut view = vec![
            ("name".to_string(), self.name.clone()),
            ("sample time".to_string(), self.sample_ticks.to_string()),
            ("type".to_string(), self.kind.label().to_string()),
        ];
        view.extend(self.view_extra.iter().cloned());
        view
    }

    // ------------------------------------------------------------------
    // Configuration-time tag registration (before the connection is
    // shared with the scheduler).
    // ------------------------------------------------------------------

    /// Appends a reader; names must be unique within the connection.
    /// Returns the reader's value cell for binding writers to it.
    pub fn add_reader(&mut self, reader: TagReader) -> Result<ValueCell, ConfigError> {
        let state = self.state.get_mut();
        if state.readers.iter().any(|r| r.name() == reader.name()) {
            return Err(ConfigError::DuplicateVariable(reader.name().to_string()));
        }
        let cell = reader.cell();
        state.readers.push(reader);
        Ok(cell)
    }

    /// Appends a writer; only writeable kinds accept one.
    pub fn add_writer(&mut self, writer: TagWriter) -> Result<(), ConfigError> {
        if !self.kind.is_writeable() {
            return Err(ConfigError::NotWriteable(self.kind.label().to_string()));
        }
        let state = self.state.get_mut();
        if state.writers.iter().any(|w| w.name() == writer.name()) {
            return Err(ConfigError::DuplicateVariable(writer.name().to_string()));
        }
        state.writers.push(writer);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runtime operations
    // ------------------------------------------------------------------

    pub async fn status(&self) -> LinkStatus {
        self.state.lock().await.status
    }

    pub async fn is_initialized(&self) -> bool {
        self.client.lock().await.is_initialized()
    }

    pub async fn initialize(&self) -> Result<(), DeviceError> {
        self.client.lock().await.initialize().await
    }

    pub async fn connect(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        match self.client.lock().await.connect().await {
            Ok(()) => {
                state.status = LinkStatus::Connected;
                Ok(())
            }
            Err(e) => {
                state.status = LinkStatus::Disconnected;
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        self.client.lock().await.disconnect().await;
        state.status = LinkStatus::Disconnected;
    }

    /// Polls every reader once. The last-read timestamp is taken at the
    /// start of the poll, so the logged time is the request time, not the
    /// completion time.
    pub async fn read(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        state.last_read = Some(Local::now());
        let mut client = self.client.lock().await;
        client.read(&mut state.readers).await
    }

    /// Pushes every writer's source value once.
    pub async fn write(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        let mut client = self.client.lock().await;
        client.write(&mut state.writers).await
    }

    pub async fn has_readers(&self) -> bool {
        !self.state.lock().await.readers.is_empty()
    }

    pub async fn has_writers(&self) -> bool {
        !self.state.lock().await.writers.is_empty()
    }

    pub async fn timestamp(&self) -> Option<DateTime<Local>> {
        self.state.lock().await.last_read
    }

    /// The current sample as a row: the timestamp column first, then one
    /// column per reader that holds a value. Tags without a value are
    /// omitted so their column defaults to NULL. `None` before the first
    /// read.
    pub async fn sample(&self) -> Option<Row> {
        let state = self.state.lock().await;
        let timestamp = state.last_read?;
        let mut row = Row::new();
        row.insert(
            crate::sink::TIMESTAMP_COLUMN,
            Value::Text(timefmt::format_timestamp(timestamp)),
        );
        for reader in &state.readers {
            if let Some(value) = reader.value() {
                row.insert(reader.name(), value);
            }
        }
        Some(row)
    }

    /// The latest value of the named reader.
    pub async fn variable_value(&self, name: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .readers
            .iter()
            .find(|r| r.name() == name)
            .and_then(|r| r.value())
    }

    /// The declared type of the named reader.
    pub async fn variable_type(&self, name: &str) -> Option<DataType> {
        let state = self.state.lock().await;
        state
            .readers
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.data_type())
    }

    /// Reader names in declaration order; these are the sink columns
    /// after the timestamp.
    pub async fn reader_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.readers.iter().map(|r| r.name().to_string()).collect()
    }

    /// Reader names and types, for table provisioning.
    pub async fn reader_columns(&self) -> Vec<(String, DataType)> {
        let state = self.state.lock().await;
        state
            .readers
            .iter()
            .map(|r| (r.name().to_string(), r.data_type()))
            .collect()
    }
}
