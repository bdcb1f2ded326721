//! Error types of the core engine.

use std::time::Duration;

/// Configuration-time failures. These abort the load; a logger is never
/// left partially configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("[{section}]: missing key: {key}")]
    MissingKey { section: String, key: String },

    #[error("[{section}]: bad value for {key}: {value}")]
    BadValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("unrecognized data type: {0}")]
    UnknownType(String),

    #[error("not a valid name: {0}")]
    BadName(String),

    #[error("not a valid qualifier: {0}")]
    BadQualifier(String),

    #[error("invalid address: {0}")]
    BadAddress(String),

    #[error("duplicate connection name: {0}")]
    DuplicateConnection(String),

    #[error("duplicate variable name: {0}")]
    DuplicateVariable(String),

    #[error("no such connection: {0}")]
    NoSuchConnection(String),

    #[error("{0} is not a valid writer source")]
    BadWriterSource(String),

    #[error("cannot write to a {0} connection")]
    NotWriteable(String),

    #[error("unsupported sink type: {0}")]
    UnsupportedSink(String),

    #[error("no device driver available for connection type: {0}")]
    NoDriver(String),

    #[error("ambiguous decryption settings")]
    AmbiguousDecryption,

    #[error("cannot decrypt credential: {0}")]
    Decrypt(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Protocol(#[from] jidl_ipc::ProtocolError),
}

/// Device-side failures. All of these are recovered locally by the
/// scheduler: the connection is marked disconnected and retried at its
/// next due tick.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("cannot connect to {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("read failed for {tag}: {reason}")]
    Read { tag: String, reason: String },

    #[error("write failed for {tag}: {reason}")]
    Write { tag: String, reason: String },

    #[error("cannot decode {tag}: {reason}")]
    Decode { tag: String, reason: String },

    #[error("device request timed out after {0:?}")]
    Timeout(Duration),

    #[error("client is not initialized")]
    Uninitialized,
}

/// Sink-side failures.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink cannot complete inserts even after retry. This is the one
    /// fatal mid-run error: it stops the logger and surfaces through the
    /// fatal handler.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// A malformed row or statement; the offending entry is dropped.
    #[error("malformed row for table {table}: {reason}")]
    BadRow { table: String, reason: String },

    /// A non-fatal backend failure (a rejected query, a failed snapshot).
    #[error("sink backend error: {0}")]
    Backend(String),
}

/// Failures of logger lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("logger is not ready: {0}")]
    NotReady(String),

    #[error("duplicate connection name: {0}")]
    DuplicateConnection(String),

    #[error("this sink does not support archiving")]
    ArchiverUnsupported,

    #[error("day of week out of range: {0}")]
    BadDayOfWeek(u8),

    #[error("archiving interval out of range: {0}")]
    BadInterval(u32),

    #[error("an IPC server is already attached")]
    IpcAlreadyAttached,

    #[error(transparent)]
    Protocol(#[from] jidl_ipc::ProtocolError),
}
