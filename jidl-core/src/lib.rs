//! # jidl-core
//!
//! The core of the jidl industrial data logger.
//!
//! A [`DataLogger`] drives a set of [`Connection`]s on a decisecond tick:
//! every connection is polled at its configured period, each sample row is
//! appended to the connection's table in the configured [`Sink`], and an
//! optional [`Archiver`] rotates old data on a calendar schedule. A
//! [`LoggerRequestHandler`] exposes the live logger over the jidl wire
//! protocol (`jidl-ipc`).
//!
//! Field devices are reached through the [`DeviceClient`] capability;
//! JSON-over-HTTP and jidl-protocol clients ship in this crate, while
//! PLC-level drivers (Modbus TCP, S7, OPC UA) plug in behind the
//! [`device::RegisterIo`] and [`device::TagIo`] transport traits — the
//! protocol-specific address validation and value decoding live here, the
//! socket plumbing does not.

pub mod app;
pub mod archiver;
pub mod config;
pub mod connection;
pub mod datatype;
pub mod device;
pub mod error;
pub mod handler;
pub mod logger;
pub mod qualifier;
pub mod sink;
pub mod timefmt;
pub mod value;
pub mod variable;

pub use app::{App, AppOptions};
pub use archiver::{Archiver, ArchiverSchedule};
pub use connection::{Connection, ConnectionKind, LinkStatus};
pub use datatype::DataType;
pub use device::{BoxFuture, DeviceClient, SharedClient};
pub use error::{ConfigError, DeviceError, LoggerError, SinkError};
pub use handler::LoggerRequestHandler;
pub use logger::{DataLogger, FatalHandler};
pub use qualifier::Qualifier;
pub use sink::{Row, Sink, TableSpec};
pub use value::Value;
