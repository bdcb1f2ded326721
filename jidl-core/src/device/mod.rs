//! Device clients.
//!
//! Every connection talks to its device through the [`DeviceClient`]
//! capability: initialize, connect, disconnect, and read or write a list
//! of tags. The scheduler never sees protocol detail.
//!
//! Two clients are complete in this crate (JSON over HTTP, jidl protocol
//! over TLS). The PLC clients implement the address validation and value
//! codec for their protocols but delegate the socket work to the
//! [`RegisterIo`] / [`TagIo`] transport traits, which concrete drivers
//! implement outside the engine.

pub mod ipc;
pub mod json_http;
pub mod modbus;
pub mod plc;

use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::DeviceError;
use crate::variable::{TagReader, TagWriter};

/// Type alias for manually boxed futures, matching the trait style used
/// across the workspace (no `async_trait`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The uniform capability a connection requires from its device client.
pub trait DeviceClient: Send {
    /// Prepares the client (driver setup, address validation). Must be
    /// called before anything else; may be retried after failure.
    fn initialize(&mut self) -> BoxFuture<'_, Result<(), DeviceError>>;

    /// Establishes the connection to the device.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), DeviceError>>;

    /// Closes the connection. Never fails; safe to call at any time.
    fn disconnect(&mut self) -> BoxFuture<'_, ()>;

    /// `true` once [`Self::initialize`] has succeeded.
    fn is_initialized(&self) -> bool;

    /// Reads every tag in `readers`, storing each value into the tag's
    /// cell. A per-tag decode failure clears that tag and continues; a
    /// connection-level failure aborts the pass with an error.
    fn read<'a>(
        &'a mut self,
        readers: &'a mut [TagReader],
    ) -> BoxFuture<'a, Result<(), DeviceError>>;

    /// Writes every tag in `writers` from its source value. Same error
    /// contract as [`Self::read`].
    fn write<'a>(
        &'a mut self,
        writers: &'a mut [TagWriter],
    ) -> BoxFuture<'a, Result<(), DeviceError>>;
}

/// A device client handle.
///
/// Connections to the same device may alias one client; the mutex then
/// serializes their polls, so one physical device is never driven by two
/// concurrent requests.
pub type SharedClient = Arc<Mutex<Box<dyn DeviceClient>>>;

/// Wraps a client into a [`SharedClient`] handle.
pub fn share(client: Box<dyn DeviceClient>) -> SharedClient {
    Arc::new(Mutex::new(client))
}
