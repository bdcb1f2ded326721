//! # jidl-ipc
//!
//! The jidl wire protocol: a length-prefixed, TLS-gated request/response
//! protocol used between a running data logger and external clients.
//!
//! Every frame on the wire is
//!
//! ```text
//! | "jidl" (4) | status code (1) | body length (2, LE) | JSON body (UTF-8) |
//! ```
//!
//! with a body of at most [`frame::MAX_SIZE`] bytes. A connection carries
//! exactly one request and one response and is then closed.
//!
//! The crate is self-contained: it knows nothing about loggers or sinks.
//! Servers plug application behavior in through the [`RequestHandler`]
//! trait; [`ProtocolClient`] is the matching one-shot client.
//!
//! TLS is mandatory and mutual: both sides authenticate with certificates
//! loaded from PEM files into explicit [`ServerTlsConfig`] /
//! [`ClientTlsConfig`] values, so two endpoints in one process can use
//! distinct key material.

pub mod client;
pub mod error;
pub mod frame;
pub mod handler;
pub mod server;
pub mod status;
pub mod tls;

pub use client::ProtocolClient;
pub use error::ProtocolError;
pub use frame::{Frame, MAGIC, MAX_SIZE};
pub use handler::{BoxFuture, HandlerError, RequestHandler};
pub use server::ProtocolServer;
pub use status::StatusCode;
pub use tls::{ClientTlsConfig, ServerTlsConfig};
