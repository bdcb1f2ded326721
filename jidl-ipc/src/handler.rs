//! The request-handler seam between the protocol server and the
//! application behind it.

use core::future::Future;
use core::pin::Pin;

use serde_json::Value;

use crate::frame::Body;

/// Type alias for manually boxed futures, matching the trait style used
/// across the workspace (no `async_trait`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A failure while serving a request.
///
/// The server never forwards the detail to the peer; every handler error
/// becomes the same `failed request handling` bad response. The message is
/// for local diagnostics only.
#[derive(Debug)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Serves the methods exposed over the protocol.
///
/// `Ok(Some(value))` becomes a good response with payload, `Ok(None)` a
/// bare `OK`, and any `Err` the `failed request handling` bad response.
pub trait RequestHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        method: &'a str,
        payload: &'a Body,
    ) -> BoxFuture<'a, Result<Option<Value>, HandlerError>>;
}
