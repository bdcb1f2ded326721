//! Request handling for the IPC server.
//!
//! Maps the wire methods onto the live logger:
//!
//! | method | behavior |
//! |--------|----------|
//! | `values` | latest cached values for the requested variables |
//! | `start` | start logging, when remote control is enabled |
//! | `stop` | stop logging, when remote control is enabled |
//! | `trends` | reserved, answers a bare OK |
//!
//! Any failure, unknown method or unknown name becomes the same
//! `failed request handling` bad response; the peer learns nothing else.

use std::sync::Weak;

use serde_json::Value as JsonValue;

use jidl_ipc::{BoxFuture, HandlerError, RequestHandler};

use crate::logger::DataLogger;

/// The request handler bound to one logger.
pub struct LoggerRequestHandler {
    control_enabled: bool,
    logger: Weak<DataLogger>,
}

impl LoggerRequestHandler {
    /// `control_enabled` gates the `start`/`stop` methods.
    pub fn new(control_enabled: bool, logger: Weak<DataLogger>) -> LoggerRequestHandler {
        LoggerRequestHandler {
            control_enabled,
            logger,
        }
    }

    async fn values(
        &self,
        logger: &DataLogger,
        payload: &serde_json::Map<String, JsonValue>,
    ) -> Result<JsonValue, HandlerError> {
        // Payload: { "connection": ["var", ...], ... }
        // Response: { "var::connection": value, ... }
        let mut out = serde_json::Map::new();
        for (connection_name, vars) in payload {
            let connection = logger
                .connection_by_name(connection_name)
                .ok_or_else(|| HandlerError::new(format!("no such connection: {connection_name}")))?;
            let vars = vars
                .as_array()
                .ok_or_else(|| HandlerError::new(format!("{connection_name}: not a name list")))?;

            for var in vars {
                let var = var
                    .as_str()
                    .ok_or_else(|| HandlerError::new(format!("{connection_name}: not a name")))?;
                if connection.variable_type(var).await.is_none() {
                    return Err(HandlerError::new(format!(
                        "no such variable: {var}::{connection_name}"
                    )));
                }
                let value = connection
                    .variable_value(var)
                    .await
                    .map(|v| v.to_json())
                    .unwrap_or(JsonValue::Null);
                out.insert(format!("{var}::{connection_name}"), value);
            }
        }
        Ok(JsonValue::Object(out))
    }
}

impl RequestHandler for LoggerRequestHandler {
    fn handle<'a>(
        &'a self,
        method: &'a str,
        payload: &'a serde_json::Map<String, JsonValue>,
    ) -> BoxFuture<'a, Result<Option<JsonValue>, HandlerError>> {
        Box::pin(async move {
            let logger = self
                .logger
                .upgrade()
                .ok_or_else(|| HandlerError::new("the logger is gone"))?;

            match method {
                "values" => self.values(&logger, payload).await.map(Some),
                "start" => {
                    if !self.control_enabled {
                        return Err(HandlerError::new("remote control is disabled"));
                    }
                    // Starting an already running logger is a quiet no-op.
                    logger
                        .start(None)
                        .await
                        .map(|_| None)
                        .map_err(|e| HandlerError::new(e.to_string()))
                }
                "stop" => {
                    if !self.control_enabled {
                        return Err(HandlerError::new("remote control is disabled"));
                    }
                    logger.stop().await;
                    Ok(None)
                }
                "trends" => Ok(None),
                other => Err(HandlerError::new(format!("unknown method: {other}"))),
            }
        })
    }
}
