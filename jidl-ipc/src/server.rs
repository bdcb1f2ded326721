//! The jidl protocol server.
//!
//! A started server owns a TLS listener task; every accepted socket is
//! handed to its own connection task, which reads exactly one request,
//! dispatches it to the [`RequestHandler`], writes one response and closes.
//!
//! Client certificates are required; sockets that fail the handshake are
//! dropped without a response. Handler failures never leak detail to the
//! peer — they all become the `failed request handling` bad response.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame;
use crate::handler::{HandlerError, RequestHandler};
use crate::status::StatusCode;
use crate::tls::ServerTlsConfig;

/// A framed TLS request/response server.
pub struct ProtocolServer {
    port: u16,
    tls: ServerTlsConfig,
    handler: Arc<dyn RequestHandler>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    inner: tokio::sync::Mutex<Option<Listening>>,
}

struct Listening {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProtocolServer {
    /// Creates a stopped server. Port `0` binds an ephemeral port; the
    /// actual address is available from [`Self::local_addr`] after start.
    pub fn new(port: u16, tls: ServerTlsConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            port,
            tls,
            handler,
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// Binds the listener and spawns the accept loop. Quietly does nothing
    /// when the server is already started.
    pub async fn start(&self) -> ProtocolResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let bound = listener.local_addr()?;
        let acceptor = TlsAcceptor::from(self.tls.config.clone());
        let handler = self.handler.clone();
        let (shutdown, mut rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let acceptor = acceptor.clone();
                            let handler = handler.clone();
                            tokio::spawn(serve_connection(acceptor, stream, peer, handler));
                        }
                        Err(e) => {
                            tracing::warn!("ipc server: accept failed: {e}");
                        }
                    }
                }
            }
        });

        *self.local_addr.lock().unwrap() = Some(bound);
        *inner = Some(Listening { shutdown, task });
        self.started.store(true, Ordering::SeqCst);
        tracing::info!("ipc server listening on {bound}");
        Ok(())
    }

    /// Closes the listener. In-flight connection tasks run to completion.
    /// Quietly does nothing when the server is already stopped.
    pub async fn stop(&self) {
        let listening = self.inner.lock().await.take();
        if let Some(listening) = listening {
            let _ = listening.shutdown.send(true);
            let _ = listening.task.await;
            self.started.store(false, Ordering::SeqCst);
            *self.local_addr.lock().unwrap() = None;
            tracing::info!("ipc server stopped");
        }
    }

    /// `true` while the server is started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("ipc server: TLS handshake with {peer} failed: {e}");
            return;
        }
    };
    let (mut reader, mut writer) = tokio::io::split(tls_stream);

    let outcome = match frame::read_request(&mut reader).await {
        Ok((method, payload)) => {
            let result = match method.as_deref() {
                Some(method) => handler.handle(method, &payload).await,
                None => Err(HandlerError::new("request without method")),
            };
            match result {
                Ok(payload) => frame::write_payload_response(&mut writer, payload).await,
                Err(e) => {
                    tracing::debug!("ipc server: request from {peer} failed: {e}");
                    frame::write_status_response(&mut writer, StatusCode::FailedRequestHandling)
                        .await
                }
            }
        }
        // Malformed requests get the matching bad response before close.
        Err(ProtocolError::Status(code)) => {
            tracing::debug!(
                "ipc server: malformed request from {peer}: {}",
                code.text_message()
            );
            frame::write_status_response(&mut writer, code).await
        }
        Err(e) => {
            tracing::debug!("ipc server: failed reading request from {peer}: {e}");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        tracing::debug!("ipc server: failed answering {peer}: {e}");
    }
    let _ = writer.shutdown().await;
}
