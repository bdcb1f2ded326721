//! The data logger: tick scheduler and per-connection pipeline.
//!
//! One logical counter advances in deciseconds. The tick step is chosen
//! once at start: 1 ds (100 ms ticks) when any connection samples faster
//! than a second, 10 ds (1 s ticks) otherwise. On every tick the
//! scheduler fans one read task out per due connection, waits for all of
//! them on a completion barrier, then fires the writer tasks detached so
//! they never gate the next tick. Ticks are dispatched from a single
//! task, so two ticks can never overlap their dispatch.
//!
//! Failure policy: device trouble quarantines only the failing
//! connection (disconnect, log, retry at its next due tick); only
//! [`SinkError::Unavailable`] is fatal — it stops the run and surfaces
//! through the optional fatal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::archiver::{Archiver, ArchiverSchedule};
use crate::connection::{Connection, LinkStatus};
use crate::error::{LoggerError, SinkError};
use crate::sink::{Sink, TableSpec};

/// Called once when a fatal sink failure stops the run.
pub type FatalHandler = Arc<dyn Fn(&SinkError) + Send + Sync>;

/// Grace period for in-flight tasks when stopping.
const STOP_GRACE: Duration = Duration::from_secs(3);

struct Scheduler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The logging engine: a connection list, a sink, and the scheduler that
/// ties them together. At most one scheduler task and one IPC server are
/// active per logger.
pub struct DataLogger {
    name: String,
    sink: Arc<dyn Sink>,
    connections: Vec<Arc<Connection>>,
    running: Arc<AtomicBool>,
    // Back-reference handed to the IPC request handler; set by `shared`.
    self_ref: Weak<DataLogger>,
    scheduler: tokio::sync::Mutex<Option<Scheduler>>,
    archiver: tokio::sync::Mutex<Option<Archiver>>,
    ipc: tokio::sync::Mutex<Option<Arc<jidl_ipc::ProtocolServer>>>,
}

impl DataLogger {
    pub fn new(name: impl Into<String>, sink: Arc<dyn Sink>) -> DataLogger {
        DataLogger {
            name: name.into(),
            sink,
            connections: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            self_ref: Weak::new(),
            scheduler: tokio::sync::Mutex::new(None),
            archiver: tokio::sync::Mutex::new(None),
            ipc: tokio::sync::Mutex::new(None),
        }
    }

    /// Finalizes the logger behind a shared handle. Required before
    /// [`Self::add_ipc_server`]: the request handler holds a weak
    /// back-reference that only a handle created here can supply.
    pub fn shared(mut self) -> Arc<DataLogger> {
        Arc::new_cyclic(|weak| {
            self.self_ref = weak.clone();
            self
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone()
    }

    /// Registers a connection; names are unique per logger.
    pub fn add_connection(&mut self, connection: Arc<Connection>) -> Result<(), LoggerError> {
        if self
            .connections
            .iter()
            .any(|c| c.name() == connection.name())
        {
            return Err(LoggerError::DuplicateConnection(
                connection.name().to_string(),
            ));
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn connections(&self) -> &[Arc<Connection>] {
        &self.connections
    }

    pub fn connection_by_name(&self, name: &str) -> Option<&Arc<Connection>> {
        self.connections.iter().find(|c| c.name() == name)
    }

    /// Provisions the sink tables for the registered connections and
    /// refreshes the sink's header cache.
    pub async fn ensure_tables(&self) -> Result<(), SinkError> {
        let mut specs = Vec::with_capacity(self.connections.len());
        for connection in &self.connections {
            specs.push(TableSpec {
                name: connection.name().to_string(),
                columns: connection.reader_columns().await,
            });
        }
        self.sink.ensure_tables(&specs).await
    }

    /// `true` while the ticker is armed.
    pub fn status(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the scheduler. A second call while running is a no-op.
    pub async fn start(&self, fatal: Option<FatalHandler>) -> Result<(), LoggerError> {
        let mut slot = self.scheduler.lock().await;
        if let Some(scheduler) = slot.as_ref() {
            if !scheduler.task.is_finished() {
                return Ok(());
            }
        }
        *slot = None;

        let _ = self
            .sink
            .log(&format!("{}: start logging", self.name), false)
            .await;

        let mut any_uninitialized = false;
        for connection in &self.connections {
            if !connection.is_initialized().await {
                any_uninitialized = true;
                let _ = self
                    .sink
                    .log(&format!("{} failed initialization", connection.name()), false)
                    .await;
            }
        }
        if let Err(e) = self.sink.open().await {
            if any_uninitialized {
                return Err(LoggerError::NotReady(e.to_string()));
            }
        }

        // Tick step, fixed for the whole run: deciseconds when any
        // connection samples below one second.
        let step: u64 = if self.connections.iter().any(|c| c.sample_ticks() < 10) {
            1
        } else {
            10
        };

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run_scheduler(
            self.connections.clone(),
            self.sink.clone(),
            fatal,
            step,
            self.running.clone(),
            shutdown.clone(),
            rx,
        ));
        self.running.store(true, Ordering::SeqCst);
        *slot = Some(Scheduler { shutdown, task });
        Ok(())
    }

    /// Stops the scheduler: requests orderly shutdown, waits up to the
    /// grace period, force-cancels stragglers, then disconnects every
    /// connection. Idempotent.
    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().await.take();
        if let Some(Scheduler { shutdown, task }) = scheduler {
            let _ = self
                .sink
                .log(&format!("{}: stop logging", self.name), false)
                .await;
            let _ = shutdown.send(true);
            let mut task = task;
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                tracing::warn!("{}: scheduler did not stop in time, aborting", self.name);
                task.abort();
            }
        }
        self.running.store(false, Ordering::SeqCst);

        for connection in &self.connections {
            connection.disconnect().await;
        }
        self.sink.close().await;
    }

    // ------------------------------------------------------------------
    // Archiving service
    // ------------------------------------------------------------------

    /// Whether the sink supports archiving at all.
    pub fn is_archiver(&self) -> bool {
        self.sink.is_archiver()
    }

    pub async fn is_archiver_set(&self) -> bool {
        self.archiver.lock().await.is_some()
    }

    /// Installs (or replaces) the archiving schedule.
    pub async fn set_archiving_service(
        &self,
        day_of_week: u8,
        interval: u32,
        monthly: bool,
    ) -> Result<(), LoggerError> {
        if !self.sink.is_archiver() {
            return Err(LoggerError::ArchiverUnsupported);
        }
        let schedule = ArchiverSchedule::new(day_of_week, interval, monthly)?;

        let mut slot = self.archiver.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        *slot = Some(Archiver::start(self.sink.clone(), schedule));
        Ok(())
    }

    pub async fn stop_archiving_service(&self) {
        if let Some(archiver) = self.archiver.lock().await.take() {
            archiver.stop().await;
        }
    }

    // ------------------------------------------------------------------
    // IPC server
    // ------------------------------------------------------------------

    /// Attaches and starts the IPC server. At most one per logger, and
    /// only on a logger finalized with [`Self::shared`].
    pub async fn add_ipc_server(
        &self,
        port: u16,
        control_enabled: bool,
        tls: jidl_ipc::ServerTlsConfig,
    ) -> Result<(), LoggerError> {
        let mut slot = self.ipc.lock().await;
        if slot.is_some() {
            return Err(LoggerError::IpcAlreadyAttached);
        }
        let handler = Arc::new(crate::handler::LoggerRequestHandler::new(
            control_enabled,
            self.self_ref.clone(),
        ));
        let server = Arc::new(jidl_ipc::ProtocolServer::new(port, tls, handler));
        server.start().await?;
        *slot = Some(server);
        Ok(())
    }

    /// `true` while the IPC server is up.
    pub async fn ipc_status(&self) -> bool {
        self.ipc
            .lock()
            .await
            .as_ref()
            .is_some_and(|server| server.is_started())
    }

    /// The IPC server's bound address, while started.
    pub async fn ipc_local_addr(&self) -> Option<std::net::SocketAddr> {
        self.ipc
            .lock()
            .await
            .as_ref()
            .and_then(|server| server.local_addr())
    }

    pub async fn stop_ipc_server(&self) {
        if let Some(server) = self.ipc.lock().await.take() {
            server.stop().await;
        }
    }
}

async fn run_scheduler(
    connections: Vec<Arc<Connection>>,
    sink: Arc<dyn Sink>,
    fatal: Option<FatalHandler>,
    step: u64,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_millis(step * 100);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut counter: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        counter += step;

        // Read fan-out: one task per due connection, then the barrier.
        let mut reads = JoinSet::new();
        for connection in &connections {
            if connection.is_due(counter) {
                let connection = connection.clone();
                let sink = sink.clone();
                let fatal = fatal.clone();
                let shutdown_tx = shutdown_tx.clone();
                reads.spawn(read_task(connection, sink, fatal, shutdown_tx));
            }
        }
        while reads.join_next().await.is_some() {}

        if *shutdown.borrow() {
            break;
        }

        // Write pass: detached, never gating the next tick.
        for connection in &connections {
            if connection.is_due(counter) && connection.kind().is_writeable() {
                let connection = connection.clone();
                tokio::spawn(async move {
                    if !connection.has_writers().await
                        || connection.status().await != LinkStatus::Connected
                    {
                        return;
                    }
                    if let Err(e) = connection.write().await {
                        tracing::warn!("{}: write failed: {e}", connection.name());
                        connection.disconnect().await;
                    }
                });
            }
        }
    }

    // The run is over, orderly or fatal: leave every device disconnected.
    for connection in &connections {
        connection.disconnect().await;
    }
    running.store(false, Ordering::SeqCst);
}

async fn read_task(
    connection: Arc<Connection>,
    sink: Arc<dyn Sink>,
    fatal: Option<FatalHandler>,
    shutdown: watch::Sender<bool>,
) {
    if !connection.has_readers().await {
        return;
    }

    if connection.status().await == LinkStatus::Connected {
        match connection.read().await {
            Ok(()) => {
                let Some(row) = connection.sample().await else {
                    return;
                };
                match sink.add_entry(connection.name(), &row).await {
                    Ok(()) => {}
                    Err(e @ SinkError::Unavailable(_)) => {
                        // The one fatal path: surface the cause, then
                        // bring the whole run down.
                        tracing::error!("{}: {e}; stopping the logger", connection.name());
                        if let Some(fatal) = &fatal {
                            fatal(&e);
                        }
                        let _ = shutdown.send(true);
                    }
                    Err(e) => {
                        tracing::warn!("{}: dropped one row: {e}", connection.name());
                    }
                }
            }
            Err(e) => {
                connection.disconnect().await;
                let _ = sink
                    .log(&format!("{}: {e}", connection.name()), false)
                    .await;
            }
        }
    } else if connection.is_initialized().await {
        match connection.connect().await {
            Ok(()) => {
                let _ = sink
                    .log(&format!("{} connected", connection.name()), false)
                    .await;
            }
            Err(_) => {
                let _ = sink
                    .log(&format!("{} cannot connect", connection.name()), false)
                    .await;
            }
        }
    } else {
        match connection.initialize().await {
            Ok(()) => {
                let _ = sink
                    .log(&format!("{} initialized", connection.name()), false)
                    .await;
            }
            Err(e) => {
                let _ = sink
                    .log(
                        &format!("{} failed initialization: {e}", connection.name()),
                        false,
                    )
                    .await;
            }
        }
    }
}
