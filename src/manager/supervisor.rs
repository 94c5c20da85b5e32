// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The fleet manager.
//!
//! The manager starts worker processes, verifies the connections they open
//! back to it, routes their messages and watches their health.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Manager                              │
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────────────────┐  │
//! │  │ accept loop   │  │ Registry      │  │ health loop     │  │
//! │  │ 127.0.0.1:8800│─▶│ name → record │◀─│ MetricsSource   │  │
//! │  └───────┬───────┘  └───────────────┘  │ HealthMonitor   │  │
//! │          │ verify + bind                │ AlertSink       │  │
//! │          ▼                              └─────────────────┘  │
//! │  ┌───────────────┐     ┌────────────────────┐               │
//! │  │ watch task    │────▶│ dispatch::route    │               │
//! │  │ (per worker)  │     │ local / forward    │               │
//! │  └───────────────┘     └────────────────────┘               │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                         ▲
//!    ┌─────┴─────┐             ┌─────┴─────┐
//!    │ Worker A  │             │ Worker B  │
//!    └───────────┘             └───────────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local};
use nix::sys::signal::Signal;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::correlator::{self, Response, ResponseCorrelator};
use super::dispatch::{route, Command, DataRequest, DropReason, Route};
use super::health::{Alert, HealthMonitor, SubjectClass};
use super::ipc::protocol::encode_ack;
use super::ipc::{transport, Connection, IpcError, IpcListener, IpcStream, Message, MessageType, Received, ResponseDetails, PLATFORM_PING_KEY};
use super::metrics::{MetricsSnapshot, MetricsSource, ProcessSample, SysinfoSource};
use super::notify::{AlertSink, LogSink, NotifyError, Report, WebhookSink};
use super::process::{self, CommandLauncher, Launcher, ProcessError, ProcessHandle};
use super::registry::{Registry, WorkerInfo, WorkerRecord};
use super::types::{ManagerConfig, PingResult, WorkerStatus, MANAGER_NAME};

/// How long a new connection has to send its identity.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the worker event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Subject name for whole-machine metrics.
const SYSTEM_SUBJECT: &str = "system";

/// Error type for manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Worker already exists: {0}")]
    WorkerAlreadyExists(String),

    #[error("Invalid worker name: {0:?}")]
    InvalidWorkerName(String),

    #[error("Manager already started")]
    AlreadyStarted,

    #[error("Shutdown failed: {0}")]
    ShutdownFailed(String),
}

/// Events from the fleet.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker verified and bound.
    Connected { name: String },
    /// Worker's connection dropped without a close.
    Disconnected { name: String },
    /// Worker was closed or killed by the manager.
    Closed { name: String },
    /// A worker asked for a stand-in to be summoned.
    Summoned { from: String, details: Value },
}

/// The manager's pluggable dependencies.
pub struct Collaborators {
    pub launcher: Arc<dyn Launcher>,
    pub metrics: Arc<dyn MetricsSource>,
    pub sink: Arc<dyn AlertSink>,
}

impl Collaborators {
    pub fn new(launcher: Arc<dyn Launcher>, metrics: Arc<dyn MetricsSource>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            launcher,
            metrics,
            sink,
        }
    }

    /// Production collaborators: the configured launcher, OS metrics and
    /// the webhook sink if a URL is set (the log otherwise).
    pub fn from_config(config: &ManagerConfig) -> Result<Self, NotifyError> {
        let sink: Arc<dyn AlertSink> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url.clone())?),
            None => Arc::new(LogSink),
        };
        Ok(Self {
            launcher: Arc::new(CommandLauncher::new(config.launcher.clone())),
            metrics: Arc::new(SysinfoSource::new()),
            sink,
        })
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Supervisor for a fleet of worker bots.
pub struct Manager {
    config: ManagerConfig,
    registry: Registry,
    correlator: ResponseCorrelator,
    launcher: Arc<dyn Launcher>,
    metrics: Arc<dyn MetricsSource>,
    sink: Arc<dyn AlertSink>,
    health: Mutex<HealthMonitor>,
    started_at: DateTime<Local>,
    /// Bound but not yet accepting.
    listener: Mutex<Option<IpcListener>>,
    local_addr: OnceLock<SocketAddr>,
    /// Accept and health loops.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Outcome of the one teardown every `close` caller waits on.
    teardown: OnceCell<Result<(), String>>,
    shutdown_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<WorkerEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<WorkerEvent>>>,
}

impl Manager {
    /// Create a manager with collaborators built from `config`.
    pub fn new(config: ManagerConfig) -> Result<Arc<Self>, ManagerError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(config, collaborators))
    }

    pub fn with_collaborators(config: ManagerConfig, collaborators: Collaborators) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let health = HealthMonitor::new(config.thresholds.clone(), Local::now().day());

        Arc::new(Self {
            config,
            registry: Registry::new(),
            correlator: ResponseCorrelator::new(),
            launcher: collaborators.launcher,
            metrics: collaborators.metrics,
            sink: collaborators.sink,
            health: Mutex::new(health),
            started_at: Local::now(),
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            teardown: OnceCell::new(),
            shutdown_tx,
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Take the event receiver.
    ///
    /// Use this to process worker events in a separate task.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<WorkerEvent>> {
        match self.event_rx.lock() {
            Ok(mut rx) => rx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Port workers should connect to.
    fn port(&self) -> u16 {
        self.local_addr().map(|a| a.port()).unwrap_or(self.config.port)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn worker_status(&self, name: &str) -> Option<WorkerStatus> {
        self.registry.status(name).await
    }

    pub async fn worker_info(&self, name: &str) -> Option<WorkerInfo> {
        self.registry.info(name).await
    }

    /// All known workers and their status, sorted by name.
    pub async fn workers(&self) -> Vec<(String, WorkerStatus)> {
        self.registry.list().await
    }

    /// Number of requests awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.correlator.pending_count().await
    }

    fn emit(&self, event: WorkerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("Worker event dropped: {}", e);
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind the listener. Idempotent.
    pub async fn bind(&self) -> Result<SocketAddr, ManagerError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }
        let addr = self.config.bind_addr();
        let listener = transport::bind(&addr)
            .await
            .map_err(|e| IpcError::BindFailed(format!("{}: {}", addr, e)))?;
        let local = listener.local_addr()?;
        *self.listener.lock().await = Some(listener);
        let _ = self.local_addr.set(local);
        Ok(local)
    }

    /// Bind, start the startup workers and the background loops.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ManagerError> {
        let addr = self.bind().await?;
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(ManagerError::AlreadyStarted)?;
        info!("Manager listening on {}", addr);

        for name in &self.config.startup {
            if let Err(e) = self.start_bot(name).await {
                error!(worker = %name, "Failed to start: {}", e);
            }
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(Arc::clone(self).accept_loop(listener)));
        if self.config.metrics.enabled {
            tasks.push(tokio::spawn(Arc::clone(self).metrics_loop()));
        }
        Ok(addr)
    }

    /// Start and serve until interrupted or a worker asks for shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ManagerError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        self.start().await?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received interrupt"),
                Err(e) => error!("Failed to listen for interrupt: {}", e),
            },
            _ = shutdown_requested(&mut shutdown) => info!("Shutdown requested"),
        }

        self.close().await
    }

    /// Ask a running manager to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Close every worker and stop the background loops.
    ///
    /// Concurrent and repeated calls all wait for the same teardown and
    /// get its outcome.
    pub async fn close(&self) -> Result<(), ManagerError> {
        self.teardown
            .get_or_init(|| self.tear_down())
            .await
            .clone()
            .map_err(ManagerError::ShutdownFailed)
    }

    async fn tear_down(&self) -> Result<(), String> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Shutting down manager");
        self.shutdown();

        let mut failures = Vec::new();
        for name in self.registry.open_names().await {
            if let Err(e) = self.close_bot(&name).await {
                warn!(worker = %name, "Failed to close: {}", e);
                failures.push(format!("{}: {}", name, e));
            }
        }

        self.listener.lock().await.take();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        if let Err(e) = self.sink.close().await {
            error!("Failed to close alert sink: {}", e);
            failures.push(format!("alert sink: {}", e));
        }

        if !failures.is_empty() {
            return Err(failures.join("; "));
        }
        info!("Manager closed");
        Ok(())
    }

    // ========================================================================
    // Connections
    // ========================================================================

    async fn accept_loop(self: Arc<Self>, listener: IpcListener) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Incoming connection");
                        let manager = Arc::clone(&self);
                        tokio::spawn(async move { manager.on_connection(stream).await });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!("Accept loop stopped");
    }

    async fn on_connection(self: Arc<Self>, stream: IpcStream) {
        let connection = Arc::new(Connection::new(MANAGER_NAME, stream));
        let Some(name) = self.verify(&connection).await else {
            let _ = connection.close().await;
            return;
        };

        let manager = Arc::clone(&self);
        let watched = Arc::clone(&connection);
        let watched_name = name.clone();
        let task = tokio::spawn(async move { manager.watch(watched_name, watched).await });
        if !self.registry.set_watch_task(&name, &connection, task).await {
            debug!(worker = %name, "Closed during handshake, not watching");
            let _ = connection.close().await;
            return;
        }
        self.emit(WorkerEvent::Connected { name });
    }

    /// Run the identity handshake. The record is bound before the ack is
    /// written, so a losing concurrent connection never sees an ack.
    async fn verify(&self, connection: &Arc<Connection>) -> Option<String> {
        let name = match tokio::time::timeout(IDENTITY_TIMEOUT, connection.read_identity()).await {
            Ok(Ok(Some(name))) => name,
            Ok(Ok(None)) => {
                info!("Connection closed without a valid identity");
                return None;
            }
            Ok(Err(e)) => {
                warn!("Failed to read identity: {}", e);
                return None;
            }
            Err(_) => {
                info!("Connection did not identify in time");
                return None;
            }
        };

        if let Err(e) = self.registry.try_bind(&name, Arc::clone(connection)).await {
            info!(worker = %name, "Could not verify: {}. Closing connection.", e);
            return None;
        }
        connection.set_peer(name.clone());

        if let Err(e) = connection.write_raw(&encode_ack(&name)).await {
            warn!(worker = %name, "Failed to acknowledge: {}", e);
            self.registry.unbind(&name, connection).await;
            return None;
        }
        info!(worker = %name, "Verified");
        Some(name)
    }

    async fn watch(self: Arc<Self>, name: String, connection: Arc<Connection>) {
        debug!(worker = %name, "Watching for messages");
        loop {
            match connection.receive().await {
                Received::Message(msg) => {
                    let manager = Arc::clone(&self);
                    let source = name.clone();
                    tokio::spawn(async move { manager.handle_message(&source, msg).await });
                }
                Received::Malformed(reason) => {
                    warn!(worker = %name, "Dropping malformed frame: {}", reason);
                }
                Received::Closed => {
                    if self.registry.remove_disconnected(&name, &connection).await {
                        error!(worker = %name, "Connection has closed unexpectedly");
                        self.health.lock().await.forget(&name);
                        self.emit(WorkerEvent::Disconnected { name: name.clone() });
                    }
                    let _ = connection.close().await;
                    break;
                }
            }
        }
        debug!(worker = %name, "No longer watching for messages");
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Handle one message that arrived on the connection bound to `source`.
    pub async fn handle_message(&self, source: &str, msg: Message) {
        match route(source, &msg) {
            Route::Drop(DropReason::SenderMismatch { claimed }) => {
                warn!(worker = %source, claimed = %claimed, "Sender does not match connection, dropping message");
            }
            Route::Drop(DropReason::UnknownType) => {
                warn!(worker = %source, "Unknown message type, dropping message");
            }
            Route::Local(kind) => match kind {
                MessageType::ActionReq => self.process_action_request(msg).await,
                MessageType::DataReq => self.process_data_request(msg).await,
                MessageType::Response | MessageType::Pong => self.process_response(msg).await,
                MessageType::Ping => self.pong(msg).await,
                MessageType::Summon => self.summon(msg),
                MessageType::Unknown => {}
            },
            Route::Forward(target) => self.forward(&target, msg).await,
        }
    }

    async fn forward(&self, target: &str, msg: Message) {
        let Some(connection) = self.registry.active_connection(target).await else {
            debug!(from = %msg.from, to = %target, "Recipient not active, dropping message");
            return;
        };
        if let Err(e) = connection.send(msg).await {
            warn!(to = %target, "Failed to forward: {}", e);
        }
    }

    async fn process_action_request(&self, msg: Message) {
        let command = match Command::parse(&msg.details) {
            Ok(command) => command,
            Err(e) => {
                warn!(from = %msg.from, "Rejected action request: {}", e);
                self.reply(&msg, false, error_details(&e.to_string())).await;
                return;
            }
        };
        info!(from = %msg.from, "{} requested", command);

        if command == Command::CloseServer {
            if let Err(e) = self.close().await {
                error!("Shutdown failed: {}", e);
            }
            return;
        }

        match self.execute(command).await {
            Ok(result) => {
                let mut extra = Map::new();
                extra.insert("result".to_string(), result);
                self.reply(&msg, true, extra).await;
            }
            Err(e) => {
                warn!(from = %msg.from, "Action failed: {}", e);
                self.reply(&msg, false, error_details(&e.to_string())).await;
            }
        }
    }

    /// Run a command and return its result value.
    pub async fn execute(&self, command: Command) -> Result<Value, ManagerError> {
        match command {
            Command::CloseServer => {
                self.close().await?;
                Ok(Value::Null)
            }
            Command::CloseBot(name) => {
                self.close_bot(&name).await?;
                Ok(Value::Null)
            }
            Command::KillBot(name) => Ok(self.kill_bot(&name).await?.map(Value::from).unwrap_or(Value::Null)),
            Command::StartBot(name) => {
                self.start_bot(&name).await?;
                Ok(Value::Null)
            }
            Command::Metrics(who) => {
                let snapshot = self
                    .metrics(&who)
                    .await
                    .ok_or(ManagerError::WorkerNotFound(who))?;
                Ok(serde_json::to_value(snapshot)?)
            }
        }
    }

    async fn process_data_request(&self, msg: Message) {
        let who = match DataRequest::parse(&msg.details) {
            Ok(DataRequest::Metrics(who)) => who,
            Err(e) => {
                warn!(from = %msg.from, "Rejected data request: {}", e);
                self.reply(&msg, false, error_details(&e.to_string())).await;
                return;
            }
        };

        let Some(snapshot) = self.metrics(&who).await else {
            self.reply(&msg, false, error_details(&format!("unknown subject: {}", who)))
                .await;
            return;
        };
        match serde_json::to_value(snapshot) {
            Ok(value) => {
                let mut extra = Map::new();
                extra.insert("metrics".to_string(), value);
                self.reply(&msg, true, extra).await;
            }
            Err(e) => warn!("Failed to serialize metrics: {}", e),
        }
    }

    async fn process_response(&self, msg: Message) {
        let from = msg.from;
        let details = match ResponseDetails::parse(msg.details) {
            Ok(details) => details,
            Err(e) => {
                warn!(worker = %from, "Invalid response: {}", e);
                return;
            }
        };

        let key = correlator::key(from, details.timestamp);
        let response = Response::new(details.status, details.rest);
        if !self.correlator.resolve(&key, response).await {
            warn!(worker = %key.0, timestamp = %key.1, "Unmatched response");
        }
    }

    async fn pong(&self, msg: Message) {
        let reply = Message::pong(&msg.timestamp, None).to(msg.from.clone());
        self.send_to(&msg.from, reply).await;
    }

    fn summon(&self, msg: Message) {
        info!(from = %msg.from, "Summon requested");
        self.emit(WorkerEvent::Summoned {
            from: msg.from,
            details: msg.details,
        });
    }

    async fn reply(&self, request: &Message, success: bool, extra: Map<String, Value>) {
        let response = Message::response(success, &request.timestamp, extra).to(request.from.clone());
        self.send_to(&request.from, response).await;
    }

    /// Best-effort send to an active worker.
    async fn send_to(&self, name: &str, msg: Message) {
        let Some(connection) = self.registry.active_connection(name).await else {
            debug!(worker = %name, kind = %msg.kind, "Worker not active, reply dropped");
            return;
        };
        if let Err(e) = connection.send(msg).await {
            debug!(worker = %name, "Failed to send: {}", e);
        }
    }

    // ========================================================================
    // Requests to workers
    // ========================================================================

    /// Send a message to a worker without waiting for an answer.
    pub async fn send(&self, name: &str, msg: Message) -> Result<Message, ManagerError> {
        let connection = self
            .registry
            .active_connection(name)
            .await
            .ok_or_else(|| IpcError::WorkerNotConnected(name.to_string()))?;
        Ok(connection.send(msg.to(name)).await?)
    }

    /// Send `msg` to a worker and wait for the correlated response.
    ///
    /// The pending slot is registered before the message is written, so a
    /// fast reply cannot be missed. `Ok(None)` means no answer in time.
    pub async fn request(&self, name: &str, msg: Message, timeout: Duration) -> Result<Option<Response>, ManagerError> {
        let connection = self
            .registry
            .active_connection(name)
            .await
            .ok_or_else(|| IpcError::WorkerNotConnected(name.to_string()))?;

        let mut msg = msg.to(name);
        msg.fill(name, MANAGER_NAME);
        let pending = self.correlator.register(correlator::key(name, &msg.timestamp)).await;
        if let Err(e) = connection.send(msg).await {
            self.correlator.cancel(pending.key()).await;
            return Err(e.into());
        }
        Ok(pending.wait(timeout).await)
    }

    /// Ping a worker. `None` if it is not active or did not answer in time.
    pub async fn ping(&self, name: &str, timeout: Duration) -> Option<PingResult> {
        let sent = Instant::now();
        match self.request(name, Message::ping(), timeout).await {
            Ok(Some(response)) => Some(PingResult {
                round_trip: sent.elapsed(),
                platform: response.get(PLATFORM_PING_KEY).and_then(Value::as_f64),
            }),
            Ok(None) => {
                debug!(worker = %name, "Ping timed out");
                None
            }
            Err(e) => {
                debug!(worker = %name, "Ping failed: {}", e);
                None
            }
        }
    }

    // ========================================================================
    // Worker lifecycle
    // ========================================================================

    /// Register a worker and launch its process.
    ///
    /// With `spawn_workers` off the worker is only registered and its
    /// process is found by command line when needed.
    pub async fn start_bot(&self, name: &str) -> Result<(), ManagerError> {
        validate_name(name)?;
        let port = self.port();
        let launcher = Arc::clone(&self.launcher);
        let spawn = self.config.spawn_workers;

        let inserted = self
            .registry
            .insert_with(name, || {
                let process = if spawn {
                    launcher.launch(name, port)?
                } else {
                    ProcessHandle::detached(name, launcher.command_line(name, port))
                };
                Ok::<_, ProcessError>(WorkerRecord::new(name, Some(process)))
            })
            .await?;
        if !inserted {
            return Err(ManagerError::WorkerAlreadyExists(name.to_string()));
        }

        self.health.lock().await.forget(name);
        info!(worker = %name, spawned = spawn, "Started");
        Ok(())
    }

    /// Gracefully close a worker. The record is kept, marked closed.
    pub async fn close_bot(&self, name: &str) -> Result<(), ManagerError> {
        let retired = self
            .registry
            .retire(name)
            .await
            .ok_or_else(|| ManagerError::WorkerNotFound(name.to_string()))?;
        if retired.was_closed {
            debug!(worker = %name, "Already closed");
            return Ok(());
        }
        info!(worker = %name, "Closing");

        if let Some(task) = retired.watch_task {
            task.abort();
        }
        if let Some(connection) = retired.connection {
            if let Err(e) = connection.send(Message::action("closeBot", None)).await {
                debug!(worker = %name, "Could not send close request: {}", e);
            }
            let _ = connection.close().await;
        }
        if let Some(process) = retired.process {
            let outcome = process.lock().await.close(self.config.close_timeout()).await;
            debug!(worker = %name, ?outcome, "Process closed");
        }

        self.emit(WorkerEvent::Closed {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Force-kill a worker's process. Returns the killed PID, if any.
    ///
    /// For a name the registry does not know, the process is looked up by
    /// its command line. If that resolves to the manager itself, the
    /// manager shuts down instead.
    pub async fn kill_bot(&self, name: &str) -> Result<Option<u32>, ManagerError> {
        if let Some(retired) = self.registry.retire(name).await {
            info!(worker = %name, "Killing");
            if let Some(task) = retired.watch_task {
                task.abort();
            }
            if let Some(connection) = retired.connection {
                let _ = connection.close().await;
            }
            let pid = match retired.process {
                Some(process) => process.lock().await.kill().await,
                None => None,
            };
            if !retired.was_closed {
                self.emit(WorkerEvent::Closed {
                    name: name.to_string(),
                });
            }
            return Ok(pid);
        }

        let cmdline = self.launcher.command_line(name, self.port());
        let Some(pid) = process::locate(cmdline).await else {
            debug!(worker = %name, "No process to kill");
            return Ok(None);
        };
        if pid == std::process::id() {
            warn!(worker = %name, "Kill target is the manager itself, shutting down instead");
            self.close().await?;
            return Ok(None);
        }
        process::send_signal(pid, Signal::SIGTERM)?;
        info!(worker = %name, pid, "Killed unregistered process");
        Ok(Some(pid))
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Current metrics for `system`, `manager` or a registered worker.
    pub async fn metrics(&self, who: &str) -> Option<MetricsSnapshot> {
        self.refresh_metrics().await;
        self.read_metrics(who).await
    }

    /// Take one reading for a whole pass.
    async fn refresh_metrics(&self) {
        self.sample(|source| source.refresh()).await;
    }

    /// Read a subject from the last refresh.
    async fn read_metrics(&self, who: &str) -> Option<MetricsSnapshot> {
        if who == SYSTEM_SUBJECT {
            let sample = self.sample(|source| source.sample_system()).await?;
            return Some(MetricsSnapshot::from_system(sample));
        }

        if who == MANAGER_NAME {
            let mut snapshot = self.process_snapshot(MANAGER_NAME, Some(std::process::id())).await;
            snapshot.started_at = Some(self.started_at);
            return Some(snapshot);
        }

        let info = self.registry.info(who).await?;
        let pid = match &info.process {
            Some(process) => process.lock().await.pid().await,
            None => None,
        };
        let mut snapshot = self.process_snapshot(who, pid).await;
        snapshot.started_at = Some(info.started_at);
        snapshot.stopped_at = info.closed_at;
        Some(snapshot)
    }

    async fn process_snapshot(&self, who: &str, pid: Option<u32>) -> MetricsSnapshot {
        let sample: Option<ProcessSample> = match pid {
            Some(pid) => self.sample(move |source| source.sample_process(pid)).await.flatten(),
            None => None,
        };
        sample
            .map(|sample| MetricsSnapshot::from_process(who, sample))
            .unwrap_or_else(|| MetricsSnapshot::empty(who))
    }

    /// Run `read` against the metrics source on the blocking pool.
    async fn sample<T, F>(&self, read: F) -> Option<T>
    where
        F: FnOnce(&dyn MetricsSource) -> T + Send + 'static,
        T: Send + 'static,
    {
        let source = Arc::clone(&self.metrics);
        match tokio::task::spawn_blocking(move || read(source.as_ref())).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Metrics sampling failed: {}", e);
                None
            }
        }
    }

    /// Sample every subject, evaluate thresholds and report new breaches.
    /// Returns the alerts raised by this pass.
    pub async fn check_metrics(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        self.refresh_metrics().await;

        if let Some(system) = self.read_metrics(SYSTEM_SUBJECT).await {
            let alert = self.health.lock().await.evaluate(SubjectClass::System, &system);
            alerts.extend(alert);
        }

        for snapshot in self.sample_subjects().await {
            let alert = self.health.lock().await.evaluate(SubjectClass::Process, &snapshot);
            alerts.extend(alert);
        }

        for alert in &alerts {
            let report = Report::MetricsWarning {
                description: alert.description(),
                snapshot: alert.snapshot.clone(),
            };
            if let Err(e) = self.sink.report(&report).await {
                warn!("Failed to deliver alert: {}", e);
            }
        }
        alerts
    }

    /// Snapshots of the manager and every worker from the last refresh,
    /// active workers pinged.
    async fn sample_subjects(&self) -> Vec<MetricsSnapshot> {
        let mut subjects = vec![MANAGER_NAME.to_string()];
        subjects.extend(self.registry.names().await);

        let mut snapshots = Vec::with_capacity(subjects.len());
        for who in subjects {
            let Some(mut snapshot) = self.read_metrics(&who).await else {
                continue;
            };
            if who != MANAGER_NAME && self.registry.is_active(&who).await {
                if let Some(ping) = self.ping(&who, self.config.metrics.ping_timeout()).await {
                    snapshot.socket_ping = Some(ping.round_trip.as_secs_f64());
                    snapshot.platform_ping = ping.platform;
                }
            }
            snapshots.push(snapshot);
        }
        snapshots
    }

    /// Send the daily summary if the calendar day changed.
    pub async fn check_new_day(&self) -> bool {
        self.check_day(Local::now().day()).await
    }

    async fn check_day(&self, day: u32) -> bool {
        if !self.health.lock().await.check_new_day(day) {
            return false;
        }
        info!("New day, sending daily summary");

        let Some(system) = self.read_metrics(SYSTEM_SUBJECT).await else {
            warn!("No system metrics for the daily summary");
            return true;
        };
        let subjects = self.sample_subjects().await;
        let report = Report::DailySummary {
            description: format!("Data for {} subjects", subjects.len()),
            system,
            subjects,
        };
        if let Err(e) = self.sink.report(&report).await {
            warn!("Failed to deliver daily summary: {}", e);
        }
        true
    }

    async fn metrics_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let settings = self.config.metrics.clone();

        tokio::select! {
            _ = tokio::time::sleep(settings.startup_delay()) => {}
            _ = shutdown_requested(&mut shutdown) => return,
        }
        info!(interval = ?settings.interval(), "Health loop started");

        loop {
            let pass = Instant::now();
            let alerts = self.check_metrics().await;
            debug!(alerts = alerts.len(), elapsed = ?pass.elapsed(), "Checked metrics");
            self.check_new_day().await;

            tokio::select! {
                _ = tokio::time::sleep(settings.interval()) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!("Health loop stopped");
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn validate_name(name: &str) -> Result<(), ManagerError> {
    let reserved = name == MANAGER_NAME || name == SYSTEM_SUBJECT;
    let malformed = name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control());
    if reserved || malformed {
        return Err(ManagerError::InvalidWorkerName(name.to_string()));
    }
    Ok(())
}

fn error_details(message: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("error".to_string(), Value::String(message.to_string()));
    extra
}
