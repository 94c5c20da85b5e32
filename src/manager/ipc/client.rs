// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! IPC client for worker processes.
//!
//! The client dials the manager, identifies itself by name and then runs a
//! reader task that answers pings, resolves responses to its own requests
//! and forwards everything else to an inbox.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Map;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{Connection, Received};
use super::error::{IpcError, IpcResult};
use super::protocol::{encode_identity, is_ack_for, Message, MessageType, ResponseDetails, PLATFORM_PING_KEY};
use super::transport;
use super::super::correlator::{self, Response, ResponseCorrelator};
use super::super::types::{PingResult, MANAGER_NAME};

const CONNECT_RETRY_ATTEMPTS: usize = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const INBOX_CAPACITY: usize = 100;

/// IPC client for worker-manager communication.
pub struct WorkerClient {
    /// Manager address, `host:port`.
    addr: String,
    /// Worker name sent as identity.
    name: String,
    connection: Option<Arc<Connection>>,
    correlator: ResponseCorrelator,
    /// Latency to the chat platform reported in pongs, in seconds.
    platform_latency: Arc<Mutex<Option<f64>>>,
    inbox_rx: Option<mpsc::Receiver<Message>>,
    reader_task: Option<JoinHandle<()>>,
}

impl WorkerClient {
    /// Create a new client.
    pub fn new(addr: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: name.into(),
            connection: None,
            correlator: ResponseCorrelator::new(),
            platform_latency: Arc::new(Mutex::new(None)),
            inbox_rx: None,
            reader_task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect to the manager and complete the identity handshake.
    pub async fn connect(&mut self) -> IpcResult<()> {
        let mut last_error: Option<String> = None;
        let mut stream = None;

        for attempt in 0..CONNECT_RETRY_ATTEMPTS {
            match tokio::time::timeout(CONNECT_TIMEOUT, transport::connect(&self.addr)).await {
                Ok(Ok(conn)) => {
                    stream = Some(conn);
                    break;
                }
                Ok(Err(err)) => {
                    last_error = Some(err.to_string());
                }
                Err(_) => {
                    last_error = Some("connect timeout".to_string());
                }
            }

            if attempt + 1 < CONNECT_RETRY_ATTEMPTS {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }

        let stream = stream.ok_or_else(|| {
            IpcError::ConnectFailed(format!(
                "{}: {}",
                self.addr,
                last_error.unwrap_or_else(|| "failed to connect".to_string())
            ))
        })?;

        let connection = Arc::new(Connection::new(self.name.clone(), stream));
        connection.set_peer(MANAGER_NAME);
        connection.write_raw(&encode_identity(&self.name)).await?;

        let ack = tokio::time::timeout(HANDSHAKE_TIMEOUT, connection.read_text())
            .await
            .map_err(|_| IpcError::Timeout)??;
        match ack {
            Some(text) if is_ack_for(text.as_bytes(), &self.name) => {}
            Some(text) => {
                return Err(IpcError::HandshakeFailed(format!(
                    "unexpected acknowledgement: {}",
                    text
                )))
            }
            None => return Err(IpcError::ConnectionClosed),
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        self.inbox_rx = Some(inbox_rx);

        let reader = Arc::clone(&connection);
        let correlator = self.correlator.clone();
        let platform_latency = Arc::clone(&self.platform_latency);
        self.reader_task = Some(tokio::spawn(async move {
            Self::read_loop(reader, correlator, platform_latency, inbox_tx).await;
        }));

        self.connection = Some(connection);
        info!(worker = %self.name, "Connected to manager at {}", self.addr);
        Ok(())
    }

    async fn read_loop(
        connection: Arc<Connection>,
        correlator: ResponseCorrelator,
        platform_latency: Arc<Mutex<Option<f64>>>,
        inbox: mpsc::Sender<Message>,
    ) {
        loop {
            match connection.receive().await {
                Received::Message(msg) => {
                    if msg.to != connection.local_name() {
                        debug!(to = %msg.to, "Ignoring message addressed elsewhere");
                        continue;
                    }
                    match msg.kind {
                        MessageType::Ping => {
                            let latency = *platform_latency.lock().await;
                            let pong = Message::pong(&msg.timestamp, latency).to(msg.from.clone());
                            if let Err(e) = connection.send(pong).await {
                                warn!("Failed to answer ping: {}", e);
                            }
                        }
                        MessageType::Response | MessageType::Pong => {
                            Self::resolve(&correlator, msg).await;
                        }
                        _ => {
                            let close_requested = is_close_request(&msg);
                            if inbox.send(msg).await.is_err() {
                                debug!("Inbox dropped; discarding message");
                            }
                            if close_requested {
                                info!("Manager requested shutdown");
                                if let Err(e) = connection.close().await {
                                    debug!("Close after closeBot failed: {}", e);
                                }
                                break;
                            }
                        }
                    }
                }
                Received::Malformed(reason) => {
                    warn!("Malformed frame from manager: {}", reason);
                }
                Received::Closed => {
                    info!("Manager disconnected");
                    break;
                }
            }
        }
    }

    async fn resolve(correlator: &ResponseCorrelator, msg: Message) {
        let from = msg.from;
        match ResponseDetails::parse(msg.details) {
            Ok(details) => {
                let key = correlator::key(from, details.timestamp);
                if !correlator
                    .resolve(&key, Response::new(details.status, details.rest))
                    .await
                {
                    debug!(peer = %key.0, timestamp = %key.1, "Unmatched response");
                }
            }
            Err(e) => warn!("Invalid response from {}: {}", from, e),
        }
    }

    /// Take the inbox of messages not handled by the client itself.
    ///
    /// The inbox yields `None` once the manager disconnects.
    pub fn take_inbox(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.inbox_rx.take()
    }

    /// Set the platform latency reported in pongs.
    pub async fn set_platform_latency(&self, latency: Option<f64>) {
        *self.platform_latency.lock().await = latency;
    }

    /// Send a message. Empty `to` defaults to the manager.
    pub async fn send(&self, msg: Message) -> IpcResult<Message> {
        let connection = self.connection.as_ref().ok_or_else(|| IpcError::NotBound(self.name.clone()))?;
        Ok(connection.send(msg).await?)
    }

    /// Send a request and wait for the correlated response.
    pub async fn request(
        &self,
        msg: Message,
        timeout: Duration,
    ) -> IpcResult<Option<Response>> {
        let connection = self.connection.as_ref().ok_or_else(|| IpcError::NotBound(self.name.clone()))?;

        let mut msg = msg;
        msg.fill(MANAGER_NAME, connection.local_name());
        let pending = self
            .correlator
            .register(correlator::key(msg.to.clone(), msg.timestamp.clone()))
            .await;

        if let Err(e) = connection.send(msg).await {
            self.correlator.cancel(pending.key()).await;
            return Err(e.into());
        }
        Ok(pending.wait(timeout).await)
    }

    /// Ping a peer (the manager by default) and measure the round trip.
    pub async fn ping(
        &self,
        to: Option<&str>,
        timeout: Duration,
    ) -> IpcResult<Option<PingResult>> {
        let start = Instant::now();
        let msg = Message::ping().to(to.unwrap_or(MANAGER_NAME));
        let response = self.request(msg, timeout).await?;
        Ok(response.map(|r| PingResult {
            round_trip: start.elapsed(),
            platform: r.get(PLATFORM_PING_KEY).and_then(|v| v.as_f64()),
        }))
    }

    /// Answer a request with a `response` echoing its timestamp.
    pub async fn respond(
        &self,
        request: &Message,
        success: bool,
        extra: Map<String, serde_json::Value>,
    ) -> IpcResult<()> {
        let reply = Message::response(success, &request.timestamp, extra).to(request.from.clone());
        self.send(reply).await?;
        Ok(())
    }

    /// Close the connection and stop the reader task.
    pub async fn close(&mut self) -> IpcResult<()> {
        if let Some(connection) = self.connection.take() {
            connection.close().await?;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        Ok(())
    }
}

fn is_close_request(msg: &Message) -> bool {
    msg.kind == MessageType::ActionReq
        && msg.details.get(0).and_then(|v| v.as_str()) == Some("closeBot")
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ipc::protocol::{decode_identity, encode_ack};
    use crate::manager::ipc::transport::bind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_client_creation() {
        let client = WorkerClient::new("127.0.0.1:8800", "bulbe");
        assert_eq!(client.name(), "bulbe");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_not_connected() {
        let client = WorkerClient::new("127.0.0.1:8800", "bulbe");
        let result = client.send(Message::ping()).await;
        assert!(matches!(result, Err(IpcError::NotBound(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut client = WorkerClient::new(addr, "bulbe");
        let result = client.connect().await;
        assert!(matches!(result, Err(IpcError::ConnectFailed(_))));
    }

    async fn read_frame(stream: &mut crate::manager::ipc::transport::IpcStream) -> Vec<u8> {
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            frame.push(byte[0]);
            if byte[0] == 0 {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_handshake_and_ping_answer() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let identity = read_frame(&mut stream).await;
            assert_eq!(decode_identity(&identity), Some("bulbe".to_string()));
            stream.write_all(&encode_ack("bulbe")).await.unwrap();

            let ping = Message::ping().to("bulbe").sent_by("manager").stamped("t-ping");
            stream
                .write_all(&crate::manager::ipc::protocol::encode(&ping).unwrap())
                .await
                .unwrap();

            let reply = read_frame(&mut stream).await;
            crate::manager::ipc::protocol::decode(&reply).unwrap()
        });

        let mut client = WorkerClient::new(addr, "bulbe");
        client.set_platform_latency(Some(0.02)).await;
        client.connect().await.unwrap();

        let pong = server.await.unwrap();
        assert_eq!(pong.kind, MessageType::Pong);
        assert_eq!(pong.to, "manager");
        assert_eq!(pong.from, "bulbe");
        let details = ResponseDetails::parse(pong.details).unwrap();
        assert!(details.status);
        assert_eq!(details.timestamp, "t-ping");
        assert_eq!(details.rest.get(PLATFORM_PING_KEY).and_then(|v| v.as_f64()), Some(0.02));

        client.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_ack_fails_handshake() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            stream.write_all(&encode_ack("juan")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut client = WorkerClient::new(addr, "bulbe");
        let result = client.connect().await;
        assert!(matches!(result, Err(IpcError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn test_refused_identity_reports_closed() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
        });

        let mut client = WorkerClient::new(addr, "ghost");
        let result = client.connect().await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
        assert!(!client.is_connected());
    }
}
